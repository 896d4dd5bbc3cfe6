//! Internal/external classification of destination addresses.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::storage::ApiType;

/// Classifies destinations by membership in a set of internal CIDRs.
#[derive(Debug, Clone, Default)]
pub struct CidrClassifier {
    internal: Vec<IpNetwork>,
}

impl CidrClassifier {
    pub fn new(internal: Vec<IpNetwork>) -> Self {
        Self { internal }
    }

    pub fn is_internal(&self, ip: &str) -> bool {
        match ip.parse::<IpAddr>() {
            Ok(addr) => self.internal.iter().any(|net| net.contains(addr)),
            Err(_) => false,
        }
    }

    /// Unparseable addresses are external.
    pub fn classify(&self, ip: &str) -> ApiType {
        if self.is_internal(ip) {
            ApiType::Internal
        } else {
            ApiType::External
        }
    }
}
