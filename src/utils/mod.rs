//! Process-level helpers shared by the binary and background services.

pub mod bootstrap;
