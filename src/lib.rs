//! APIClarity backend.
//!
//! Ingests HTTP telemetry from capture agents, keeps an inventory of the
//! APIs it sees, reconstructs and diffs their OpenAPI specs, and runs
//! pluggable analysis modules over every event.

pub mod config;
pub mod modules;
pub mod notifier;
pub mod pipeline;
pub mod rest;
pub mod sampling;
pub mod services;
pub mod speculator;
pub mod storage;
pub mod utils;
