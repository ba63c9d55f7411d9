#![doc = "rclone-to-b2-core: pipeline library for the rclone-to-b2 backup job."]

//! Everything the job does lives here: the environment overlay and job
//! configuration, credential resolution from Vault, the B2 backend
//! configuration, the rclone sync engine adapter, and the metrics collector
//! and Pushgateway client.
//!
//! # Usage
//! The `rclone-to-b2` binary wires the real clients together and calls
//! [`synchronise::synchronise`]. Tests substitute the traits in [`contract`]
//! with their `mockall` mocks.

pub mod backend;
pub mod config;
pub mod contract;
pub mod credential;
pub mod error;
pub mod metrics;
pub mod pushgateway;
pub mod rclone;
pub mod stats;
pub mod synchronise;
pub mod vault;
