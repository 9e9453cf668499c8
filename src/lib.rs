//! # sitesync
//!
//! Synchronizes two deployments of the same site: database replication with
//! PHP-serialization-aware substitution, staged table and upload swaps,
//! chunked media transfer, a resumable job orchestrator and the signed
//! agent protocol the two sides speak.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod remote;
pub mod replication;
pub mod repositories;
pub mod server;
pub mod signing;
pub mod swap;
pub mod telemetry;
pub use migration;
