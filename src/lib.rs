//! Fixed-count HTTP benchmarking: a pool of workers sends a configured number of
//! requests at a configured concurrency, and a monitor aggregates their outcomes into
//! throughput and latency statistics.

pub mod benchmark;
pub mod body;
pub mod cli;
pub mod config;
pub mod connection;
pub mod context;
pub mod monitor;
pub mod probe;
pub mod record;
pub mod report;
pub mod request;
pub mod stats;
pub mod worker;
