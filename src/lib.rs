//! Multi-chain BulkSend deployment.
//!
//! The pieces, leaf first: [`errors`] classifies RPC failures, [`retry`]
//! wraps operations in jittered exponential backoff, [`transport`] rotates
//! through a network's endpoints, [`balance`] probes affordability in bounded
//! waves, and [`deploy`] deploys to the selected networks one at a time.
//! [`ownership`] and [`rescue`] drive the contract's admin surface afterwards.

pub mod admin;
pub mod balance;
pub mod chain;
pub mod config;
pub mod contract;
pub mod deploy;
pub mod errors;
pub mod from_env;
pub mod network;
pub mod ownership;
pub mod report;
pub mod rescue;
pub mod retry;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;
