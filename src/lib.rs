//! Realtime state-synchronization engine for a broadcast call-screening
//! console.
//!
//! Keeps a local replica of call lines, buzzer signals, and per-studio chat
//! converged with the authoritative State Store across many concurrent
//! consoles. Remote changes arrive over a push channel when it is healthy and
//! over a fixed-interval poll always; an idempotent reconciler absorbs the
//! resulting duplicate delivery so the presentation layer sees exactly one
//! notification per actual change.

pub mod config;
pub mod dto;
pub mod error;
pub mod link;
pub mod services;
pub mod state;
pub mod store;
