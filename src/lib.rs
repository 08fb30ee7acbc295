//! Quotagate - In-Process Rate Limiting
//!
//! This crate enforces per-key request quotas over fixed time windows. Rules
//! are registered once at startup; each request is then evaluated against
//! them in order, with counters kept in a sharded in-memory map and purged
//! opportunistically once their windows have elapsed.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
