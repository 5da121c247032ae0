//! Runtime module: diagnostics shared by training drivers.
//!
//! This module provides:
//! - Rolling step and write-wait latency tracking
//! - Health status derived from those metrics

pub mod health;
