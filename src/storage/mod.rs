//! Storage module: the memory-mapped parameter store.
//!
//! This module provides:
//! - Platform file-opening capability (`backend`)
//! - The mapped store and its lifecycle (`store`)
//! - The single-writer update queue and completion handles (`writer`)

pub mod backend;
pub mod store;
pub mod writer;
