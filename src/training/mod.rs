//! Training module: the read → lookup → write loop.
//!
//! This module provides:
//! - Seeded index sampling over the embedding vocabulary
//! - Fixed and rolling write-offset policies
//! - Awaited and fire-and-forget write modes

pub mod trainer;
