//! # LUTSTORE
//!
//! An out-of-core parameter store: a flat array of bounded `u16` values kept
//! in a memory-mapped file, exposed through zero-copy matrix views and
//! updated in place by a training loop that never loads the whole array.
//!
//! ## Components
//!
//! 1. **Lookup tables**: precomputed `N × N` xor / add-mod / mul-mod tables
//!    standing in for floating-point tensor math.
//! 2. **Parameter store**: file-backed mapping with size validation,
//!    destructive reinitialization and a single-writer update queue.
//! 3. **Views**: contiguous embedding / projection / output matrices laid
//!    out over the mapped buffer.
//! 4. **Trainer**: a reproducible read → lookup → write loop over the views.
//!
//! The trainer is not a learning algorithm. It is a bounded integer
//! transformation that exercises full-view reads, random gathers and
//! batched writes against the store.

pub mod error;
pub mod kernels;
pub mod layout;
pub mod runtime;
pub mod storage;
pub mod training;

pub use error::{LutError, StoreError};
pub use kernels::lut::{tables, LookupTables, Table};
pub use layout::views::{derive_views, MatrixView, ModelViews, ParamSchema};
pub use storage::store::{ParamStore, ParamView, StoreConfig, StoreState};
pub use storage::writer::WriteHandle;
pub use training::trainer::{OffsetPolicy, Trainer, TrainerConfig, WriteMode};

/// Crate-wide constants.
pub mod config {
    /// Exclusive upper bound of every stored and looked-up value.
    pub const DOMAIN_SIZE: usize = 256;

    /// Largest domain representable by the `u16` element type.
    pub const MAX_DOMAIN_SIZE: usize = u16::MAX as usize + 1;

    /// Bytes per stored element (`u16`, native byte order).
    pub const ELEMENT_SIZE: usize = std::mem::size_of::<u16>();

    /// Default vocabulary size.
    pub const VOCAB_SIZE: usize = 100;

    /// Default embedding width.
    pub const EMBED_DIM: usize = 64;

    /// Default hidden width.
    pub const HIDDEN_DIM: usize = 256;

    /// Default output width.
    pub const OUTPUT_DIM: usize = 100;

    /// Default store length in elements.
    pub const TOTAL_PARAMS: usize = 100_000;

    /// Default training batch size.
    pub const BATCH_SIZE: usize = 32;

    /// Elements per independently seeded chunk during reinitialization.
    pub const INIT_CHUNK: usize = 64 * 1024;

    /// Below this many elements, reductions and gathers stay sequential.
    pub const PAR_THRESHOLD: usize = 16 * 1024;

    /// Default bound of the per-store write queue (0 = unbounded).
    pub const WRITE_QUEUE_DEPTH: usize = 1024;

    /// Total elements needed by the default schema.
    pub const fn default_required_params() -> usize {
        VOCAB_SIZE * EMBED_DIM + EMBED_DIM * HIDDEN_DIM + HIDDEN_DIM * OUTPUT_DIM
    }
}
