//! Bounded-integer compute kernels.
//!
//! - **lut**: precomputed xor / add / mul tables over `[0, N)`
//! - **reduce**: full-view `sum mod N` reductions (rayon above a threshold)

pub mod lut;
pub mod reduce;
