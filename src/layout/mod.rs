//! Layout of named matrices over the flat parameter store.

pub mod views;
