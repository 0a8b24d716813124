// packages/pipeline/src/encoding/mod.rs
//! Parameter encodings used by storage backends

pub mod flatten;

pub use flatten::{encode, encode_value, flatten};
