//! Content fingerprinting for hoard.
//!
//! Streams file bytes through BLAKE3 in bounded chunks. All crypto wraps the
//! `blake3` crate; there is no custom cryptography here.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError, HashingReader};
