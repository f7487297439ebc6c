//! Foundation types for hoard.
//!
//! Every other hoard crate depends on `hoard-types`.
//!
//! # Key Types
//!
//! - [`ContentHash`] -- BLAKE3 content fingerprint, the identity of a blob
//! - [`FileRecord`] -- `{hash, size, modified}` as remembered by the manifest

pub mod error;
pub mod hash;
pub mod record;

pub use error::TypeError;
pub use hash::{ContentHash, HASH_HEX_LEN, HASH_LEN};
pub use record::FileRecord;
