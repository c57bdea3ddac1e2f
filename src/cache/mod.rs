// src/cache/mod.rs

//! Package cache.
//!
//! - [`store`] owns the on-disk layout, markers and entry lifecycle.
//! - [`lock`] serializes access to one `(identity, variant)` directory.
//! - [`hash`] computes SHA-256 file digests and blake3 variant keys.

pub mod hash;
pub mod lock;
pub mod store;

pub use hash::{sha256_bytes, sha256_file, variant_hash, variant_hashes};
pub use lock::VariantGuard;
pub use store::{CacheEntry, CacheStore};
