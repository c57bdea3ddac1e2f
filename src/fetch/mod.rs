// src/fetch/mod.rs

//! Asset fetching: the pluggable [`Fetcher`] transport and the
//! [`FetchCoordinator`] that verifies and places files in the cache.

pub mod coordinator;
pub mod source;

pub use coordinator::{FetchCoordinator, FetchReport};
pub use source::{Fetcher, LocalFetcher};
