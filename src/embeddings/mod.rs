//! Embedding providers.
//!
//! Implementations of the [`crate::traits::Embedder`] capability.

pub mod http;

pub use http::HttpEmbedder;
