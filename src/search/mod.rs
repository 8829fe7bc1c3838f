//! Hybrid search.

pub mod fusion;
pub mod hybrid;

pub use fusion::RrfConfig;
pub use fusion::rrf_component;
pub use hybrid::HybridSearcher;
