//! Lineage resolution over the recorded supersession graph.

pub mod cache;
pub mod resolver;

pub use cache::{CacheKey, LineageCache};
pub use resolver::{LineageResolver, ResolveError, ResolveResult};
