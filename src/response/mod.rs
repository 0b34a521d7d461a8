//! Response pipeline: token estimation, budget-aware building, caching,
//! and overflow storage.

pub mod builder;
pub mod cache;
pub mod envelope;
pub mod resources;
pub mod tokens;

pub use builder::{BuildContext, ResponseBuilder, MIN_VIABLE_BUDGET};
pub use cache::ResponseCache;
pub use envelope::{ActionItem, ResponseMode, ToolResponse};
pub use resources::ResourceStore;
