//! Dependency resolution: from a request to a consistent set of packages.

mod options;
mod order;
mod reason;
mod recommendations;
#[allow(clippy::module_inception)]
mod resolver;
pub mod sanity;

pub use options::ResolverOptions;
pub use order::dependency_order;
pub use reason::SelectionReason;
pub use recommendations::{Recommendation, Recommendations, can_install, find_recommendations};
pub use resolver::RelationshipResolver;
