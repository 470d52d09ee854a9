//! Route registry and matcher.
//!
//! Route definitions are compiled into path matchers and evaluated in
//! registration order. The first definition whose method and pattern match
//! wins, regardless of how specific a later definition is.

mod pattern;
mod registry;
pub mod table;

pub use pattern::{PathPattern, RouteParams};
pub use registry::{CompiledRoute, HttpMethod, RouteDefinition, RouteMatch, RoutePatternInfo, RouteRegistry};
pub use table::{RouteSchema, default_routes, default_schemas};
