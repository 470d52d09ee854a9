//! Middleware chain and built-in middleware units

mod builtin;
mod chain;
mod rate_limit;

pub use builtin::{AuthGate, CorsMiddleware, LoggingMiddleware, TimeoutMiddleware, requires_auth};
pub use chain::{Endpoint, ErrorHandler, Middleware, MiddlewareChain, Next, PathFilter, Transition};
pub use rate_limit::RateLimitMiddleware;
