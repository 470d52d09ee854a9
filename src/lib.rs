//! Dispatch Gateway Library
//!
//! Control-plane request dispatch for the newsletter service.
//!
//! # Features
//!
//! - **Routing**: ordered route table, first match wins, named path parameters
//! - **Intents**: each route resolves to a resource/action with a sequential execution plan
//! - **Auth**: API key and OAuth bearer resolution with injectable validators and auditing
//! - **Validation**: schema checks and sanitization in, uniform envelopes out
//! - **Middleware**: conditional chain with short-circuit and error handling
//!
//! # Request flow
//!
//! `HTTP -> Dispatcher -> classify -> middleware chain -> validate -> handler -> envelope`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod intent;
pub mod middleware;
pub mod routing;
pub mod server;
pub mod validation;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
