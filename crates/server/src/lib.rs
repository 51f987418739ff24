//! Classroom translation broker
//!
//! Accepts WebSocket peers into classroom sessions, dispatches typed
//! messages through a handler registry, and fans teacher speech out to
//! students through the translation pipeline. Background loops reap dead
//! sessions, expire classroom codes, and terminate unresponsive peers.

pub mod classroom;
pub mod dispatch;
pub mod handlers;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod routing;
pub mod state;
pub mod supervisor;
pub mod ws;

pub use classroom::{ClassroomCodeDirectory, DirectoryError};
pub use dispatch::{Dispatcher, HandlerContext, HandlerError, HandlerRegistry, MessageHandler};
pub use health::HealthMonitor;
pub use http::create_router;
pub use lifecycle::{classify, Classification, SessionLifecycleManager};
pub use metrics::init_metrics;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use registry::{ConnectionRegistry, ConnectionSnapshot, RoleOutcome};
pub use routing::RequestRouter;
pub use state::{AppState, BrokerBuilder, BrokerCore};
pub use supervisor::Supervisor;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
