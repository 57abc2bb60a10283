//! HTTP API server for kvscope.
//!
//! Exposes the session operations as JSON endpoints under `/api/v1`, so a
//! presentation layer in any technology can browse connected stores.

mod error;
mod logging;
mod routes;
mod state;

pub use crate::config::{Config, CorsConfig, LogFormat, LoggingConfig, ServerConfig};
pub use error::{ApiError, ErrorBody, ErrorResponse};
pub use logging::{LoggingError, init as init_logging};
pub use routes::router;
pub use state::AppState;
