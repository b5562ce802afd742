//! tradelink application shell.
//!
//! Builds the connectivity layer from configuration and exposes the
//! upward interface consumed by the dashboard:
//! - `on_message` for pushed envelopes
//! - `connection_state` for the persistent channel
//! - `offline_capabilities` for gating affordances

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
