//! IWLAN Core Library
//!
//! Shared, runtime-free functionality for the IWLAN tunnel manager:
//! - Closed error taxonomy for tunnel failures and its classifier
//! - Data fail cause mapping reported back to the framework
//! - Retry policy schema, validation, layered storage and resolution
//! - External event catalogue used for unthrottling
//! - Service configuration and tracing setup

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod fail_cause;
pub mod iwlan_error;
pub mod policy;
pub mod tracing_init;

pub use clock::{Clock, SystemClock};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use event::IwlanEvent;
pub use fail_cause::DataFailCause;
pub use iwlan_error::{IwlanError, RawFailure};
pub use policy::{ErrorPolicy, ErrorType, PolicyError, PolicyResolver, PolicyStore};
