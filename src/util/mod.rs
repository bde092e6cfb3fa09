//! Supporting types shared across the crate.
//!
//! - [`b64`] - Base64 header payloads
//! - [`literal_or_env`] - Config values resolved from environment variables
//! - [`money_amount`] - Human-readable prices and smallest-unit conversion
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - Tracing subscriber and OpenTelemetry export

pub mod b64;
pub mod literal_or_env;
pub mod money_amount;
pub mod sig_down;
pub mod telemetry;

pub use b64::*;
pub use literal_or_env::*;
pub use money_amount::*;
pub use sig_down::*;
pub use telemetry::*;
