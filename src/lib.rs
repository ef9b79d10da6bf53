//! Client for the Pentair Home cloud API.
//!
//! ```no_run
//! use pentair::{ClientConfig, PentairClient};
//!
//! # async fn example() -> pentair::Result<()> {
//! let config = ClientConfig::new("us-west-2_abc123", "client-id", "identity-pool-id", "us-west-2");
//! let mut client = PentairClient::new(config);
//! client.authenticate("me@example.com", "password").await?;
//!
//! for device in client.get_devices().await? {
//!     for (name, value) in device.translated_fields() {
//!         println!("{}: {}", name, value);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod fields;
pub mod redact;
pub mod signing;
pub mod srp;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_log;

pub use auth::{Session, SessionState, TokenSet};
pub use client::PentairClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use fields::{translate, FieldValue};
pub use redact::redact;
pub use types::DeviceRecord;
