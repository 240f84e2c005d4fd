//! snowstrap - fetch VPN provider configuration over Tor with Snowflake.
//!
//! A run renders a transient torrc, starts tor with the Snowflake pluggable
//! transport, waits for a usable circuit, and then fetches a fixed list of
//! URLs through tor's SOCKS listener. Provider endpoints are fetched with a
//! client that trusts only the provider's pinned CA.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http_client;
pub mod privacy;

pub use bootstrap::{Bootstrapper, Phase};
pub use config::Config;
pub use error::{BootstrapError, Result};
