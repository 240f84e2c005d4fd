//! Anonymity-network bootstrap: tor over the Snowflake pluggable transport.
//!
//! The pieces, in the order a run uses them:
//!
//! - [`TransportTemplate`] / [`TransportConfigBuilder`] render a transient torrc
//! - [`AnonymitySession`] drives an [`AnonymityBackend`] (normally [`CTorBackend`])
//!   through its lifecycle
//! - [`DialCapability`] is handed out once bootstrap completes and routes
//!   connections through tor's SOCKS listener
//!
//! # Configuration
//!
//! Environment overrides:
//! - `SNOWSTRAP_TOR_BINARY` - path to tor
//! - `SNOWSTRAP_SOCKS_PORT` - fixed SOCKS port instead of `auto`
//! - `SNOWSTRAP_STARTUP_TIMEOUT` - bootstrap deadline in seconds
//! - `SNOWSTRAP_SNOWFLAKE_CLIENT` - path to snowflake-client
//! - `SNOWSTRAP_DATA_DIR` - tor data directory

mod config;
mod ctor;
mod dialer;
mod session;
pub mod socks5;
mod torrc;

pub use config::{
    SnowflakeConfig, TorConfig, TransportTemplate, DEFAULT_BRIDGE, DEFAULT_BROKER_URL,
    DEFAULT_FRONT, DEFAULT_ICE_SERVERS, DEFAULT_STARTUP_TIMEOUT_SECS,
};
pub use ctor::{parse_tor_line, CTorBackend, TorEvent};
pub use dialer::DialCapability;
pub use session::{AnonymityBackend, AnonymitySession, BootstrapStatus, SessionState};
pub use torrc::{TransportConfig, TransportConfigBuilder};
