//! `skt-core`: the state machine that transfers an OpenPGP secret key
//! over an ephemeral, authenticated TLS-PSK channel between two hosts
//! on the same local network.
//!
//! The session is the composition of several cooperating parts: address
//! selection, PSK generation and advertisement, the single-connection
//! transport, the TLS-PSK handshake adapter, the OpenPGP engine
//! adapter, the armor framer and state machine, the interactive
//! terminal menu, and the Tokio-based event loop that drives all of
//! the above. [`Session::run`] is the single entry point a frontend
//! (e.g. the `skt-server` binary) needs.

pub mod address;
pub mod armor;
pub mod config;
pub mod engine;
pub mod error;
pub mod psk;
pub mod qr;
pub mod session;
pub mod terminal;
pub mod tls;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use session::Session;
