//! Error kinds for the secure key transfer session.
//!
//! Each variant corresponds to a row in the error-handling table of the
//! session design: it carries whatever context a log line at the call
//! site needs, and nothing is allowed to escape the event loop as an
//! unstructured panic.

use std::path::PathBuf;

/// Something went wrong while running a transfer session.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No usable local address could be found to bind the listener to.
    #[error("no usable non-loopback, up network interface was found")]
    NoUsableAddress,

    /// Generating or encoding the pre-shared key failed.
    #[error("failed to generate a pre-shared key: {0}")]
    StartupConfig(String),

    /// Accepting the single inbound connection failed.
    #[error("failed to accept the incoming connection: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The TLS handshake failed fatally (as opposed to a warning alert,
    /// which is logged and does not terminate the session).
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// An OpenPGP armored block did not conform to the framing grammar
    /// in the incoming-armor-buffer algorithm.
    #[error("malformed OpenPGP armor on the wire: {0}")]
    MalformedArmor(String),

    /// The ephemeral keyring rejected an otherwise well-framed block.
    /// Logged and discarded; the session continues so later blocks may
    /// still be tried.
    #[error("failed to import key material: {0}")]
    ImportFailed(String),

    /// The host's `gpg` could not produce the requested export.
    #[error("failed to export key material: {0}")]
    ExportFailed(String),

    /// We received application data while in the `Active` role, or
    /// attempted to send while in the `Passive` role.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The controlling terminal could not be put into raw mode; the
    /// session degrades to passive-only operation rather than failing.
    #[error("terminal unavailable, degrading to passive-only mode: {0}")]
    TerminalUnavailable(String),

    /// Creating or tearing down the ephemeral GnuPG homedir failed.
    #[error("ephemeral homedir error at {path:?}: {source}")]
    EphemeralHomedir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Wraps lower-level I/O failures that don't warrant their own
    /// variant (e.g. a write to an already-gone socket).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wraps `sequoia-openpgp` parse/serialize failures.
    #[error("OpenPGP error: {0}")]
    OpenPgp(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
