//! `skt-server`: the command-line frontend for the secure key transfer
//! session. Parses argv, consults the environment, and hands off
//! to [`skt_core::Session::run`]; everything interesting lives in
//! `skt-core`.

use std::io::Read as _;

use anyhow::Context as _;
use clap::Parser;

use skt_core::config::{ActiveSource, Config};

/// Transfer an OpenPGP secret key to or from another device over a
/// short-lived, authenticated channel on the local network.
///
/// With no arguments, waits to receive a key. Given a path, pushes the
/// ASCII-armored key at that path as soon as the peer connects.
#[derive(Parser, Debug)]
#[command(name = "skt-server", version, about)]
struct Args {
    /// Path to an ASCII-armored secret key to push once the peer
    /// connects and the TLS handshake completes. Use `-` to read the
    /// key from standard input.
    path: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env(ActiveSource::None);
    env_logger::Builder::new().filter_level(config.log_filter()).init();

    config.active_source = match args.path.as_deref() {
        None => ActiveSource::None,
        Some("-") => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read key material from standard input")?;
            ActiveSource::Preloaded(buf)
        }
        Some(path) => match std::fs::read(path) {
            Ok(buf) => ActiveSource::Preloaded(buf),
            Err(e) => {
                // Degrades to waiting-to-receive rather than aborting
                // the session, matching the original's behavior when
                // the preload file can't be opened.
                log::warn!("failed to read key material from {path}: {e}; waiting to receive instead");
                ActiveSource::None
            }
        },
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime
        .block_on(skt_core::Session::run(config))
        .context("secure key transfer session failed")
}
