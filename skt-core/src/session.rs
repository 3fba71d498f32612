//! The session state machine and its event-loop host.
//!
//! The design note below sanctions replacing the original's
//! readable-callback chain with "three cooperating tasks communicating
//! over bounded channels: `tcp_reader -> tls_engine`, `tls_engine ->
//! framer`, `terminal -> menu`." This realizes that directly: a
//! terminal task (`terminal::spawn_reader`) forwards keystrokes over an
//! mpsc channel, a blocking task drives a GnuPG export when the local
//! user commits to `Active` and forwards armored chunks over a second
//! mpsc channel, and this function's `tokio::select!` loop is the
//! "tls_engine"/"session-state" pairing collapsed into one task, since
//! `tokio-openssl`'s `SslStream` is itself just another
//! `AsyncRead + AsyncWrite` the loop can poll directly.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::address;
use crate::armor::ArmorFramer;
use crate::config::{self, ActiveSource, Config};
use crate::engine::{EphemeralContext, HostContext, KeyHandle};
use crate::error::{Error, Result};
use crate::psk::{self, Psk};
use crate::qr;
use crate::terminal::{self, Keystroke, RawModeGuard};
use crate::tls::{TlsReadHalf, TlsSession, TlsWriteHalf};
use crate::transport::Listener;

/// How many armored chunks may be in flight between the blocking
/// export task and the TLS write side before the export task blocks —
/// the back-pressure mechanism the export sink contract asks for,
/// realized as a bounded channel rather than hand-rolled `WouldBlock`
/// propagation (the design note sanctions "any realization... provided the
/// lifetime... contract" holds).
const EXPORT_CHANNEL_DEPTH: usize = 4;

/// The post-handshake role. Once the machine leaves `Ready`
/// it never returns to `Undecided` (role monotonicity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Undecided,
    Active,
    Passive,
}

/// The Key Catalog: an immutable, ordered list of key handles
/// plus the pagination cursor.
pub struct Catalog {
    keys: Vec<KeyHandle>,
    cursor: usize,
}

impl Catalog {
    pub fn new(keys: Vec<KeyHandle>) -> Self {
        Catalog { keys, cursor: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The up-to-eight entries the menu currently shows.
    pub fn page(&self) -> &[KeyHandle] {
        let end = (self.cursor + 8).min(self.keys.len());
        &self.keys[self.cursor..end]
    }

    /// `9`: advances the cursor by 8, wrapping to 0 once it would run
    /// past the end (the pagination law).
    pub fn advance(&mut self) {
        if self.keys.is_empty() {
            self.cursor = 0;
            return;
        }
        self.cursor += 8;
        if self.cursor >= self.keys.len() {
            self.cursor = 0;
        }
    }

    /// The catalog entry at `cursor + offset`, if any.
    pub fn at(&self, offset: usize) -> Option<&KeyHandle> {
        self.keys.get(self.cursor + offset)
    }
}

/// The unique long-lived entity of the program. Realized here as
/// a unit type whose single async method owns every sub-resource as a
/// local variable; Rust's drop order (reverse of declaration) is what
/// gives the "sub-resources released in reverse order of acquisition"
/// invariant for free.
pub struct Session;

impl Session {
    /// Runs one complete transfer session end to end — address
    /// selection through teardown, in sequence — returning `Ok(())`
    /// for every expected termination (peer disconnect, local quit,
    /// completed transfer) and `Err` only for the failures that mark
    /// a non-zero exit.
    pub async fn run(config: Config) -> Result<()> {
        let host = HostContext::new();
        let catalog = Catalog::new(host.list_secret_keys().unwrap_or_else(|e| {
            log::warn!("failed to list host secret keys: {e}");
            Vec::new()
        }));

        // Init -> Listening.
        let chosen = address::choose()?;
        let psk = Arc::new(Psk::generate()?);
        let listener = Listener::bind(chosen.addr).await?;

        let url = psk::format_url(psk.hex(), chosen.addr, listener.port);
        println!("{url}");
        match qr::render(&url) {
            Ok(art) => println!("{art}"),
            Err(e) => log::warn!("failed to render QR code: {e}"),
        }
        log::info!("listening on {} ({})", chosen.addr, chosen.interface);

        // Listening -> Connected.
        let (stream, peer) = listener.accept_once().await?;
        log::info!("connection from {peer}");

        // Connected -> Handshaking -> Ready.
        let tls = TlsSession::accept(stream, Arc::clone(&psk), config.may_log_psk_identity()).await?;
        log::info!("TLS handshake complete");
        let (tls_read, mut tls_write) = tls.split();

        // A preloaded file commits to `Active`
        // immediately on entry to `Ready`, without waiting on a
        // keypress (a deliberate fix to the original's ordering bug;
        // see DESIGN.md).
        if let ActiveSource::Preloaded(bytes) = &config.active_source {
            log::info!("pushing preloaded key material ({} bytes)", bytes.len());
            tls_write.write_all(bytes).await.map_err(Error::Io)?;
            tls_write.shutdown().await.map_err(Error::Io)?;
            return Ok(());
        }

        run_interactive(tls_read, tls_write, catalog).await
    }
}

/// The `Ready -> (Active | Passive) -> Closing` portion of the state
/// machine, entered only when no preloaded file short-circuits it.
async fn run_interactive(
    mut tls_read: TlsReadHalf,
    mut tls_write: TlsWriteHalf,
    mut catalog: Catalog,
) -> Result<()> {
    let raw_mode = RawModeGuard::acquire();
    let (mut keys_rx, _reader) = match &raw_mode {
        Ok(_) => {
            render_menu_if_any(&catalog);
            terminal::spawn_reader()
        }
        Err(e) => {
            // No controlling terminal: degrades to passive-only; the
            // session still functions, it just shows no menu.
            log::warn!("{e}");
            let (_tx, rx) = mpsc::channel(1);
            (rx, tokio::task::spawn(async {}))
        }
    };

    let mut role = Role::Undecided;
    let mut framer = ArmorFramer::new();
    let mut ephemeral: Option<EphemeralContext> = None;
    let mut read_buf = [0u8; 16 * 1024];

    let mut export_rx: Option<mpsc::Receiver<Vec<u8>>> = None;
    let mut export_task: Option<tokio::task::JoinHandle<Result<()>>> = None;

    loop {
        tokio::select! {
            biased;

            keystroke = keys_rx.recv() => {
                match keystroke {
                    None | Some(Keystroke::Quit) => break,
                    Some(Keystroke::Digit(offset)) if role == Role::Undecided => {
                        if let Some(handle) = catalog.at(offset as usize) {
                            role = Role::Active;
                            let fingerprint = handle.fingerprint.clone();
                            log::info!("exporting {fingerprint}");
                            let (tx, rx) = mpsc::channel(EXPORT_CHANNEL_DEPTH);
                            export_task = Some(tokio::task::spawn_blocking(move || {
                                HostContext::new().export_secret(&fingerprint, |chunk| {
                                    tx.blocking_send(chunk.to_vec())
                                        .map_err(|_| std::io::ErrorKind::BrokenPipe.into())
                                })
                            }));
                            export_rx = Some(rx);
                        }
                    }
                    Some(Keystroke::NextPage) if role == Role::Undecided => {
                        catalog.advance();
                        render_menu_if_any(&catalog);
                    }
                    Some(Keystroke::SendFile) => {
                        log::debug!("'send a file' (key 0) is not implemented; ignoring");
                    }
                    Some(Keystroke::Digit(_)) | Some(Keystroke::NextPage) => {
                        // I2: role already committed (most likely
                        // `Passive`); a local send attempt is
                        // suppressed rather than silently dropped.
                        log::debug!("ignoring menu keystroke: role is already {role:?}");
                    }
                    Some(Keystroke::Other) => {}
                }
            }

            chunk = recv_optional(&mut export_rx) => {
                match chunk {
                    Some(bytes) => {
                        tls_write.write_all(&bytes).await.map_err(Error::Io)?;
                    }
                    None => {
                        // Only reachable once an export was in flight:
                        // `export_rx == None` makes `recv_optional`
                        // pending forever, so this branch never wins
                        // the select in that state.
                        export_rx = None;
                        if let Some(handle) = export_task.take() {
                            handle.await.map_err(|e| Error::ExportFailed(e.to_string()))??;
                        }
                        tls_write.shutdown().await.map_err(Error::Io)?;
                        break;
                    }
                }
            }

            n = tls_read.read(&mut read_buf) => {
                let n = n.map_err(Error::Io)?;
                if role == Role::Active {
                    // I1: inbound application data while `Active` is a
                    // protocol violation. A clean EOF (n == 0) is the
                    // peer closing its read side as expected, so it's
                    // not flagged.
                    if n > 0 {
                        return Err(Error::ProtocolViolation(
                            "received application data while in the active role".into(),
                        ));
                    }
                    continue;
                }

                if n == 0 {
                    break;
                }

                if role == Role::Undecided {
                    role = Role::Passive;
                    let parent = config::ephemeral_parent_dir();
                    ephemeral = Some(EphemeralContext::create(&parent)?);
                    log::info!("receiving (passive role committed)");
                }

                framer.feed(&read_buf[..n]);
                loop {
                    match framer.try_extract()? {
                        Some(block) => {
                            let ctx = ephemeral
                                .as_ref()
                                .expect("passive role implies an ephemeral context");
                            if let Err(e) = ctx.import(&block) {
                                log::error!("{e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    drop(raw_mode);
    Ok(())
}

fn render_menu_if_any(catalog: &Catalog) {
    if !catalog.is_empty() {
        terminal::render_menu(catalog.page(), catalog.cursor(), catalog.len());
    }
}

/// Adapts `Option<Receiver<T>>` to a future usable in `tokio::select!`:
/// `None` (no export in flight) behaves as a channel that never
/// produces a value, rather than requiring a separate `if` guard that
/// would conflict with the unconditional TLS-read branch's borrow of
/// `tls`.
async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(i: usize) -> KeyHandle {
        KeyHandle { fingerprint: format!("FPR{i}"), user_id: format!("User {i}") }
    }

    #[test]
    fn pagination_wraps_at_twenty() {
        let mut cat = Catalog::new((0..20).map(handle).collect());
        assert_eq!(cat.cursor(), 0);
        assert_eq!(cat.page().len(), 8);
        cat.advance();
        assert_eq!(cat.cursor(), 8);
        assert_eq!(cat.page().len(), 8);
        cat.advance();
        assert_eq!(cat.cursor(), 16);
        assert_eq!(cat.page().len(), 4);
        cat.advance();
        assert_eq!(cat.cursor(), 0);
    }

    #[test]
    fn pagination_on_empty_catalog_stays_at_zero() {
        let mut cat = Catalog::new(Vec::new());
        cat.advance();
        assert_eq!(cat.cursor(), 0);
        assert!(cat.page().is_empty());
    }

    #[test]
    fn at_resolves_relative_to_cursor() {
        let mut cat = Catalog::new((0..20).map(handle).collect());
        cat.advance();
        assert_eq!(cat.at(0).unwrap().fingerprint, "FPR8");
        assert_eq!(cat.at(7).unwrap().fingerprint, "FPR15");
        assert!(cat.at(8).is_none());
    }
}
