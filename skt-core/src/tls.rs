//! TLS-PSK server adapter.
//!
//! Bridges a PSK-only TLS server session to the Tokio-async accepted
//! socket via `tokio-openssl`: its `SslStream<S>` already supplies an
//! idempotent, re-entered-on-every-readable-event handshake step —
//! it's OpenSSL's own mid-handshake resumption, wired to
//! `AsyncRead`/`AsyncWrite` instead of a hand-rolled byte-stream
//! bridge.

use std::pin::Pin;
use std::sync::Arc;

use foreign_types::ForeignTypeRef;
use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslOptions, SslVersion};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::error::{Error, Result};
use crate::psk::{Psk, PSK_ID_HINT};

/// (EC)DHE-PSK and plain-PSK key exchange only, no non-forward-secret
/// or certificate-authenticated suites, no 3DES/Camellia-CBC.
const CIPHER_LIST: &str = "ECDHE-PSK-CHACHA20-POLY1305:\
                            ECDHE-PSK-AES256-GCM-SHA384:\
                            ECDHE-PSK-AES128-GCM-SHA256:\
                            DHE-PSK-CHACHA20-POLY1305:\
                            DHE-PSK-AES256-GCM-SHA384:\
                            DHE-PSK-AES128-GCM-SHA256:\
                            PSK-CHACHA20-POLY1305:\
                            PSK-AES256-GCM-SHA384:\
                            PSK-AES128-GCM-SHA256";

/// TLS 1.3 ciphersuites are negotiated independently of the 1.2
/// cipher-string above; PSK-only key exchange in 1.3 is a handshake
/// mode (`psk_ke`/`psk_dhe_ke`), not a suite name, so no PSK-specific
/// filtering is needed here beyond excluding nothing non-AEAD.
const CIPHERSUITES_TLS13: &str =
    "TLS_CHACHA20_POLY1305_SHA256:TLS_AES_256_GCM_SHA384:TLS_AES_128_GCM_SHA256";

/// Curves excluding the weak secp192r1/secp224r1.
const GROUPS: &str = "X25519:P-256:P-384:P-521";

fn tls_err(e: ErrorStack) -> Error {
    Error::TlsHandshake(e.to_string())
}

fn build_context(psk: Arc<Psk>, log_psk_identity: bool) -> Result<SslContext> {
    let mut builder = SslContext::builder(SslMethod::tls_server()).map_err(tls_err)?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2)).map_err(tls_err)?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_3)).map_err(tls_err)?;
    builder.set_options(
        SslOptions::NO_COMPRESSION | SslOptions::NO_TICKET | SslOptions::CIPHER_SERVER_PREFERENCE,
    );
    builder.set_cipher_list(CIPHER_LIST).map_err(tls_err)?;
    builder.set_ciphersuites(CIPHERSUITES_TLS13).map_err(tls_err)?;
    builder.set_groups_list(GROUPS).map_err(tls_err)?;
    // "High" DH security (>=3072-bit group): OpenSSL's security level
    // 3 is defined as a >=128-bit-strength floor, which is exactly the
    // >=3072-bit DH / >=256-bit ECDH bar wanted here; `set_dh_auto` has
    // OpenSSL pick a matching built-in group.
    builder.set_security_level(3);
    builder.set_dh_auto(true).map_err(tls_err)?;

    builder.set_psk_server_callback(move |_ssl, identity, psk_out| {
        // `identity` is the peer-claimed username: ignored for
        // authentication (the PSK is returned unconditionally) and
        // only printed above the documented verbosity threshold, since
        // it's untrusted, peer-controlled input.
        if let Some(id) = identity {
            if log_psk_identity {
                log::warn!("peer PSK identity: {}", String::from_utf8_lossy(id));
            } else {
                log::trace!("peer offered a PSK identity of {} bytes", id.len());
            }
        }
        let secret = psk.secret();
        psk_out[..secret.len()].copy_from_slice(secret);
        Ok(secret.len())
    });

    let ctx = builder.build();
    set_identity_hint(&ctx, PSK_ID_HINT)?;
    Ok(ctx)
}

/// `openssl`'s safe API wraps the PSK server *callback* but not
/// `SSL_CTX_use_psk_identity_hint`; reach for the raw FFI entry point
/// instead, the same way this workspace's `ffi`/`openpgp-ffi` crates
/// wrap C entry points the safe layer above them doesn't cover, via
/// `foreign-types`' `as_ptr()`.
fn set_identity_hint(ctx: &SslContext, hint: &str) -> Result<()> {
    let hint = std::ffi::CString::new(hint).map_err(|e| Error::TlsHandshake(e.to_string()))?;
    let rc = unsafe { openssl_sys::SSL_CTX_use_psk_identity_hint(ctx.as_ptr(), hint.as_ptr()) };
    if rc != 1 {
        return Err(Error::TlsHandshake("failed to set the PSK identity hint".into()));
    }
    Ok(())
}

/// The independent halves `TlsSession::split` produces.
pub type TlsReadHalf = ReadHalf<SslStream<TcpStream>>;
pub type TlsWriteHalf = WriteHalf<SslStream<TcpStream>>;

/// A TLS-PSK server session layered over the single accepted
/// connection. The wrapped `SslStream` implements `AsyncRead` +
/// `AsyncWrite`, so record-level reads and writes are just
/// `tokio::io` calls against the halves `split` produces.
pub struct TlsSession {
    inner: SslStream<TcpStream>,
}

impl TlsSession {
    /// Drives the handshake to completion; `tokio-openssl` re-polls
    /// the underlying socket on every readable/writable event
    /// automatically, so this is `.await`ed exactly once rather than
    /// manually re-entered.
    pub async fn accept(stream: TcpStream, psk: Arc<Psk>, log_psk_identity: bool) -> Result<Self> {
        let ctx = build_context(psk, log_psk_identity)?;
        let ssl = Ssl::new(&ctx).map_err(tls_err)?;
        let mut inner =
            SslStream::new(ssl, stream).map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Pin::new(&mut inner)
            .accept()
            .await
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        Ok(TlsSession { inner })
    }

    /// Splits the session into independent read/write halves so the
    /// event loop can await a read and a write in the same
    /// `tokio::select!` without two overlapping `&mut` borrows of one
    /// stream — `tokio::io::split`'s halves share the underlying
    /// stream behind a mutex internally, bridging the asynchronous
    /// byte stream without a hand-rolled queue pair.
    pub fn split(self) -> (TlsReadHalf, TlsWriteHalf) {
        tokio::io::split(self.inner)
    }
}
