//! Cross-component scenarios exercising the real TLS-PSK handshake end
//! to end over loopback TCP: a correct and a mismatched PSK, and
//! listener closure after the single accept. Placed in
//! `skt-core/tests/` alongside `for-each-artifact.rs`'s role as this
//! workspace's cross-file integration test.

use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};

use skt_core::psk::Psk;
use skt_core::tls::TlsSession;
use skt_core::transport::Listener;

/// Connects a synchronous `openssl` client to `addr` offering `secret`
/// as the PSK, and returns whether the handshake succeeded. Pinned to
/// TLS 1.2 so the classic `psk_client_callback` (rather than TLS 1.3's
/// separate session-PSK API) is what actually gets exercised, matching
/// the server's PSK-only cipher list.
fn client_handshake(addr: std::net::SocketAddr, secret: [u8; 16]) -> bool {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_max_proto_version(Some(SslVersion::TLS1_2)).unwrap();
    builder.set_cipher_list("ECDHE-PSK-AES128-GCM-SHA256:PSK-AES128-GCM-SHA256").unwrap();
    builder.set_psk_client_callback(move |_ssl, _hint, identity, psk_out| {
        identity[0] = 0;
        psk_out[..secret.len()].copy_from_slice(&secret);
        Ok(secret.len())
    });
    let connector = builder.build();

    let stream = StdTcpStream::connect(addr).unwrap();
    connector.connect("localhost", stream).is_ok()
}

#[tokio::test]
async fn correct_psk_completes_handshake() {
    let listener = Listener::bind("127.0.0.1".parse().unwrap()).await.unwrap();
    let port = listener.port;
    let psk = Arc::new(Psk::generate().unwrap());
    let secret = *psk.secret();

    let client = tokio::task::spawn_blocking(move || {
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        client_handshake(addr, secret)
    });

    let (stream, _peer) = listener.accept_once().await.unwrap();
    let server = TlsSession::accept(stream, psk, false).await;
    assert!(server.is_ok(), "server-side handshake should succeed with the right PSK");
    assert!(client.await.unwrap(), "client-side handshake should succeed with the right PSK");
}

#[tokio::test]
async fn wrong_psk_fails_handshake() {
    let listener = Listener::bind("127.0.0.1".parse().unwrap()).await.unwrap();
    let port = listener.port;
    let psk = Arc::new(Psk::generate().unwrap());
    // Flip one bit relative to the server's real secret.
    let mut wrong_secret = *psk.secret();
    wrong_secret[0] ^= 0x01;

    let client = tokio::task::spawn_blocking(move || {
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        client_handshake(addr, wrong_secret)
    });

    let (stream, _peer) = listener.accept_once().await.unwrap();
    let server = TlsSession::accept(stream, psk, false).await;
    assert!(server.is_err(), "server-side handshake must reject a mismatched PSK");
    assert!(!client.await.unwrap(), "client-side handshake must fail with the wrong PSK");
}

#[tokio::test]
async fn listener_closes_after_single_accept() {
    let listener = Listener::bind("127.0.0.1".parse().unwrap()).await.unwrap();
    let port = listener.port;
    let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let first = StdTcpStream::connect(addr).unwrap();
    let (_stream, _peer) = listener.accept_once().await.unwrap();
    drop(first);

    // The listener (and its fd) is gone now; a second attempt must be
    // refused rather than queued.
    let second = StdTcpStream::connect(addr);
    assert!(second.is_err(), "a second connection to the advertised port must be refused");
}
