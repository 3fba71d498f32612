//! The single-connection transport.
//!
//! A non-blocking TCP listener that accepts exactly one connection and
//! closes itself immediately afterwards.

use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// A bound-but-not-yet-accepting listener, and the port the OS chose
/// for it.
pub struct Listener {
    inner: TcpListener,
    pub port: u16,
}

impl Listener {
    /// Binds to `(addr, 0)`, letting the OS choose a port, and reports
    /// it back.
    pub async fn bind(addr: IpAddr) -> Result<Self> {
        let inner = TcpListener::bind(SocketAddr::new(addr, 0)).await?;
        let port = inner.local_addr()?.port();
        Ok(Listener { inner, port })
    }

    /// Accepts the single connection this session will ever handle.
    /// The listener is consumed by this call: once it returns, the
    /// underlying socket is dropped (and with it, closed), so no
    /// second connection to the advertised port can ever succeed —
    /// satisfying the "listener closure" testable property.
    pub async fn accept_once(self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await.map_err(Error::AcceptFailed)?;
        // `self.inner` (and thus the listening socket) is dropped here.
        Ok((stream, peer))
    }
}
