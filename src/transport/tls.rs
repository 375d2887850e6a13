//! TLS termination for the relay listener.
//!
//! [`load_server_config`] turns the PEM files named in [`TlsConfig`] into
//! a rustls server config. [`TlsListener`] plugs that into `axum::serve`:
//! a background task accepts TCP sockets and runs each handshake on its
//! own task, so a stalled client never holds up the accept loop.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::serve::Listener;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::server::TlsStream;

use crate::config::TlsConfig;
use crate::error::RelayError;

/// Completed handshakes waiting to be picked up by `axum::serve`.
const PENDING_HANDSHAKES: usize = 128;

/// Pause after an accept error that is not tied to a single client
/// (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Loads certificate chain, CA bundle and private key into a rustls
/// server config advertising `http/1.1`.
///
/// # Errors
///
/// Returns [`RelayError::Tls`] if a file cannot be read, holds no usable
/// PEM items, or the key does not match the certificate.
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, RelayError> {
    let mut chain = read_certs(&tls.cert_path)?;
    if let Some(ca_path) = &tls.ca_bundle_path {
        chain.extend(read_certs(ca_path)?);
    }
    let key = PrivateKeyDer::from_pem_file(&tls.key_path)
        .map_err(|e| RelayError::Tls(format!("{}: {e}", tls.key_path.display())))?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| RelayError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| RelayError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RelayError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| RelayError::Tls(format!("{}: {e}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RelayError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(RelayError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

/// Listener yielding TLS streams, usable with [`axum::serve`].
#[derive(Debug)]
pub struct TlsListener {
    ready: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
}

impl TlsListener {
    /// Starts accepting on `tcp`, handshaking each client with `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the bound address cannot be read.
    pub fn new(
        tcp: TcpListener,
        config: Arc<ServerConfig>,
        handshake_timeout: Duration,
    ) -> io::Result<Self> {
        let local_addr = tcp.local_addr()?;
        let (tx, ready) = mpsc::channel(PENDING_HANDSHAKES);
        tokio::spawn(accept_loop(
            tcp,
            TlsAcceptor::from(config),
            handshake_timeout,
            tx,
        ));
        Ok(Self { ready, local_addr })
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(accepted) => accepted,
            None => {
                // The accept loop only exits once this listener is gone.
                tracing::error!(addr = %self.local_addr, "tls accept loop stopped");
                std::future::pending().await
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    ready: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = tcp.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    if !is_connection_error(&err) {
                        tracing::warn!(error = %err, "tcp accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    continue;
                }
            },
            () = ready.closed() => return,
        };

        let acceptor = acceptor.clone();
        let ready = ready.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = ready.send((tls, peer)).await;
                }
                Ok(Err(err)) => {
                    tracing::debug!(peer = %peer, error = %err, "tls handshake failed");
                }
                Err(_) => {
                    tracing::debug!(peer = %peer, "tls handshake timed out");
                }
            }
        });
    }
}

fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
