//! Gateway - TCP/TLS listener that accepts incoming connections.
//!
//! The Gateway binds to sockets and spawns Connection tasks for each
//! incoming client. Supports both plaintext and TLS connections; TLS
//! clients may present a certificate whose fingerprint is offered to the
//! `certfp` auth provider.

use crate::bouncer::Bouncer;
use crate::config::{ClientAuth, TlsConfig};
use crate::network::Connection;
use rustls_pemfile::{certs, pkcs8_private_keys};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::io::{BufReader, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tracing::{error, info, instrument, warn};

/// The Gateway accepts incoming TCP/TLS connections and spawns handlers.
pub struct Gateway {
    plaintext_listener: TcpListener,
    tls_listener: Option<(TcpListener, TlsAcceptor)>,
    bouncer: Arc<Bouncer>,
}

impl Gateway {
    /// Bind the listeners named in the bouncer's configuration.
    pub async fn bind(bouncer: Arc<Bouncer>) -> anyhow::Result<Self> {
        let config = bouncer.config();
        let plaintext_listener = TcpListener::bind(config.listen.address).await?;
        info!(address = %plaintext_listener.local_addr()?, "Plaintext listener bound");

        let tls_listener = if let Some(tls_cfg) = &config.tls {
            let tls_acceptor = Self::load_tls(tls_cfg)?;
            let listener = TcpListener::bind(tls_cfg.address).await?;
            info!(address = %listener.local_addr()?, client_auth = ?tls_cfg.client_auth, "TLS listener bound");
            Some((listener, tls_acceptor))
        } else {
            None
        };

        Ok(Self {
            plaintext_listener,
            tls_listener,
            bouncer,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.plaintext_listener.local_addr()
    }

    pub fn tls_local_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.tls_listener
            .as_ref()
            .map(|(listener, _)| listener.local_addr())
    }

    /// Load TLS certificates and create TlsAcceptor.
    fn load_tls(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
        let certs = load_certs(&config.cert_path)?;

        let key_file = std::fs::read(&config.key_path)?;
        let key_reader = &mut BufReader::new(Cursor::new(key_file));
        let mut keys: Vec<PrivateKeyDer> = pkcs8_private_keys(key_reader)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(PrivateKeyDer::from)
            .collect();

        if keys.is_empty() {
            anyhow::bail!("No private keys found in {}", config.key_path);
        }

        let key = keys.remove(0);

        let builder = ServerConfig::builder();
        let tls_config = match (config.client_auth, &config.ca_path) {
            (ClientAuth::None, _) | (_, None) => {
                builder.with_no_client_auth().with_single_cert(certs, key)?
            }
            (mode, Some(ca_path)) => {
                let mut roots = RootCertStore::empty();
                for ca in load_certs(ca_path)? {
                    roots.add(ca)?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots));
                let verifier = if mode == ClientAuth::Optional {
                    verifier.allow_unauthenticated().build()?
                } else {
                    verifier.build()?
                };
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)?
            }
        };

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Run the gateway, accepting connections until shutdown is requested.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let bouncer = Arc::clone(&self.bouncer);
        let shutdown = bouncer.shutdown_requested();

        // If TLS is configured, spawn a separate task for the TLS listener
        if let Some((tls_listener, tls_acceptor)) = self.tls_listener {
            let bouncer_tls = Arc::clone(&bouncer);
            let shutdown_tls = shutdown.clone();

            tokio::spawn(async move {
                loop {
                    let accepted = tokio::select! {
                        _ = shutdown_tls.cancelled() => break,
                        accepted = tls_listener.accept() => accepted,
                    };
                    match accepted {
                        Ok((stream, addr)) => {
                            info!(%addr, "TLS connection accepted");

                            let bouncer = Arc::clone(&bouncer_tls);
                            let acceptor = tls_acceptor.clone();

                            bouncer_tls.tasks().spawn(async move {
                                // Perform TLS handshake
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        let fingerprint = tls_stream
                                            .get_ref()
                                            .1
                                            .peer_certificates()
                                            .and_then(|chain| chain.first())
                                            .map(|cert| cert_fingerprint(cert.as_ref()));
                                        let connection =
                                            Connection::new(bouncer, tls_stream, addr, fingerprint);
                                        if let Err(e) = connection.run().await {
                                            error!(%addr, error = %e, "TLS connection error");
                                        }
                                        info!(%addr, "TLS connection closed");
                                    }
                                    Err(e) => {
                                        warn!(%addr, error = %e, "TLS handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept TLS connection");
                        }
                    }
                }
                info!("TLS listener stopped");
            });
        }

        // Main plaintext listener loop
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.plaintext_listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "Plaintext connection accepted");

                    let connection = Connection::new(Arc::clone(&bouncer), stream, addr, None);
                    bouncer.tasks().spawn(async move {
                        if let Err(e) = connection.run().await {
                            error!(%addr, error = %e, "Plaintext connection error");
                        }
                        info!(%addr, "Plaintext connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept plaintext connection");
                }
            }
        }
        info!("Plaintext listener stopped");
        Ok(())
    }
}

fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::read(path)?;
    let reader = &mut BufReader::new(Cursor::new(file));
    let certs: Vec<CertificateDer> = certs(reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }
    Ok(certs)
}

/// SHA-256 of a DER certificate as uppercase hex, the form the `certfp`
/// provider stores.
pub(crate) fn cert_fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02X}");
    }
    out
}
