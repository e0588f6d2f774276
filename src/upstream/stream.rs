//! Upstream transport.
//!
//! One stream type for plaintext and TLS links, plus the connect routine the
//! IRC driver uses for every attempt.

use crate::account::ServerEntry;
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

/// A connected upstream link.
pub enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl UpstreamStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Open a link to `server`, within the configured connect timeout.
pub async fn connect(
    server: &ServerEntry,
    config: &UpstreamConfig,
) -> Result<UpstreamStream, UpstreamError> {
    match tokio::time::timeout(config.connect_timeout(), open(server, config.verify_tls)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {} timed out", server.label()),
        ))),
    }
}

async fn open(server: &ServerEntry, verify_tls: bool) -> Result<UpstreamStream, UpstreamError> {
    let tcp = TcpStream::connect((server.host.as_str(), server.port)).await?;
    let _ = tcp.set_nodelay(true);
    if !server.tls {
        return Ok(UpstreamStream::Plain(tcp));
    }
    let tls = upgrade_to_tls(tcp, &server.host, verify_tls).await?;
    Ok(UpstreamStream::Tls(Box::new(tls)))
}

async fn upgrade_to_tls(
    tcp: TcpStream,
    hostname: &str,
    verify: bool,
) -> Result<TlsStream<TcpStream>, UpstreamError> {
    let config = if verify {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            if let Err(e) = roots.add(cert) {
                warn!(error = %e, "Failed to add root cert");
            }
        }
        for e in &native.errors {
            warn!(error = %e, "Error loading native certs");
        }
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    };

    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| UpstreamError::Tls(e.to_string()))?;
    let stream = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| UpstreamError::Tls(e.to_string()))?;

    debug!(hostname = %hostname, verify, "Upstream TLS handshake completed");
    Ok(stream)
}

/// Accepts any server certificate. Only used with `verify_tls = false`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        match CryptoProvider::get_default() {
            Some(provider) => provider
                .signature_verification_algorithms
                .supported_schemes(),
            None => tokio_rustls::rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn entry(port: u16) -> ServerEntry {
        ServerEntry {
            host: "127.0.0.1".into(),
            port,
            tls: false,
            password: None,
        }
    }

    #[tokio::test]
    async fn plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect(&entry(port), &UpstreamConfig::default()).await.unwrap();
        assert!(!stream.is_tls());
    }

    #[tokio::test]
    async fn refused_connect_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = connect(&entry(port), &UpstreamConfig::default()).await.err().unwrap();
        assert_eq!(err.error_code(), "io_error");
    }
}
