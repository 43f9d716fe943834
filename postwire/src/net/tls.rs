//! Encryption upgrade before startup.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-SSL>
use bytes::BytesMut;
use std::{fmt, io, path::Path, sync::Arc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, ServerName, UnixTime, pem::PemObject},
};
use tokio_rustls::TlsConnector;

use super::Socket;
use crate::{Result, common::verbose, postgres::frontend::SslRequest};

/// TLS parameters used for the handshake.
#[derive(Debug, Clone, Copy)]
pub struct TlsConfig<'a> {
    /// Server name to verify the certificate against.
    pub host: &'a str,
    /// Skip certificate chain and hostname verification.
    pub accept_invalid_certs: bool,
    /// Additional PEM encoded root certificates.
    pub root_cert: Option<&'a Path>,
    pub verbose: bool,
}

/// Upgrade `socket` to TLS.
///
/// If `socket` is already encrypted, it is returned as is.
///
/// Otherwise an `SSLRequest` is sent, and the backend responds with a single byte,
/// `S` to proceed with the handshake, or `N` to decline.
pub async fn negotiate(mut socket: Socket, config: TlsConfig<'_>) -> Result<Socket> {
    if socket.is_tls() {
        verbose!(config.verbose, "stream already encrypted, skip SSLRequest");
        return Ok(socket);
    }

    let mut buf = BytesMut::with_capacity(8);
    SslRequest.write(&mut buf)?;
    socket.write_all_buf(&mut buf).await?;
    socket.flush().await?;

    match socket.read_u8().await? {
        b'S' => {}
        b'N' => return Err(TlsError::Declined.into()),
        other => return Err(TlsError::UnexpectedResponse(other).into()),
    }

    verbose!(config.verbose, host = config.host, "backend accepted SSLRequest");

    handshake(socket, config).await
}

async fn handshake(socket: Socket, config: TlsConfig<'_>) -> Result<Socket> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(TlsError::Rustls)?;

    let client = if config.accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = config.root_cert {
            let pem = tokio::fs::read(path).await?;
            for cert in CertificateDer::pem_slice_iter(&pem) {
                let cert = cert.map_err(|e| TlsError::RootCert(e.to_string()))?;
                roots.add(cert).map_err(TlsError::Rustls)?;
            }
        }

        builder.with_root_certificates(roots).with_no_client_auth()
    };

    let server_name = ServerName::try_from(config.host.to_owned())
        .map_err(|_| TlsError::InvalidServerName(config.host.to_owned()))?;

    let stream = TlsConnector::from(Arc::new(client))
        .connect(server_name, socket)
        .await
        .map_err(TlsError::Handshake)?;

    Ok(Socket::tls(stream))
}

/// Accept any certificate, still checking handshake signatures.
#[derive(Debug)]
struct NoCertificateVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// An error when negotiating encryption.
pub enum TlsError {
    /// Backend responded `N` to `SSLRequest`.
    Declined,
    /// Backend responded with neither `S` nor `N`.
    UnexpectedResponse(u8),
    /// Host is not a valid DNS name or IP address.
    InvalidServerName(String),
    /// Root certificate file is not valid PEM.
    RootCert(String),
    Rustls(rustls::Error),
    /// TLS handshake failed.
    Handshake(io::Error),
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rustls(e) => Some(e),
            Self::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tls negotiation failed, ")?;
        match self {
            Self::Declined => f.write_str("server does not support TLS"),
            Self::UnexpectedResponse(b) => write!(f, "unexpected SSLRequest response {:?}", *b as char),
            Self::InvalidServerName(host) => write!(f, "invalid server name {host:?}"),
            Self::RootCert(e) => write!(f, "invalid root certificate: {e}"),
            Self::Rustls(e) => write!(f, "{e}"),
            Self::Handshake(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
