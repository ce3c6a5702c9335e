//! WebSocket dialing, including the no-verify TLS mode used against
//! collectors with self-signed certificates.

use std::sync::Arc;

use tokio_tungstenite::{connect_async, connect_async_tls_with_config, Connector};
use tracing::debug;

use super::WsStream;

#[derive(Debug, thiserror::Error)]
#[error("connect failed: {0}")]
pub struct DialError(pub String);

/// Open a WebSocket to `url`.
///
/// `ssl_verify = false` only matters for `wss://` URLs: certificate and
/// hostname verification are skipped entirely.
pub async fn dial(url: &str, ssl: bool, ssl_verify: bool) -> Result<WsStream, DialError> {
    if ssl && !ssl_verify {
        debug!(url, "dialing with certificate verification disabled");
        let tls = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify::new()))
            .with_no_client_auth();
        let (ws, _response) =
            connect_async_tls_with_config(url, None, false, Some(Connector::Rustls(Arc::new(tls))))
                .await
                .map_err(|e| DialError(e.to_string()))?;
        Ok(ws)
    } else {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| DialError(e.to_string()))?;
        Ok(ws)
    }
}

// ---------------------------------------------------------------------------
// Certificate verifier that accepts everything (self-signed environments)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct NoVerify {
    provider: rustls::crypto::CryptoProvider,
}

impl NoVerify {
    fn new() -> Self {
        NoVerify {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
