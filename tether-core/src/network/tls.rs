//! Client-side TLS setup.
//!
//! The server certificate must chain to the CA file from the settings and be
//! valid for the configured peer name. With `allow-self-signed`, a
//! certificate that does not chain to the CA file is still accepted when it
//! verifies as its own issuer for that peer name.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::Settings;
use crate::error::SocketError;
use crate::network::Dialer;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Read every certificate from a PEM file into a root store.
pub fn load_roots(path: &Path) -> Result<RootCertStore, SocketError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            SocketError::Configuration(format!(
                "cannot read certificate {}: {e}",
                path.display()
            ))
        })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(SocketError::Configuration(format!(
            "no usable certificate in {} ({ignored} ignored)",
            path.display()
        )));
    }
    Ok(roots)
}

/// Build the rustls client configuration for `settings`.
pub fn client_config(settings: &Settings) -> Result<Arc<ClientConfig>, SocketError> {
    let roots = load_roots(&settings.ca_path())?;
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = if settings.allow_self_signed {
        let verifier = SelfSignedAware::new(roots, provider)?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth()
    } else {
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Opens TLS connections to the control node.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    addr: String,
}

impl TlsDialer {
    pub fn new(settings: &Settings) -> Result<Self, SocketError> {
        let server_name = ServerName::try_from(settings.peer_name().to_string()).map_err(|e| {
            SocketError::Configuration(format!("invalid peer name {}: {e}", settings.peer_name()))
        })?;

        Ok(Self {
            connector: TlsConnector::from(client_config(settings)?),
            server_name,
            addr: settings.address(),
        })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    type Stream = TlsStream<TcpStream>;

    fn addr(&self) -> &str {
        &self.addr
    }

    /// TCP connect then TLS handshake.
    async fn dial(&self) -> Result<TlsStream<TcpStream>, SocketError> {
        let tcp = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| SocketError::from_connect(&self.addr, e))?;
        tcp.set_nodelay(true)?;

        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| SocketError::ConnectFault {
                addr: self.addr.clone(),
                reason: format!("tls handshake failed: {e}"),
            })
    }
}

// ── SelfSignedAware ──────────────────────────────────────────────

/// CA verification first; a self-issued certificate as the fallback.
#[derive(Debug)]
struct SelfSignedAware {
    inner: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
}

impl SelfSignedAware {
    fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Result<Self, SocketError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| SocketError::Configuration(format!("certificate verifier: {e}")))?;
        Ok(Self { inner, provider })
    }

    fn verify_self_issued(
        &self,
        end_entity: &CertificateDer<'_>,
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let mut own = RootCertStore::empty();
        own.add(end_entity.clone().into_owned())?;
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(own), self.provider.clone())
            .build()
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        verifier.verify_server_cert(end_entity, &[], server_name, &[], now)
    }
}

impl ServerCertVerifier for SelfSignedAware {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            // The fallback re-checks the name, so a wrong peer stays rejected.
            Err(e) => self
                .verify_self_issued(end_entity, server_name, now)
                .map_err(|_| e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(name: &str) -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap()
    }

    fn settings_with_ca(dir: &Path, pem: &str) -> Settings {
        std::fs::write(dir.join("ca.crt"), pem).unwrap();
        let mut settings = Settings::default().with_base_dir(dir);
        settings.certificate = "ca.crt".into();
        settings.peer_name = Some("localhost".into());
        settings
    }

    #[test]
    fn loads_roots_from_pem() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed("localhost");
        let settings = settings_with_ca(dir.path(), &cert.cert.pem());
        assert_eq!(load_roots(&settings.ca_path()).unwrap().len(), 1);
    }

    #[test]
    fn missing_ca_file_is_a_configuration_error() {
        let settings = Settings::default().with_base_dir("/nonexistent");
        assert!(matches!(
            client_config(&settings),
            Err(SocketError::Configuration(_))
        ));
    }

    #[test]
    fn dialer_builds_for_both_verification_modes() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed("localhost");
        let mut settings = settings_with_ca(dir.path(), &cert.cert.pem());
        assert!(TlsDialer::new(&settings).is_ok());

        settings.allow_self_signed = true;
        let dialer = TlsDialer::new(&settings).unwrap();
        assert_eq!(dialer.addr(), "127.0.0.1:8443");
    }

    #[test]
    fn self_issued_fallback_accepts_its_own_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let trusted = self_signed("localhost");
        let stranger = self_signed("localhost");
        let settings = settings_with_ca(dir.path(), &trusted.cert.pem());

        let verifier = SelfSignedAware::new(load_roots(&settings.ca_path()).unwrap(), provider()).unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        let result = verifier.verify_server_cert(stranger.cert.der(), &[], &name, &[], UnixTime::now());
        assert!(result.is_ok());

        let wrong_name = ServerName::try_from("elsewhere.example").unwrap();
        let result =
            verifier.verify_server_cert(stranger.cert.der(), &[], &wrong_name, &[], UnixTime::now());
        assert!(result.is_err());
    }
}
