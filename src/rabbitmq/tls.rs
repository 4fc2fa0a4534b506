// src/rabbitmq/tls.rs

use std::io::BufReader;
use std::sync::Arc;

use lapin::tcp::RustlsConnector;
use pkcs8::{Document, EncryptedPrivateKeyInfo};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::errors::{RabbitMQError, Result};
use crate::config::ConnectionParams;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Connector presenting the client certificate and trusting only the supplied CA.
pub fn tls_connector(params: &ConnectionParams) -> Result<RustlsConnector> {
    Ok(RustlsConnector::from(client_config(params)?))
}

pub fn client_config(params: &ConnectionParams) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let verifier = CaOnlyVerifier::new(&params.ca_cert, Arc::clone(&provider))?;
    let chain = parse_certificates(&params.client_cert, "client certificate")?;
    let key = decrypt_private_key(&params.client_key, &params.passphrase)?;

    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RabbitMQError::Configuration(format!("TLS protocol setup failed: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(chain, key)
        .map_err(|e| RabbitMQError::Configuration(format!("invalid client identity: {}", e)))
}

fn parse_certificates(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RabbitMQError::Configuration(format!("invalid {} PEM: {}", what, e)))?;

    if certs.is_empty() {
        return Err(RabbitMQError::Configuration(format!(
            "no certificate found in {}",
            what
        )));
    }
    Ok(certs)
}

/// Loads the client key. Encrypted PKCS#8 keys are opened with `passphrase`;
/// plain keys ignore it.
pub fn decrypt_private_key(pem: &str, passphrase: &str) -> Result<PrivateKeyDer<'static>> {
    if !pem.contains(ENCRYPTED_KEY_LABEL) {
        return rustls_pemfile::private_key(&mut BufReader::new(pem.as_bytes()))
            .map_err(|e| RabbitMQError::Configuration(format!("invalid private key PEM: {}", e)))?
            .ok_or_else(|| RabbitMQError::Configuration("no private key found".to_string()));
    }

    let (_, document) = Document::from_pem(pem)
        .map_err(|e| RabbitMQError::Configuration(format!("invalid private key PEM: {}", e)))?;

    let encrypted = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| RabbitMQError::Configuration(format!("invalid encrypted private key: {}", e)))?;

    let decrypted = encrypted.decrypt(passphrase).map_err(|e| {
        RabbitMQError::Configuration(format!("cannot decrypt private key: {}", e))
    })?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        decrypted.as_bytes().to_vec(),
    )))
}

/// Checks the broker chain against the supplied CA but accepts any host name.
#[derive(Debug)]
struct CaOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl CaOnlyVerifier {
    fn new(ca_pem: &str, provider: Arc<CryptoProvider>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(ca_pem, "CA certificate")? {
            roots
                .add(cert)
                .map_err(|e| RabbitMQError::Configuration(format!("invalid CA certificate: {}", e)))?;
        }

        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| RabbitMQError::Configuration(format!("cannot build verifier: {}", e)))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for CaOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // The name is checked after the chain, so a name mismatch means the chain is trusted.
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
