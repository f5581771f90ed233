use std::sync::Arc;

use lapin::tcp::RustlsConnector;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{info, warn};

use super::errors::{RabbitMQError, Result};

/// PEM-encoded TLS inputs. An empty `ca_cert` means plaintext.
#[derive(Clone, Default)]
pub struct TlsMaterial {
    pub ca_cert: Vec<u8>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert_len", &self.ca_cert.len())
            .field("client_cert", &self.client_cert.is_some())
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TlsMaterial {
    pub fn server_only(ca_cert: impl Into<Vec<u8>>) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            ..Self::default()
        }
    }

    pub fn mutual(
        ca_cert: impl Into<Vec<u8>>,
        client_cert: impl Into<Vec<u8>>,
        client_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            client_cert: Some(client_cert.into()),
            client_key: Some(client_key.into()),
        }
    }
}

/// Transport security chosen for a dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    Plain,
    ServerAuth {
        ca_pem: String,
    },
    MutualAuth {
        ca_pem: String,
        cert_pem: Vec<u8>,
        key_pem: Vec<u8>,
    },
}

fn non_empty(bytes: &Option<Vec<u8>>) -> Option<&[u8]> {
    bytes.as_deref().filter(|b| !b.is_empty())
}

/// Picks the transport mode and checks that the PEM blocks parse before dialing.
pub fn resolve(material: Option<&TlsMaterial>) -> Result<TlsMode> {
    let Some(material) = material else {
        return Ok(TlsMode::Plain);
    };

    if material.ca_cert.is_empty() {
        if material.client_cert.is_some() || material.client_key.is_some() {
            warn!("client certificate configured without a CA certificate; using plaintext");
        }
        return Ok(TlsMode::Plain);
    }

    info!("config server ca certificate");
    let ca_pem = String::from_utf8(material.ca_cert.clone())
        .map_err(|e| RabbitMQError::TlsError(format!("CA certificate is not valid UTF-8: {e}")))?;
    let ca_count = parse_certificates(material.ca_cert.as_slice(), "CA certificate")?;
    if ca_count == 0 {
        return Err(RabbitMQError::TlsError(
            "CA certificate contains no PEM certificate".to_string(),
        ));
    }

    match (non_empty(&material.client_cert), non_empty(&material.client_key)) {
        (Some(cert), Some(key)) => {
            info!("config client certificate");
            if parse_certificates(cert, "client certificate")? == 0 {
                return Err(RabbitMQError::TlsError(
                    "client certificate contains no PEM certificate".to_string(),
                ));
            }
            PrivateKeyDer::from_pem_slice(key)
                .map_err(|e| RabbitMQError::TlsError(format!("client key: {e:?}")))?;
            Ok(TlsMode::MutualAuth {
                ca_pem,
                cert_pem: cert.to_vec(),
                key_pem: key.to_vec(),
            })
        }
        (None, None) => Ok(TlsMode::ServerAuth { ca_pem }),
        _ => {
            warn!("client certificate and key must both be set; client authentication disabled");
            Ok(TlsMode::ServerAuth { ca_pem })
        }
    }
}

fn parse_certificates(pem: &[u8], what: &str) -> Result<usize> {
    CertificateDer::pem_slice_iter(pem)
        .try_fold(0, |count, cert| cert.map(|_| count + 1))
        .map_err(|e| RabbitMQError::TlsError(format!("{what}: {e:?}")))
}

fn certificates(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RabbitMQError::TlsError(format!("{what}: {e:?}")))
}

impl TlsMode {
    /// rustls client configuration for this mode; `None` for plaintext.
    ///
    /// Trusts only the configured CA. Uses the ring provider explicitly, so no
    /// process-wide default provider has to be installed.
    pub fn client_config(&self) -> Result<Option<ClientConfig>> {
        let (ca_pem, identity) = match self {
            TlsMode::Plain => return Ok(None),
            TlsMode::ServerAuth { ca_pem } => (ca_pem, None),
            TlsMode::MutualAuth {
                ca_pem,
                cert_pem,
                key_pem,
            } => (ca_pem, Some((cert_pem, key_pem))),
        };

        let mut roots = RootCertStore::empty();
        let (added, ignored) =
            roots.add_parsable_certificates(certificates(ca_pem.as_bytes(), "CA certificate")?);
        if ignored > 0 {
            warn!(ignored, "some CA certificates could not be used");
        }
        if added == 0 {
            return Err(RabbitMQError::TlsError(
                "CA certificate contains no usable certificate".to_string(),
            ));
        }

        let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| RabbitMQError::TlsError(e.to_string()))?
            .with_root_certificates(roots);

        let config = match identity {
            None => builder.with_no_client_auth(),
            Some((cert_pem, key_pem)) => {
                let chain = certificates(cert_pem, "client certificate")?;
                let key = PrivateKeyDer::from_pem_slice(key_pem)
                    .map_err(|e| RabbitMQError::TlsError(format!("client key: {e:?}")))?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| RabbitMQError::TlsError(format!("client certificate: {e}")))?
            }
        };
        Ok(Some(config))
    }

    pub fn connector(&self) -> Result<Option<RustlsConnector>> {
        Ok(self.client_config()?.map(RustlsConnector::from))
    }
}
