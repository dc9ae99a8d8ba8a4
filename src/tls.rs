use crate::error::Error;

#[derive(Clone)]
pub enum ClientCerts {
    Pem {
        cert_chain_pem: Vec<u8>,
        private_key_pem: Vec<u8>,
    },
    Pkcs12 {
        identity_der: Vec<u8>,
        password: String,
    },
}

impl ClientCerts {
    pub fn pem(cert_chain_pem: impl Into<Vec<u8>>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self::Pem {
            cert_chain_pem: cert_chain_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    pub fn pkcs12(identity_der: impl Into<Vec<u8>>, password: impl Into<String>) -> Self {
        Self::Pkcs12 {
            identity_der: identity_der.into(),
            password: password.into(),
        }
    }

    pub(crate) fn to_ureq_client_cert(&self) -> crate::Result<ureq::tls::ClientCert> {
        match self {
            Self::Pem {
                cert_chain_pem,
                private_key_pem,
            } => {
                let cert_chain = parse_pem_certificates(cert_chain_pem, "certificate chain")?;
                let private_key =
                    ureq::tls::PrivateKey::from_pem(private_key_pem).map_err(|source| {
                        tls_config_error(format!("failed to parse private key PEM: {source}"))
                    })?;
                Ok(ureq::tls::ClientCert::new_with_certs(
                    &cert_chain,
                    private_key,
                ))
            }
            Self::Pkcs12 {
                identity_der,
                password,
            } => Err(tls_config_error(format!(
                "PKCS#12 identity is unsupported by the ureq transport; use PEM cert+key (pkcs12_bytes={}, password_len={})",
                identity_der.len(),
                password.len(),
            ))),
        }
    }
}

impl std::fmt::Debug for ClientCerts {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pem { cert_chain_pem, .. } => formatter
                .debug_struct("Pem")
                .field("cert_chain_bytes", &cert_chain_pem.len())
                .finish_non_exhaustive(),
            Self::Pkcs12 { identity_der, .. } => formatter
                .debug_struct("Pkcs12")
                .field("identity_bytes", &identity_der.len())
                .finish_non_exhaustive(),
        }
    }
}

fn parse_pem_certificates(
    pem_bundle: &[u8],
    context: &str,
) -> crate::Result<Vec<ureq::tls::Certificate<'static>>> {
    let mut certificates = Vec::new();
    for item in ureq::tls::parse_pem(pem_bundle) {
        let item = item
            .map_err(|source| tls_config_error(format!("failed to parse PEM {context}: {source}")))?;
        if let ureq::tls::PemItem::Certificate(certificate) = item {
            certificates.push(certificate);
        }
    }
    if certificates.is_empty() {
        return Err(tls_config_error(format!(
            "no certificate blocks found in PEM {context}"
        )));
    }
    Ok(certificates)
}

pub(crate) fn tls_config_error(message: impl Into<String>) -> Error {
    Error::TlsConfig {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::ClientCerts;
    use crate::error::{Error, ErrorCode};

    #[test]
    fn pkcs12_identity_is_reported_as_unsupported() {
        let certs = ClientCerts::pkcs12(vec![1_u8, 2, 3], "secret");
        let error = certs
            .to_ureq_client_cert()
            .expect_err("pkcs12 should be rejected");
        assert_eq!(error.code(), ErrorCode::TlsConfig);
        match error {
            Error::TlsConfig { message } => {
                assert!(message.contains("pkcs12_bytes=3"), "{message}");
                assert!(!message.contains("secret"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let certs = ClientCerts::pem(b"not pem".to_vec(), b"not a key".to_vec());
        let error = certs
            .to_ureq_client_cert()
            .expect_err("garbage PEM should be rejected");
        assert_eq!(error.code(), ErrorCode::TlsConfig);
    }

    #[test]
    fn debug_output_hides_key_material() {
        let certs = ClientCerts::pem(b"chain".to_vec(), b"very-private".to_vec());
        let rendered = format!("{certs:?}");
        assert!(!rendered.contains("very-private"));
    }
}
