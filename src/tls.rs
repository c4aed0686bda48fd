//! TLS client configuration for the two outbound TLS connections this
//! process makes: the camera video socket (spec.md §6) and the remote
//! detector's streaming RPC (spec.md §4.1.2). Both pin a server
//! certificate rather than validating a chain/hostname — "no hostname
//! verification; the cert is pinned via config" per spec.md §4.1.2 — so
//! this implements a minimal `rustls` `ServerCertVerifier` that accepts
//! only a byte-exact match against the configured certificate.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;

#[derive(Debug)]
struct PinnedCertVerifier {
    pinned: Vec<u8>,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "server certificate did not match pinned certificate".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

/// Parse a PEM-encoded certificate (as persisted in config, spec.md §3)
/// into its DER bytes, for use by `pinned_client_config`.
pub fn pem_to_der(pem: &str) -> anyhow::Result<Vec<u8>> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader).collect::<Result<_, _>>()?;
    certs
        .into_iter()
        .next()
        .map(|c| c.as_ref().to_vec())
        .ok_or_else(|| anyhow::anyhow!("no certificate found in PEM"))
}

/// A `rustls::ClientConfig` that accepts exactly one pinned certificate
/// and nothing else — used by the remote detector.
pub fn pinned_client_config(pinned_der: Vec<u8>) -> Arc<ClientConfig> {
    let verifier = PinnedCertVerifier { pinned: pinned_der };
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_verifier_rejects_non_matching_cert() {
        let verifier = PinnedCertVerifier {
            pinned: vec![1, 2, 3],
        };
        let wrong = CertificateDer::from(vec![4, 5, 6]);
        let name = ServerName::try_from("example.com").unwrap();
        let result = verifier.verify_server_cert(&wrong, &[], &name, &[], UnixTime::now());
        assert!(result.is_err());
    }

    #[test]
    fn pinned_verifier_accepts_matching_cert() {
        let verifier = PinnedCertVerifier {
            pinned: vec![1, 2, 3],
        };
        let right = CertificateDer::from(vec![1, 2, 3]);
        let name = ServerName::try_from("example.com").unwrap();
        let result = verifier.verify_server_cert(&right, &[], &name, &[], UnixTime::now());
        assert!(result.is_ok());
    }
}
