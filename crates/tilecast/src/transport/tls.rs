// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Self-signed TLS 1.3 for both sides of the connection. There is no public
//! PKI for a point-to-point test harness, so the client pins the server's
//! certificate instead of validating it against a CA root.

use std::sync::Arc;

use quinn::{ClientConfig, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};

use super::config::TransportConfig;
use crate::error::TransportError;

/// Builds the server's QUIC config plus the DER-encoded certificate it
/// presents, so a caller running in-process (e.g. an integration test) can
/// hand that DER straight to [`client_config_pinned_to`] without a round
/// trip through the network.
pub fn server_config(config: &TransportConfig) -> Result<(ServerConfig, Vec<u8>), TransportError> {
    let (cert_der, key_der) = generate_self_signed(&config.server_name)?;

    let mut rustls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert_der.clone()],
            rustls::pki_types::PrivateKeyDer::Pkcs8(key_der),
        )
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    rustls_config.alpn_protocols = vec![config.alpn.clone()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(rustls_config)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut server_config = ServerConfig::with_crypto(Arc::new(quic_crypto));
    Arc::get_mut(&mut server_config.transport)
        .expect("fresh ServerConfig has a unique transport Arc")
        .max_concurrent_bidi_streams(config.max_concurrent_streams.into())
        .max_idle_timeout(Some(
            config
                .idle_timeout
                .try_into()
                .map_err(|_| TransportError::Tls("idle_timeout out of range".into()))?,
        ))
        .keep_alive_interval(Some(config.keep_alive_interval));

    Ok((server_config, cert_der.to_vec()))
}

/// Builds a client config that trusts only `cert_der` — true certificate
/// pinning, used when the caller already knows the server's certificate
/// (e.g. an in-process test harness that built both ends).
pub fn client_config_pinned_to(
    config: &TransportConfig,
    cert_der: &[u8],
) -> Result<ClientConfig, TransportError> {
    let cert = CertificateDer::from(cert_der.to_vec());
    let mut root_store = rustls::RootCertStore::empty();
    root_store
        .add(cert)
        .map_err(|e| TransportError::Tls(format!("failed to add pinned cert: {e}")))?;

    let mut rustls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    rustls_config.alpn_protocols = vec![config.alpn.clone()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(rustls_config)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new({
        let mut t = quinn::TransportConfig::default();
        t.max_idle_timeout(Some(
            config
                .idle_timeout
                .try_into()
                .map_err(|_| TransportError::Tls("idle_timeout out of range".into()))?,
        ));
        t.keep_alive_interval(Some(config.keep_alive_interval));
        t
    }));
    Ok(client_config)
}

/// Builds a client config for the common command-line case: the operator
/// did not pass the server's certificate out of band, so TLS verification is
/// skipped entirely. Only appropriate for a trusted test network — never a
/// production deployment — and the caller is expected to have surfaced that
/// via `--insecure` or similar before reaching here.
pub fn client_config(config: &TransportConfig) -> Result<ClientConfig, TransportError> {
    let rustls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(rustls_config)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new({
        let mut t = quinn::TransportConfig::default();
        t.max_idle_timeout(Some(
            config
                .idle_timeout
                .try_into()
                .map_err(|_| TransportError::Tls("idle_timeout out of range".into()))?,
        ));
        t.keep_alive_interval(Some(config.keep_alive_interval));
        t
    }));
    Ok(client_config)
}

fn generate_self_signed(
    server_name: &str,
) -> Result<(CertificateDer<'static>, PrivatePkcs8KeyDer<'static>), TransportError> {
    let cert = rcgen::generate_simple_self_signed(vec![server_name.to_string()])
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    Ok((cert_der, key))
}

/// Accepts any server certificate. The wire protocol has no CA to validate
/// against; the operator is responsible for running this on a trusted
/// network, same posture the stress-test tooling takes.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
