//! TLS context factory.
//!
//! Both roles connect over TLS with peer certificate validation disabled —
//! AirDrop peers present self-signed leaf certificates and Apple's own
//! implementation does the same. The receiver additionally presents its
//! certificate so the client side has something to (not) validate.
//!
//! Grounded on the teacher's `rcgen`-based `build_rustls_config` for the
//! server half and on `rvolosatovs-enarx`'s `NoopCertVerifier` for the
//! client half's `ServerCertVerifier`.

use crate::error::AirDropResult;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName};
use std::sync::Arc;
use std::time::SystemTime;

/// Accepts any peer certificate without chain or hostname validation.
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Build the server-side TLS config, presenting `leaf_cert`/`key_der`.
pub fn server_config(leaf_cert_der: Vec<u8>, key_der: Vec<u8>) -> AirDropResult<Arc<ServerConfig>> {
    let cert_chain = vec![Certificate(leaf_cert_der)];
    let key = PrivateKey(key_der);

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;

    Ok(Arc::new(config))
}

/// Build the client-side TLS config: peer cert chain validation disabled,
/// but the local leaf certificate is still presented (SPEC_FULL §4.2: "the
/// context is used both as client context and ... as server context" —
/// both roles present certificates locally even though neither validates
/// the other's).
pub fn client_config(leaf_cert_der: Vec<u8>, key_der: Vec<u8>) -> AirDropResult<Arc<ClientConfig>> {
    let cert_chain = vec![Certificate(leaf_cert_der)];
    let key = PrivateKey(key_der);

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_client_auth_cert(cert_chain, key)?;

    Ok(Arc::new(config))
}
