//! Pure connection option building for the rumqttc transport
//!
//! Turns a [`SessionConfig`] into rumqttc options for either protocol
//! version, including the TLS transport.

use crate::config::{SessionConfig, TlsSection};
use crate::protocol::QoS;
use crate::transport::TransportError;
use rumqttc::tokio_rustls::rustls;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;

/// Options for an MQTT 3.1.1 connection
pub fn build_v4_options(
    config: &SessionConfig,
    clean_session: bool,
) -> Result<rumqttc::MqttOptions, TransportError> {
    let broker = &config.broker;
    let mut options = rumqttc::MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(clean_session);

    if let Some((username, password)) = resolve_credentials(config)? {
        options.set_credentials(username, password);
    }
    if let Some(transport) = build_tls_transport(&config.tls) {
        options.set_transport(transport);
    }

    Ok(options)
}

/// Options for an MQTT 5 connection
pub fn build_v5_options(
    config: &SessionConfig,
    clean_start: bool,
) -> Result<rumqttc::v5::MqttOptions, TransportError> {
    let broker = &config.broker;
    let mut options =
        rumqttc::v5::MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_start(clean_start);

    if let Some((username, password)) = resolve_credentials(config)? {
        options.set_credentials(username, password);
    }
    if let Some(transport) = build_tls_transport(&config.tls) {
        options.set_transport(transport);
    }

    Ok(options)
}

fn resolve_credentials(config: &SessionConfig) -> Result<Option<(String, String)>, TransportError> {
    config
        .credentials()
        .map_err(|e| TransportError::Connection(format!("Cannot resolve credentials: {e}")))
}

/// TLS transport for the configured policy; `None` means plain TCP
pub fn build_tls_transport(tls: &TlsSection) -> Option<RumqttcTransport> {
    if !tls.enabled {
        return None;
    }

    if tls.verify_certificate {
        return Some(RumqttcTransport::tls_with_default_config());
    }

    let client_config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    Some(RumqttcTransport::tls_with_config(TlsConfiguration::Rustls(
        Arc::new(client_config),
    )))
}

/// Certificate verifier that accepts every server certificate
///
/// Only used when `tls.verify_certificate = false`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
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
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

pub fn to_v4_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub fn from_v4_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn to_v5_qos(qos: QoS) -> rumqttc::v5::mqttbytes::QoS {
    use rumqttc::v5::mqttbytes::QoS as V5QoS;
    match qos {
        QoS::AtMostOnce => V5QoS::AtMostOnce,
        QoS::AtLeastOnce => V5QoS::AtLeastOnce,
        QoS::ExactlyOnce => V5QoS::ExactlyOnce,
    }
}

pub fn from_v5_qos(qos: rumqttc::v5::mqttbytes::QoS) -> QoS {
    use rumqttc::v5::mqttbytes::QoS as V5QoS;
    match qos {
        V5QoS::AtMostOnce => QoS::AtMostOnce,
        V5QoS::AtLeastOnce => QoS::AtLeastOnce,
        V5QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}
