//! Pure option translation for the MQTT client
//!
//! Maps caller-facing [`ConnectionOptions`] and an optional [`WillMessage`]
//! onto [`NativeOptions`], applying defaults for unset timeouts and
//! generating a client id when none was given.

use crate::error::AdapterError;
use crate::protocol::{ConnectionOptions, ConnectionType, ProtocolVersion, WillMessage};
use crate::transport::{
    BrokerEndpoint, NativeMessage, NativeOptions, NativeProtocolVersion, TlsSettings,
};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Communication timeout used when the caller leaves it at zero
pub const DEFAULT_COMMUNICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Keep-alive period used when the caller leaves it at zero
pub const DEFAULT_KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(5);

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// Translate connection options into the client's native representation
///
/// Called once per connection attempt, so a generated client id is fresh
/// for every attempt.
pub fn translate_options(
    options: &ConnectionOptions,
    will: Option<&WillMessage>,
) -> Result<NativeOptions, AdapterError> {
    let endpoint = resolve_endpoint(options)?;
    let protocol_version = translate_protocol_version(options.protocol_version)?;

    let client_id = options
        .client_id
        .clone()
        .unwrap_or_else(generate_client_id);

    let credentials = options.credentials.as_ref().map(|credentials| {
        (
            credentials.username.clone(),
            credentials.password.clone().unwrap_or_default(),
        )
    });

    let tls = TlsSettings {
        enabled: uses_tls(options),
        allow_untrusted_certificates: options.allow_untrusted_certificates,
        ignore_certificate_chain_errors: options.ignore_certificate_chain_errors,
        ignore_certificate_revocation_errors: options.ignore_certificate_chain_errors,
        certificates: options.certificates.clone(),
    };

    let native = NativeOptions {
        endpoint,
        client_id,
        clean_session: options.clean_session,
        credentials,
        tls,
        protocol_version,
        communication_timeout: or_default(
            options.communication_timeout,
            DEFAULT_COMMUNICATION_TIMEOUT,
        ),
        keep_alive: or_default(options.keep_alive_period, DEFAULT_KEEP_ALIVE_PERIOD),
        will: translate_will(will),
    };

    debug!(
        client_id = %native.client_id,
        endpoint = ?native.endpoint,
        "Translated connection options"
    );
    Ok(native)
}

/// Build the native last-will message; `None` means no will is registered
pub fn translate_will(will: Option<&WillMessage>) -> Option<NativeMessage> {
    will.map(|will| NativeMessage {
        topic: will.topic.clone(),
        payload: will.payload.clone(),
        qos: will.qos.as_u8(),
        retain: will.retain,
    })
}

/// Map the caller's protocol version; only 3.1 and 3.1.1 are supported
pub fn translate_protocol_version(
    version: ProtocolVersion,
) -> Result<NativeProtocolVersion, AdapterError> {
    match version {
        ProtocolVersion::V310 => Ok(NativeProtocolVersion::V310),
        ProtocolVersion::V311 => Ok(NativeProtocolVersion::V311),
        other => Err(AdapterError::UnsupportedProtocolVersion(
            other.as_str().to_string(),
        )),
    }
}

/// Fresh random client id: a v4 UUID without separators
pub fn generate_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

fn resolve_endpoint(options: &ConnectionOptions) -> Result<BrokerEndpoint, AdapterError> {
    match options.connection_type {
        ConnectionType::Tcp => {
            let host = options
                .uri
                .host_str()
                .ok_or_else(|| AdapterError::InvalidBrokerUri(options.uri.to_string()))?;
            let port = options.uri.port().unwrap_or(if is_tls_scheme(options.uri.scheme()) {
                DEFAULT_TLS_PORT
            } else {
                DEFAULT_PORT
            });
            Ok(BrokerEndpoint::Tcp {
                host: host.to_string(),
                port,
            })
        }
        ConnectionType::WebSocket => Ok(BrokerEndpoint::WebSocket {
            url: options.uri.as_str().to_string(),
        }),
    }
}

fn is_tls_scheme(scheme: &str) -> bool {
    matches!(scheme, "mqtts" | "ssl" | "tls" | "wss")
}

fn uses_tls(options: &ConnectionOptions) -> bool {
    is_tls_scheme(options.uri.scheme())
        || !options.certificates.is_empty()
        || options.allow_untrusted_certificates
        || options.ignore_certificate_chain_errors
}
