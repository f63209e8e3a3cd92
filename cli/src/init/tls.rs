//! Transport hardening for every init request that carries credentials.

use std::time::Duration;

use url::Url;

use crate::init::error::InitError;

/// Client-side TLS settings requested for init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub accept_invalid_certs: bool,
}

/// Fail closed when certificate verification is off.
pub fn ensure_secure_transport(settings: &TlsSettings) -> Result<(), InitError> {
    if settings.accept_invalid_certs {
        return Err(InitError::security(
            "TLS certificate verification is disabled; refusing to send credentials",
        ));
    }
    Ok(())
}

/// Checks `settings`, then builds a client pinned to TLS 1.2 or newer with
/// certificate validation on.
pub fn hardened_client(settings: &TlsSettings, connect_timeout: Duration) -> Result<reqwest::Client, InitError> {
    ensure_secure_transport(settings)?;
    reqwest::Client::builder()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .danger_accept_invalid_certs(false)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| {
            InitError::security("failed to build a TLS-enforcing HTTP client")
                .with_cause(e)
        })
}

/// Plain HTTP is tolerated for loopback backends only; anything else gets a
/// warning line.
pub fn plain_http_warning(url: &Url) -> Option<String> {
    if url.scheme() != "http" {
        return None;
    }
    let loopback = match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    if loopback {
        None
    } else {
        Some(format!(
            "{url} uses plain HTTP; your password and token will travel unencrypted"
        ))
    }
}
