//! Listener configuration and response header validation.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header::CONTENT_TYPE};
use serde::Deserialize;

use crate::error::ConfigError;

/// Content type sent when the operator configured none.
pub const DEFAULT_CONTENT_TYPE: &str = "*/*";

/// Operator-supplied listener settings.
///
/// Deserialisable from any serde source; the binary reads it from
/// `OUTPOST_*` environment variables via `envy`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Unique listener name. Required.
    #[serde(default)]
    pub name: String,

    /// Host names the listener answers for; also the certificate SANs.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Interface to bind. Defaults to the first host.
    #[serde(default)]
    pub host_bind: Option<String>,

    /// TCP port. `0` asks the OS for an ephemeral port.
    #[serde(default)]
    pub port: Option<u16>,

    /// URIs agents are configured with. Informational only: every POST path
    /// reaches the dispatcher.
    #[serde(default)]
    pub uris: Vec<String>,

    /// Serve HTTPS with a generated self-signed certificate.
    #[serde(default)]
    pub secure: bool,

    /// Extra static response headers, `"Key: Value"`.
    #[serde(default)]
    pub headers: Vec<String>,
}

impl ListenerConfig {
    /// True when at least one non-empty host is configured.
    pub fn has_hosts(&self) -> bool {
        self.hosts.iter().any(|h| !h.is_empty())
    }

    /// Bind host, falling back to the first advertised host.
    pub fn bind_host(&self) -> Option<&str> {
        self.host_bind
            .as_deref()
            .filter(|h| !h.is_empty())
            .or_else(|| self.hosts.iter().map(String::as_str).find(|h| !h.is_empty()))
    }
}

/// Static response headers, parsed once at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseHeaders {
    /// Parse `"Key: Value"` strings, splitting on the first colon.
    ///
    /// A `Content-type: */*` entry is prepended unless one is configured.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(raw.len() + 1);
        for header in raw {
            entries.push(parse_header(header.as_ref())?);
        }

        if !entries.iter().any(|(name, _)| *name == CONTENT_TYPE) {
            entries.insert(
                0,
                (CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
            );
        }

        Ok(Self { entries })
    }

    /// Headers in configuration order; a later entry replaces an earlier
    /// one with the same name.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.clone());
        }
        map
    }

    /// Back to the `"Key: Value"` form observers see.
    pub fn to_strings(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or_default()))
            .collect()
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::MalformedHeader(raw.to_string()))?;

    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| ConfigError::InvalidHeaderName(raw.to_string()))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|_| ConfigError::InvalidHeaderValue(raw.to_string()))?;

    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_content_type_is_prepended() {
        let headers = ResponseHeaders::parse(&["Server: nginx"]).unwrap();
        assert_eq!(
            headers.to_strings(),
            vec!["content-type: */*".to_string(), "server: nginx".to_string()]
        );
    }

    #[test]
    fn configured_content_type_is_kept() {
        let headers = ResponseHeaders::parse(&["Content-Type: text/html"]).unwrap();
        let map = headers.to_header_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn value_may_contain_colons() {
        let headers = ResponseHeaders::parse(&["X-Upstream: 10.0.0.1:8080"]).unwrap();
        assert_eq!(headers.to_header_map()["x-upstream"], "10.0.0.1:8080");
    }

    #[test]
    fn header_without_colon_fails_fast() {
        assert!(matches!(
            ResponseHeaders::parse(&["Server nginx"]),
            Err(ConfigError::MalformedHeader(_))
        ));
    }

    #[test]
    fn header_with_invalid_name_fails_fast() {
        assert!(matches!(
            ResponseHeaders::parse(&["Bad Name: x"]),
            Err(ConfigError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn bind_host_falls_back_to_first_host() {
        let mut config = ListenerConfig {
            hosts: vec!["c2.example.com".into(), "10.0.0.1".into()],
            ..ListenerConfig::default()
        };
        assert_eq!(config.bind_host(), Some("c2.example.com"));
        config.host_bind = Some("0.0.0.0".into());
        assert_eq!(config.bind_host(), Some("0.0.0.0"));
    }
}
