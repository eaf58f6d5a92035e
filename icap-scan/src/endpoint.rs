//! Target ICAP resource (`icap://host:port/service`).

use crate::error::IcapResult;
use crate::{DEFAULT_PORT, icap_endpoint_error};
use http::Uri;
use std::fmt;

/// Host, port and service path of an ICAP server.
///
/// Validated once on construction and never mutated afterwards, so it is safe
/// to share between tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    service: String,
}

impl Endpoint {
    pub fn new(host: &str, port: u16, service: &str) -> IcapResult<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(icap_endpoint_error!("empty host"));
        }
        if host.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
            return Err(icap_endpoint_error!("invalid character in host {host:?}"));
        }
        let host = bracket_ipv6(host);
        if port == 0 {
            return Err(icap_endpoint_error!("port must be in 1..=65535"));
        }
        let service = trim_leading_slash(service.trim());
        if service.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(icap_endpoint_error!(
                "invalid character in service {service:?}"
            ));
        }
        Ok(Self {
            host,
            port,
            service: service.to_string(),
        })
    }

    /// Parse `icap://host[:port][/service]`. The port defaults to 1344 and a
    /// missing service yields an empty one.
    pub fn from_uri(uri: &str) -> IcapResult<Self> {
        let parsed: Uri = uri
            .trim()
            .parse()
            .map_err(|e| icap_endpoint_error!("{uri}: {e}"))?;
        if parsed.scheme_str() != Some("icap") {
            return Err(icap_endpoint_error!("{uri}: URI must start with icap://"));
        }
        let host = parsed
            .host()
            .ok_or_else(|| icap_endpoint_error!("{uri}: empty host"))?;
        let port = parsed.port_u16().unwrap_or(DEFAULT_PORT);
        Self::new(host, port, parsed.path())
    }

    /// Host as written in the request line; IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host to dial: [`Endpoint::host`] without IPv6 brackets.
    pub fn connect_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "icap://{}:{}/{}", self.host, self.port, self.service)
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

fn trim_leading_slash(s: &str) -> &str {
    s.strip_prefix('/').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IcapError;
    use rstest::rstest;

    #[test]
    fn new_strips_leading_slash_from_service() {
        let ep = Endpoint::new("10.0.0.5", 1344, "/av/respmod").unwrap();
        assert_eq!(ep.service(), "av/respmod");
        assert_eq!(ep.to_string(), "icap://10.0.0.5:1344/av/respmod");
    }

    #[test]
    fn from_uri_with_port_and_service() {
        let ep = Endpoint::from_uri("icap://av.local:11344/SYMScanRespEx").unwrap();
        assert_eq!(ep.host(), "av.local");
        assert_eq!(ep.port(), 11344);
        assert_eq!(ep.service(), "SYMScanRespEx");
    }

    #[test]
    fn from_uri_defaults_port_and_service() {
        let ep = Endpoint::from_uri("icap://127.0.0.1").unwrap();
        assert_eq!(ep.port(), 1344);
        assert_eq!(ep.service(), "");
    }

    #[rstest]
    #[case("http://127.0.0.1:1344/av")]
    #[case("icap://127.0.0.1:0/av")]
    #[case("not a uri")]
    fn from_uri_rejects(#[case] uri: &str) {
        let err = Endpoint::from_uri(uri).unwrap_err();
        assert!(matches!(err, IcapError::InvalidEndpoint(_)), "{err:?}");
    }

    #[rstest]
    #[case("", 1344, "av")]
    #[case("host\r\nX-Evil: 1", 1344, "av")]
    #[case("host", 0, "av")]
    #[case("host", 1344, "av\r\nrespmod")]
    #[case("host", 1344, "av respmod")]
    fn new_rejects(#[case] host: &str, #[case] port: u16, #[case] service: &str) {
        assert!(Endpoint::new(host, port, service).is_err());
    }

    #[rstest]
    #[case::bracketed_uri("icap://[::1]:1344/av/respmod")]
    #[case::full_address("icap://[2001:db8::7]/av/respmod")]
    fn from_uri_ipv6_keeps_brackets_for_the_wire(#[case] uri: &str) {
        let ep = Endpoint::from_uri(uri).unwrap();
        assert!(ep.host().starts_with('[') && ep.host().ends_with(']'));
        assert!(!ep.connect_host().contains('['));
        assert!(ep.to_string().starts_with(&format!("icap://{}:", ep.host())));
    }

    #[test]
    fn bare_ipv6_host_is_bracketed() {
        let ep = Endpoint::new("::1", 1344, "av/respmod").unwrap();
        assert_eq!(ep.host(), "[::1]");
        assert_eq!(ep.connect_host(), "::1");
        assert_eq!(ep.to_string(), "icap://[::1]:1344/av/respmod");

        let again = Endpoint::new(ep.host(), ep.port(), ep.service()).unwrap();
        assert_eq!(again, ep);
    }

    #[test]
    fn connect_host_is_host_for_names_and_ipv4() {
        let ep = Endpoint::new("av.local", 1344, "").unwrap();
        assert_eq!(ep.connect_host(), "av.local");
        let ep = Endpoint::new("10.0.0.5", 1344, "").unwrap();
        assert_eq!(ep.connect_host(), "10.0.0.5");
    }
}
