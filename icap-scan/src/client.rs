use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::{IcapError, IcapResult};
use crate::net::{Connector, RetryPolicy, TcpConnector, Transport};
use crate::request::{DEFAULT_DISPLAY_NAME, ScanRequest, encode_options, encode_respmod};
use crate::response::RawIcapResponse;
use crate::vendor::{EngineVersion, Vendor, Verdict};
use crate::{DEFAULT_PORT, icap_config_error};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// ICAP scanning client bound to one endpoint and one vendor.
///
/// Cheap to clone; clones share the endpoint. Every call opens its own
/// connection(s), so a client can be used from many tasks at once.
#[derive(Debug)]
pub struct Client<C = TcpConnector> {
    inner: Arc<ClientRef<C>>,
}

#[derive(Debug)]
struct ClientRef<C> {
    endpoint: Endpoint,
    vendor: Vendor,
    transport: Transport<C>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client for `icap://host[:port]/service` with default settings.
    pub fn from_uri(uri: &str, vendor: Vendor) -> IcapResult<Self> {
        ClientBuilder::new().from_uri(uri)?.vendor(vendor).build()
    }
}

impl<C: Connector> Client<C> {
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn vendor(&self) -> Vendor {
        self.inner.vendor
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.inner.transport.policy()
    }

    /// Raw bytes of the RESPMOD request that [`Client::scan_request`] would send.
    pub fn respmod_bytes(&self, req: &ScanRequest) -> Vec<u8> {
        encode_respmod(&self.inner.endpoint, req)
    }

    /// Submit `payload` for scanning under `display_name`.
    pub async fn scan(
        &self,
        payload: impl Into<Vec<u8>>,
        display_name: &str,
    ) -> IcapResult<RawIcapResponse> {
        self.scan_request(ScanRequest::new(payload, display_name))
            .await
    }

    pub async fn scan_request(&self, req: ScanRequest) -> IcapResult<RawIcapResponse> {
        debug!(
            "scan: {} bytes as {:?} -> {}",
            req.payload().len(),
            req.display_name(),
            self.inner.endpoint
        );
        let wire = encode_respmod(&self.inner.endpoint, &req);
        drop(req);
        self.inner.transport.send(&self.inner.endpoint, &wire).await
    }

    /// Read a local file and scan it under its base name.
    pub async fn scan_file(&self, path: impl AsRef<Path>) -> IcapResult<RawIcapResponse> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        self.scan(data, &name).await
    }

    /// Send `OPTIONS` and require an `ICAP/1.0 200` status line.
    pub async fn query_options(&self) -> IcapResult<RawIcapResponse> {
        let wire = encode_options(&self.inner.endpoint);
        let response = self.inner.transport.send(&self.inner.endpoint, &wire).await?;
        check_options_response(response)
    }

    /// Engine version as advertised in the `OPTIONS` answer.
    pub async fn engine_version(&self) -> IcapResult<EngineVersion> {
        let options = self.query_options().await?;
        Ok(self.inner.vendor.engine_version(&options))
    }

    /// Interpret a RESPMOD answer with this client's vendor rules.
    pub fn verdict(&self, response: &RawIcapResponse) -> IcapResult<Verdict> {
        self.inner.vendor.verdict(response)
    }

    /// [`Client::scan`] followed by [`Client::verdict`].
    pub async fn scan_verdict(
        &self,
        payload: impl Into<Vec<u8>>,
        display_name: &str,
    ) -> IcapResult<(RawIcapResponse, Verdict)> {
        let response = self.scan(payload, display_name).await?;
        let verdict = self.verdict(&response)?;
        info!(
            "scan_verdict: {} via {} -> {}",
            display_name, self.inner.vendor, verdict
        );
        Ok((response, verdict))
    }
}

/// Accept an OPTIONS answer only if its status line starts with `ICAP/1.0 200`.
pub fn check_options_response(response: RawIcapResponse) -> IcapResult<RawIcapResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(IcapError::ProtocolViolation(response.status_line()))
    }
}

#[derive(Debug, Default)]
pub struct ClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    service: Option<String>,
    vendor: Vendor,
    policy: RetryPolicy,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the builder from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: Some(config.icap_host.clone()),
            port: Some(config.icap_port),
            service: config.respmod_endpoint.clone(),
            vendor: config.vendor,
            policy: config.retry_policy(),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// RESPMOD service path. Defaults to the vendor's usual path.
    pub fn service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }

    pub fn vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = vendor;
        self
    }

    /// Bound on connect, write and each read.
    pub fn timeout(mut self, dur: Duration) -> Self {
        self.policy.timeout = dur;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn max_response_bytes(mut self, limit: usize) -> Self {
        self.policy.max_response_bytes = limit;
        self
    }

    /// Take host, port and (if present) service from `icap://host[:port][/service]`.
    pub fn from_uri(mut self, uri: &str) -> IcapResult<Self> {
        let ep = Endpoint::from_uri(uri)?;
        self.host = Some(ep.host().to_string());
        self.port = Some(ep.port());
        if !ep.service().is_empty() {
            self.service = Some(ep.service().to_string());
        }
        Ok(self)
    }

    pub fn build(self) -> IcapResult<Client> {
        self.build_with(TcpConnector)
    }

    /// Build over a custom [`Connector`].
    pub fn build_with<C: Connector>(self, connector: C) -> IcapResult<Client<C>> {
        let host = self
            .host
            .ok_or_else(|| icap_config_error!("ClientBuilder: host is required"))?;
        if self.policy.max_attempts == 0 {
            return Err(icap_config_error!("max_attempts must be at least 1"));
        }
        if self.policy.timeout.is_zero() {
            return Err(icap_config_error!("timeout must be greater than 0"));
        }
        if self.policy.max_response_bytes == 0 {
            return Err(icap_config_error!("max_response_bytes must be greater than 0"));
        }

        let service = match self.service.as_deref() {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => self.vendor.default_service().to_string(),
        };
        let endpoint = Endpoint::new(&host, self.port.unwrap_or(DEFAULT_PORT), &service)?;
        debug!("build: {} ({})", endpoint, self.vendor);

        Ok(Client {
            inner: Arc::new(ClientRef {
                endpoint,
                vendor: self.vendor,
                transport: Transport::new(connector, self.policy),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_check_accepts_200_only() {
        let ok = RawIcapResponse::from("ICAP/1.0 200 OK\r\n\r\n");
        assert_eq!(check_options_response(ok.clone()).unwrap(), ok);

        let err = check_options_response(RawIcapResponse::from("ICAP/1.0 500 Error\r\n\r\n"))
            .unwrap_err();
        assert!(
            matches!(err, IcapError::ProtocolViolation(ref line) if line == "ICAP/1.0 500 Error"),
            "{err:?}"
        );

        assert!(check_options_response(RawIcapResponse::from("")).is_err());
    }

    #[test]
    fn builder_uses_vendor_default_service() {
        let client = Client::builder()
            .host("10.1.1.1")
            .vendor(Vendor::Symantec)
            .build()
            .unwrap();
        assert_eq!(client.endpoint().to_string(), "icap://10.1.1.1:1344/SYMScanRespEx");
    }

    #[test]
    fn builder_from_uri_keeps_explicit_service() {
        let client = Client::from_uri("icap://av:11344/kav/respmod", Vendor::Kaspersky).unwrap();
        assert_eq!(client.endpoint().port(), 11344);
        assert_eq!(client.endpoint().service(), "kav/respmod");

        let client = Client::from_uri("icap://av", Vendor::Kaspersky).unwrap();
        assert_eq!(client.endpoint().service(), "av/respmod");
    }

    #[test]
    fn builder_rejects_bad_settings() {
        assert!(Client::builder().build().is_err());
        assert!(Client::builder().host("a").max_attempts(0).build().is_err());
        assert!(Client::builder().host("a").timeout(Duration::ZERO).build().is_err());
        assert!(Client::builder().host("a").max_response_bytes(0).build().is_err());
        assert!(Client::builder().host("a").port(0).build().is_err());
    }

    #[test]
    fn builder_defaults_match_policy() {
        let client = Client::builder().host("a").build().unwrap();
        assert_eq!(client.retry_policy(), &RetryPolicy::default());
        assert_eq!(client.retry_policy().max_attempts, 3);
        assert_eq!(client.retry_policy().timeout, Duration::from_secs(10));
    }

    #[test]
    fn respmod_bytes_target_client_endpoint() {
        let client = Client::builder()
            .host("127.0.0.1")
            .port(1344)
            .service("av/respmod")
            .build()
            .unwrap();
        let wire = client.respmod_bytes(&ScanRequest::new(b"x".to_vec(), "f"));
        assert!(wire.starts_with(b"RESPMOD icap://127.0.0.1:1344/av/respmod ICAP/1.0\r\nHost:127.0.0.1:1344\r\n"));
    }

    #[test]
    fn clones_share_the_endpoint() {
        let a = Client::builder().host("a").build().unwrap();
        let b = a.clone();
        assert!(std::ptr::eq(a.endpoint(), b.endpoint()));
    }
}
