//! Scanner configuration loaded from YAML.

use crate::client::{Client, ClientBuilder};
use crate::endpoint::Endpoint;
use crate::error::IcapResult;
use crate::icap_config_error;
use crate::net::RetryPolicy;
use crate::vendor::Vendor;
use crate::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT, DEFAULT_TIMEOUT, MAX_RESPONSE_BYTES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub icap_host: String,

    #[serde(default = "default_port")]
    pub icap_port: u16,

    /// RESPMOD service path; the vendor's default when absent.
    #[serde(default)]
    pub respmod_endpoint: Option<String>,

    #[serde(default)]
    pub vendor: Vendor,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_max_response_bytes() -> usize {
    MAX_RESPONSE_BYTES
}

impl Config {
    /// Defaults pointed at `host`.
    pub fn new(host: &str) -> Self {
        Self {
            icap_host: host.to_string(),
            icap_port: default_port(),
            respmod_endpoint: None,
            vendor: Vendor::default(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            max_response_bytes: default_max_response_bytes(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> IcapResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> IcapResult<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IcapResult<()> {
        if self.icap_host.trim().is_empty() {
            return Err(icap_config_error!("icap_host must not be empty"));
        }
        if self.icap_port == 0 {
            return Err(icap_config_error!("icap_port must be between 1 and 65535"));
        }
        if self.timeout_ms == 0 {
            return Err(icap_config_error!("timeout_ms must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(icap_config_error!("max_attempts must be at least 1"));
        }
        if self.max_response_bytes == 0 {
            return Err(icap_config_error!("max_response_bytes must be greater than 0"));
        }
        Ok(())
    }

    /// Effective RESPMOD service path.
    pub fn service(&self) -> &str {
        match self.respmod_endpoint.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => self.vendor.default_service(),
        }
    }

    pub fn endpoint(&self) -> IcapResult<Endpoint> {
        Endpoint::new(&self.icap_host, self.icap_port, self.service())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            timeout: Duration::from_millis(self.timeout_ms),
            max_response_bytes: self.max_response_bytes,
        }
    }

    pub fn client(&self) -> IcapResult<Client> {
        self.validate()?;
        ClientBuilder::from_config(self).build()
    }

    /// Commented sample file.
    pub fn example() -> &'static str {
        r#"# ICAP server
icap_host: 127.0.0.1
icap_port: 1344

# kaspersky | symantec
vendor: kaspersky

# RESPMOD service path (defaults: av/respmod, SYMScanRespEx)
# respmod_endpoint: av/respmod

# Per connect/write/read, milliseconds
timeout_ms: 10000
max_attempts: 3
max_response_bytes: 65536
"#
    }
}
