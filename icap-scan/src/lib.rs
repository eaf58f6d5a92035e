#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod net;
pub mod request;
pub mod response;
pub mod vendor;

use std::time::Duration;

pub use client::{Client, ClientBuilder};
pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{IcapError, IcapResult};
pub use net::{Connector, RetryPolicy, TcpConnector, Transport};
pub use request::ScanRequest;
pub use response::{ParsedHeaders, RawIcapResponse};
pub use vendor::{EngineVersion, Vendor, Verdict};

///Lib version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
/// Port used when an `icap://` URI names none.
pub const DEFAULT_PORT: u16 = 1344;
///Max response size
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;
/// Connection attempts per exchange.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Bound on connect, write and each read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
