//! Vendor-specific reading of ICAP answers: engine version from `OPTIONS`,
//! verdict from `RESPMOD`.
//!
//! The encoder, transport and parser are vendor-agnostic; everything that
//! depends on which AV product sits behind the ICAP port lives in [`Vendor`].

use crate::error::{IcapError, IcapResult};
use crate::response::{
    ParsedHeaders, RawIcapResponse, SERVER, SERVICE, X_DEFINITION_INFO, X_RESPONSE_INFO,
    X_VIRUS_ID,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Marker some engines put in front of heuristic detections.
pub const HEURISTIC_MARKER: &str = "HEUR:";

/// Reported when a version header is missing.
pub const UNKNOWN_VERSION: &str = "unknown";

/// RESPMOD answers with this many lines or fewer cannot carry a verdict.
const MIN_VERDICT_LINES: usize = 3;

/// Scan outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Infected { virus_name: String },
    Heuristic { signature_name: String },
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Clean)
    }

    /// Detection name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Verdict::Clean => None,
            Verdict::Infected { virus_name } => Some(virus_name.as_str()),
            Verdict::Heuristic { signature_name } => Some(signature_name.as_str()),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Clean => f.write_str("clean"),
            Verdict::Infected { virus_name } => write!(f, "infected: {virus_name}"),
            Verdict::Heuristic { signature_name } => write!(f, "heuristic: {signature_name}"),
        }
    }
}

/// Engine metadata reported by `OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    pub engine: String,
    pub definitions: Option<String>,
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.definitions {
            Some(defs) => write!(f, "engine: {}, definitions: {}", self.engine, defs),
            None => f.write_str(&self.engine),
        }
    }
}

/// AV product behind the ICAP service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Kaspersky Scan Engine / Anti-Virus for Proxy.
    #[default]
    Kaspersky,
    /// Symantec Protection Engine. Verdict extraction only looks at
    /// `X-Virus-ID`.
    Symantec,
}

impl Vendor {
    pub fn name(self) -> &'static str {
        match self {
            Vendor::Kaspersky => "kaspersky",
            Vendor::Symantec => "symantec",
        }
    }

    /// RESPMOD service path used when none is configured.
    pub fn default_service(self) -> &'static str {
        match self {
            Vendor::Kaspersky => "av/respmod",
            Vendor::Symantec => "SYMScanRespEx",
        }
    }

    /// Whether [`Vendor::verdict`] only covers part of the vendor's grammar.
    pub fn verdict_is_partial(self) -> bool {
        matches!(self, Vendor::Symantec)
    }

    /// Engine version from an `OPTIONS` answer. Missing headers read as `unknown`.
    pub fn engine_version(self, options: &RawIcapResponse) -> EngineVersion {
        let headers = ParsedHeaders::parse(options);
        let header = |name: &str| headers.get(name).unwrap_or(UNKNOWN_VERSION).to_string();
        match self {
            Vendor::Kaspersky => EngineVersion {
                engine: header(SERVER),
                definitions: None,
            },
            Vendor::Symantec => EngineVersion {
                engine: header(SERVICE),
                definitions: Some(header(X_DEFINITION_INFO)),
            },
        }
    }

    /// Verdict from a `RESPMOD` answer.
    ///
    /// Fails with [`IcapError::MalformedVerdictResponse`] when the answer is
    /// too short to carry headers; a short answer is never read as clean.
    pub fn verdict(self, response: &RawIcapResponse) -> IcapResult<Verdict> {
        let headers = ParsedHeaders::parse(response);
        if headers.line_count() <= MIN_VERDICT_LINES {
            return Err(IcapError::MalformedVerdictResponse {
                lines: headers.line_count(),
                response: response.text().into_owned(),
            });
        }

        let virus_id = headers.get(X_VIRUS_ID).filter(|v| !v.is_empty());
        match self {
            Vendor::Kaspersky => {
                let info = headers.get(X_RESPONSE_INFO);
                if metadata_mismatch(info, virus_id.is_some()) {
                    warn!(
                        "kaspersky: X-Response-Info {:?} disagrees with X-Virus-ID {:?}",
                        info, virus_id
                    );
                }
                Ok(match virus_id {
                    None => Verdict::Clean,
                    Some(id) => match id.strip_prefix(HEURISTIC_MARKER) {
                        Some(sig) if !sig.is_empty() => Verdict::Heuristic {
                            signature_name: sig.to_string(),
                        },
                        _ => Verdict::Infected {
                            virus_name: id.to_string(),
                        },
                    },
                })
            }
            Vendor::Symantec => {
                debug!("symantec: verdict from X-Virus-ID only");
                Ok(match virus_id {
                    None => Verdict::Clean,
                    Some(id) => Verdict::Infected {
                        virus_name: id.to_string(),
                    },
                })
            }
        }
    }
}

/// `X-Response-Info` says `blocked` for detections and `passed` otherwise.
/// Other values, or no header at all, are not checked.
fn metadata_mismatch(info: Option<&str>, has_virus: bool) -> bool {
    match info.map(str::to_ascii_lowercase).as_deref() {
        Some("blocked") => !has_virus,
        Some("passed") => has_virus,
        _ => false,
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Vendor {
    type Err = IcapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kaspersky" => Ok(Vendor::Kaspersky),
            "symantec" => Ok(Vendor::Symantec),
            other => Err(IcapError::configuration(format!(
                "unknown vendor {other:?} (expected kaspersky or symantec)"
            ))),
        }
    }
}
