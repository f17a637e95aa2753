//! Capabilities for session negotiation.
//!
//! Capabilities are exchanged in the `initialize` handshake. Each side
//! advertises a map of capability name to feature flags, e.g.
//! `{"tools": {"listChanged": false}}`. The server then picks the protocol
//! version both sides speak.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{LATEST_PROTOCOL_VERSION, SERVER_NAME, SUPPORTED_PROTOCOL_VERSIONS};

/// Feature flags of one capability (`listChanged`, `subscribe`, ...)
pub type FeatureFlags = BTreeMap<String, bool>;

/// Capability set: capability name to feature flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities {
    /// Advertised capabilities
    pub features: BTreeMap<String, FeatureFlags>,
}

impl Capabilities {
    /// Capabilities this server advertises
    pub fn server() -> Self {
        Self::default().with_feature("tools", "listChanged", false)
    }

    /// Add a capability flag
    pub fn with_feature(mut self, capability: &str, flag: &str, enabled: bool) -> Self {
        self.features
            .entry(capability.to_string())
            .or_default()
            .insert(flag.to_string(), enabled);
        self
    }

    /// Add a capability with no flags
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.features.entry(capability.to_string()).or_default();
        self
    }

    /// Lenient parse of a peer's capability object.
    ///
    /// Non-boolean flag values (for example `experimental` payloads) are
    /// ignored; a capability given as `true` counts as present.
    pub fn from_value(value: &Value) -> Self {
        let mut caps = Self::default();
        let Some(object) = value.as_object() else {
            return caps;
        };

        for (name, entry) in object {
            match entry {
                Value::Object(flags) => {
                    caps.features.insert(name.clone(), collect_flags(flags));
                },
                Value::Bool(true) => {
                    caps.features.insert(name.clone(), FeatureFlags::new());
                },
                _ => {},
            }
        }
        caps
    }

    /// Check if a capability is present
    pub fn supports(&self, capability: &str) -> bool {
        self.features.contains_key(capability)
    }

    /// Check a single feature flag
    pub fn flag(&self, capability: &str, flag: &str) -> bool {
        self.features
            .get(capability)
            .and_then(|flags| flags.get(flag))
            .copied()
            .unwrap_or(false)
    }

    /// Negotiate with a peer's advertised capabilities
    pub fn negotiate(&self, requested_version: &str, peer: &Capabilities) -> NegotiatedCaps {
        NegotiatedCaps {
            protocol_version: negotiate_version(requested_version).to_string(),
            server: self.clone(),
            client: peer.clone(),
        }
    }
}

fn collect_flags(flags: &Map<String, Value>) -> FeatureFlags {
    flags
        .iter()
        .filter_map(|(flag, value)| value.as_bool().map(|b| (flag.clone(), b)))
        .collect()
}

/// Pick the protocol version for a session.
///
/// A supported requested version is echoed back; anything else falls back to
/// the latest version this server speaks, leaving it to the client to
/// disconnect if it cannot follow.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Result of capability negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCaps {
    /// Agreed protocol version
    pub protocol_version: String,
    /// Capabilities granted by the server
    pub server: Capabilities,
    /// Capabilities declared by the client
    pub client: Capabilities,
}

/// Name/version pair identifying a peer implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// This server
    pub fn server() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// `initialize` request parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client
    pub protocol_version: String,
    /// Client capabilities
    #[serde(default)]
    pub capabilities: Value,
    /// Client implementation
    pub client_info: Implementation,
}

impl InitializeParams {
    /// Parse and validate `initialize` params
    pub fn parse(params: Option<&Value>) -> Result<Self, String> {
        let params = params.ok_or_else(|| "initialize requires params".to_string())?;
        let parsed: Self = serde_json::from_value(params.clone())
            .map_err(|e| format!("invalid initialize params: {e}"))?;
        if parsed.protocol_version.trim().is_empty() {
            return Err("protocolVersion must not be empty".to_string());
        }
        Ok(parsed)
    }
}

/// `initialize` result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: Capabilities,
    /// Server implementation
    pub server_info: Implementation,
}
