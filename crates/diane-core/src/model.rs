//! Domain types shared across the hub (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a server is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        oauth: Option<OAuthDescriptor>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        oauth: Option<OAuthDescriptor>,
    },
    Builtin,
}

impl Transport {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Transport::Stdio { .. } => "stdio",
            Transport::Http { .. } => "http",
            Transport::Sse { .. } => "sse",
            Transport::Builtin => "builtin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthDescriptor {
    pub token_url: String,
    pub client_id: String,
}

/// Placement mode (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    Master,
    Specific,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementHint {
    pub host: String,
    pub mode: PlacementMode,
}

/// A server definition row, as persisted and as loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub name: String,
    pub transport: Transport,
    pub enabled: bool,
    pub placement: Option<PlacementHint>,
}

/// A (server, host, enabled) placement row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub server: String,
    pub host: String,
    pub enabled: bool,
}

/// A named context: a curated subset of servers/tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

/// A (context, server, enabled) membership row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextServer {
    pub context: String,
    pub server: String,
    pub enabled: bool,
}

/// A (context, server, tool, enabled) override row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    pub context: String,
    pub server: String,
    pub tool: String,
    pub enabled: bool,
}

/// A tool as reported by its owning client (upstream or builtin), before the
/// registry assigns it a public name and a back-pointer (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A live, aggregated tool (derived, non-persistent — spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTool {
    /// Publicly advertised name, e.g. `gh_list_repos` or `get_weather`.
    pub public_name: String,
    /// The name as known to the owning upstream client.
    pub original_name: String,
    /// Name of the owning server definition.
    pub server: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// How a downstream session selected its context — used only for
/// diagnostics; the actual precedence is resolved at the transport layer
/// per spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Query,
    Header,
    Env,
    Default,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_round_trips_through_json() {
        let t = Transport::Stdio {
            command: "gh-mcp".to_string(),
            args: vec!["serve".to_string()],
            env: HashMap::new(),
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: Transport = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
        assert_eq!(back.kind_name(), "stdio");
    }
}
