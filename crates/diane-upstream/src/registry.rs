//! Maps public tool names to the client that owns them (spec.md §4.2):
//! `<server>_<tool>` for proxied servers, a flat unprefixed namespace for
//! builtins, first-registered wins on collision. Readers get a cheap
//! clone of the current snapshot rather than holding a lock across a
//! downstream call, the same copy-on-read discipline `diane-storage`
//! uses for its connection pool.

use std::collections::HashMap;
use std::sync::Arc;

use diane_core::model::ToolDescriptor;
use diane_core::naming::public_name;

#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub public_name: String,
    pub server: String,
    pub original_name: String,
    pub descriptor: ToolDescriptor,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entries contributed by a single server, leaving every
    /// other server's entries untouched. Builtins pass `is_builtin = true`
    /// so their tools register unprefixed.
    pub fn refresh_server(&mut self, server: &str, tools: Vec<ToolDescriptor>, is_builtin: bool) {
        self.tools.retain(|_, t| t.server != server);
        for descriptor in tools {
            let public = if is_builtin {
                descriptor.name.clone()
            } else {
                public_name(server, &descriptor.name)
            };
            if self.tools.contains_key(&public) {
                tracing::warn!(
                    server = %server,
                    tool = %public,
                    "dropping tool: a tool with this public name is already registered"
                );
                continue;
            }
            self.tools.insert(
                public.clone(),
                RegisteredTool {
                    public_name: public,
                    server: server.to_string(),
                    original_name: descriptor.name.clone(),
                    descriptor,
                },
            );
        }
    }

    pub fn purge_server(&mut self, server: &str) {
        self.tools.retain(|_, t| t.server != server);
    }

    pub fn resolve(&self, public_name: &str) -> Option<&RegisteredTool> {
        self.tools.get(public_name)
    }

    pub fn list(&self) -> Vec<RegisteredTool> {
        self.tools.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A thread-safe handle shared between the manager's background refresh
/// tasks and whatever's serving `tools/list` to downstream sessions.
pub type SharedRegistry = Arc<parking_lot::RwLock<ToolRegistry>>;

pub fn shared_registry() -> SharedRegistry {
    Arc::new(parking_lot::RwLock::new(ToolRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({}),
        }
    }

    #[test]
    fn proxied_tools_get_prefixed_public_names() {
        let mut registry = ToolRegistry::new();
        registry.refresh_server("github", vec![descriptor("list_repos")], false);
        let resolved = registry.resolve("github_list_repos").unwrap();
        assert_eq!(resolved.server, "github");
        assert_eq!(resolved.original_name, "list_repos");
    }

    #[test]
    fn builtin_tools_stay_unprefixed() {
        let mut registry = ToolRegistry::new();
        registry.refresh_server("clock", vec![descriptor("now")], true);
        assert!(registry.resolve("now").is_some());
        assert!(registry.resolve("clock_now").is_none());
    }

    #[test]
    fn refresh_only_touches_the_named_server() {
        let mut registry = ToolRegistry::new();
        registry.refresh_server("github", vec![descriptor("list_repos")], false);
        registry.refresh_server("jira", vec![descriptor("list_issues")], false);
        registry.refresh_server("github", vec![descriptor("create_issue")], false);

        assert!(registry.resolve("github_list_repos").is_none());
        assert!(registry.resolve("github_create_issue").is_some());
        assert!(registry.resolve("jira_list_issues").is_some());
    }

    #[test]
    fn collision_keeps_first_registered_and_drops_the_second() {
        let mut registry = ToolRegistry::new();
        registry.refresh_server("clock", vec![descriptor("now")], true);
        registry.refresh_server("other_clock", vec![descriptor("now")], true);
        let resolved = registry.resolve("now").unwrap();
        assert_eq!(resolved.server, "clock");
    }

    #[test]
    fn purge_removes_every_tool_for_a_server() {
        let mut registry = ToolRegistry::new();
        registry.refresh_server("github", vec![descriptor("list_repos")], false);
        registry.purge_server("github");
        assert!(registry.is_empty());
    }
}
