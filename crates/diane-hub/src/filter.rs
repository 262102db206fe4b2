//! Context/Filter Engine (spec.md §4.3): the two-level policy overlay over
//! the live tool inventory. No direct teacher analog — this is the part of
//! the hub the distilled spec names as new design, so the algorithm here
//! follows spec.md §4.3 literally rather than continuing a teacher module.

use std::sync::Arc;

use diane_core::model::LiveTool;
use diane_core::{HubError, HubResult};
use diane_storage::Store;
use diane_upstream::UpstreamManager;

pub struct FilterEngine {
    store: Arc<Store>,
    manager: Arc<UpstreamManager>,
}

impl FilterEngine {
    pub fn new(store: Arc<Store>, manager: Arc<UpstreamManager>) -> Self {
        Self { store, manager }
    }

    /// Resolve a context name to its row, falling back to the persisted
    /// default when `name` doesn't (or no longer does) exist — e.g. a
    /// session bound to a context that was deleted out from under it while
    /// connected (spec.md §4.3 step 1). Returns `None` only when neither
    /// `name` nor any default context exists.
    fn effective_context(&self, name: &str) -> HubResult<Option<diane_core::model::Context>> {
        if let Some(ctx) = self
            .store
            .get_context(name)
            .map_err(|e| HubError::Storage(e.to_string()))?
        {
            return Ok(Some(ctx));
        }
        self.store
            .default_context()
            .map_err(|e| HubError::Storage(e.to_string()))
    }

    /// Validate an explicitly requested context name at session-bind time
    /// (spec.md §4.3: "An unknown name is treated as an error rather than
    /// falling back silently"). Distinct from `effective_context`, which is
    /// used by `visible_tools`/`may_call` on an *already bound* session and
    /// tolerates the context having since disappeared.
    pub fn validate_context_name(&self, name: &str) -> HubResult<()> {
        let exists = self
            .store
            .get_context(name)
            .map_err(|e| HubError::Storage(e.to_string()))?
            .is_some();
        if exists {
            Ok(())
        } else {
            Err(HubError::UnknownContext(name.to_string()))
        }
    }

    pub fn default_context_name(&self) -> HubResult<String> {
        self.store
            .default_context()
            .map_err(|e| HubError::Storage(e.to_string()))?
            .map(|c| c.name)
            .ok_or_else(|| HubError::UnknownContext("<no default context configured>".to_string()))
    }

    /// spec.md §4.3 `visible_tools(context)`.
    pub fn visible_tools(&self, context: &str) -> HubResult<Vec<LiveTool>> {
        let Some(ctx) = self.effective_context(context)? else {
            return Ok(Vec::new());
        };

        let memberships = self
            .store
            .list_context_servers(&ctx.name)
            .map_err(|e| HubError::Storage(e.to_string()))?;
        let enabled_servers: std::collections::HashSet<String> = memberships
            .into_iter()
            .filter(|m| m.enabled)
            .map(|m| m.server)
            .collect();

        let mut visible = Vec::new();
        for tool in self.manager.list_tools() {
            if !enabled_servers.contains(&tool.server) {
                continue;
            }
            let override_enabled = self
                .store
                .tool_override(&ctx.name, &tool.server, &tool.original_name)
                .map_err(|e| HubError::Storage(e.to_string()))?;
            if override_enabled == Some(false) {
                continue;
            }
            visible.push(LiveTool {
                public_name: tool.public_name,
                original_name: tool.original_name,
                server: tool.server,
                description: tool.descriptor.description,
                input_schema: tool.descriptor.input_schema,
            });
        }
        Ok(visible)
    }

    /// spec.md §4.3 `may_call(context, publicName)`.
    pub fn may_call(&self, context: &str, public_name: &str) -> HubResult<()> {
        let Some(ctx) = self.effective_context(context)? else {
            return Err(HubError::NotPermitted {
                context: context.to_string(),
                tool: public_name.to_string(),
            });
        };

        let resolved = self
            .manager
            .resolve(public_name)
            .ok_or_else(|| HubError::ToolNotFound {
                name: public_name.to_string(),
            })?;

        let memberships = self
            .store
            .list_context_servers(&ctx.name)
            .map_err(|e| HubError::Storage(e.to_string()))?;
        let server_enabled = memberships
            .iter()
            .any(|m| m.server == resolved.server && m.enabled);
        if !server_enabled {
            return Err(HubError::NotPermitted {
                context: ctx.name.clone(),
                tool: public_name.to_string(),
            });
        }

        let override_enabled = self
            .store
            .tool_override(&ctx.name, &resolved.server, &resolved.original_name)
            .map_err(|e| HubError::Storage(e.to_string()))?;
        if override_enabled == Some(false) {
            return Err(HubError::NotPermitted {
                context: ctx.name.clone(),
                tool: public_name.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diane_core::model::{ServerDefinition, Transport};
    use diane_storage::{StoreConfig, StorePool};
    use diane_upstream::ManagerConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn setup() -> (Arc<Store>, Arc<UpstreamManager>, FilterEngine) {
        let store = Arc::new(Store::new(StorePool::new(StoreConfig::in_memory()).unwrap()));
        store.ensure_default_context().unwrap();
        store
            .upsert_server(&ServerDefinition {
                name: "gh".to_string(),
                transport: Transport::Stdio {
                    command: "echo".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                },
                enabled: true,
                placement: None,
            })
            .unwrap();
        store
            .create_context("work", "Work context")
            .unwrap();
        store.set_context_server("work", "gh", true).unwrap();
        store
            .set_tool_override("work", "gh", "open_pr", false)
            .unwrap();

        let manager = UpstreamManager::new(diane_builtin::BuiltinRegistry::new(), ManagerConfig {
            call_deadline: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(20),
            ready_timeout: Duration::from_millis(50),
        });
        manager.seed_tools(
            "gh",
            vec![
                diane_core::model::ToolDescriptor {
                    name: "list_repos".to_string(),
                    description: "".to_string(),
                    input_schema: serde_json::json!({}),
                },
                diane_core::model::ToolDescriptor {
                    name: "open_pr".to_string(),
                    description: "".to_string(),
                    input_schema: serde_json::json!({}),
                },
            ],
            false,
        );

        let filter = FilterEngine::new(store.clone(), manager.clone());
        (store, manager, filter)
    }

    #[tokio::test]
    async fn scenario_1_create_context_and_filter() {
        let (_store, _manager, filter) = setup().await;
        let visible = filter.visible_tools("work").unwrap();
        let names: Vec<_> = visible.iter().map(|t| t.public_name.as_str()).collect();
        assert_eq!(names, vec!["gh_list_repos"]);

        let err = filter.may_call("work", "gh_open_pr").unwrap_err();
        assert!(matches!(err, HubError::NotPermitted { .. }));
        assert_eq!(
            err.to_string(),
            "tool `gh_open_pr` not permitted in context `work`"
        );
    }

    #[tokio::test]
    async fn server_not_in_context_is_invisible() {
        let (store, _manager, filter) = setup().await;
        assert!(filter
            .visible_tools(diane_storage::DEFAULT_CONTEXT_NAME)
            .unwrap()
            .is_empty());
        let err = filter
            .may_call(diane_storage::DEFAULT_CONTEXT_NAME, "gh_list_repos")
            .unwrap_err();
        assert!(matches!(err, HubError::NotPermitted { .. }));
        let _ = store; // keep store alive for the duration of the assertions
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found_not_permission_denied() {
        let (_store, _manager, filter) = setup().await;
        let err = filter.may_call("work", "gh_bogus").unwrap_err();
        assert!(matches!(err, HubError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn explicit_unknown_context_name_is_rejected_at_bind_time() {
        let (_store, _manager, filter) = setup().await;
        let err = filter.validate_context_name("nonexistent").unwrap_err();
        assert!(matches!(err, HubError::UnknownContext(_)));
    }
}
