//! CRUD surface over the schema in `schema.rs`. This is the "single source
//! of truth" component from spec.md §4.6: server/context/override rows live
//! here for the process's lifetime across restarts.

use diane_core::model::{
    Context, ContextServer, Placement, PlacementHint, PlacementMode, ServerDefinition, Transport,
};
use rusqlite::{params, OptionalExtension};
use tokio::sync::broadcast;

use crate::error::{Result, StoreError};
use crate::pool::StorePool;

/// Name of the default context created on fresh install (spec.md §3).
pub const DEFAULT_CONTEXT_NAME: &str = "personal";

/// Depth of the change-notification channel. Every subscriber (in practice,
/// one per running hub process) only cares that *something* affecting
/// visibility changed, not how many times, so a small buffer that coalesces
/// under load is enough — a lagged receiver just re-derives the same
/// "something changed" signal on its next successful `recv`.
const CHANGE_CHANNEL_DEPTH: usize = 64;

pub struct Store {
    pool: StorePool,
    change_tx: broadcast::Sender<()>,
}

impl Store {
    pub fn new(pool: StorePool) -> Self {
        let (change_tx, _rx) = broadcast::channel(CHANGE_CHANNEL_DEPTH);
        Self { pool, change_tx }
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    /// Subscribe to persisted changes that affect tool visibility (server
    /// enable/placement, context/membership/override CRUD — spec.md §8
    /// property 4). Emitted *after* the write commits; carries no payload,
    /// matching the "something changed" notification it ultimately feeds
    /// (spec.md §4.5).
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.change_tx.subscribe()
    }

    /// Fire-and-forget: no receivers (e.g. a one-shot CLI command with no
    /// running hub in this process) is not an error.
    fn notify_changed(&self) {
        let _ = self.change_tx.send(());
    }

    /// First-run check: ensure at least one context exists (spec.md §4.6).
    pub fn ensure_default_context(&self) -> Result<()> {
        self.pool.with_connection_mut(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM contexts", [], |row| row.get(0))?;
            if count == 0 {
                conn.execute(
                    "INSERT INTO contexts (name, description, is_default) VALUES (?1, ?2, 1)",
                    params![DEFAULT_CONTEXT_NAME, "Default context"],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Idempotent registration of an in-process builtin: created disabled
    /// by default ("secure by default", spec.md §4.6) with a placement row
    /// for the master host.
    pub fn ensure_builtin_registered(&self, name: &str) -> Result<()> {
        self.pool.with_connection_mut(|conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT name FROM servers WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                conn.execute(
                    "INSERT INTO servers (name, transport_kind, transport_json, enabled, placement_host, placement_mode, created_at)
                     VALUES (?1, 'builtin', '{}', 0, 'master', 'master', ?2)",
                    params![name, chrono::Utc::now().to_rfc3339()],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO placements (server, host, enabled) VALUES (?1, 'master', 1)",
                    params![name],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn upsert_server(&self, def: &ServerDefinition) -> Result<()> {
        diane_core::naming::validate_server_name(&def.name)
            .map_err(|message| StoreError::InvalidTransport {
                server: def.name.clone(),
                message,
            })?;
        let transport_json = serde_json::to_string(&def.transport).map_err(|e| {
            StoreError::InvalidTransport {
                server: def.name.clone(),
                message: e.to_string(),
            }
        })?;
        let (placement_host, placement_mode) = match &def.placement {
            Some(hint) => (Some(hint.host.clone()), Some(mode_str(hint.mode))),
            None => (None, None),
        };
        self.pool.with_connection(|conn| {
            conn.execute(
                "INSERT INTO servers (name, transport_kind, transport_json, enabled, placement_host, placement_mode, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(name) DO UPDATE SET
                    transport_kind = excluded.transport_kind,
                    transport_json = excluded.transport_json,
                    enabled = excluded.enabled,
                    placement_host = excluded.placement_host,
                    placement_mode = excluded.placement_mode",
                params![
                    def.name,
                    def.transport.kind_name(),
                    transport_json,
                    def.enabled,
                    placement_host,
                    placement_mode,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )
        })?;
        self.notify_changed();
        Ok(())
    }

    pub fn set_server_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let changed = self.pool.with_connection(|conn| {
            conn.execute(
                "UPDATE servers SET enabled = ?1 WHERE name = ?2",
                params![enabled, name],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::UnknownServer(name.to_string()));
        }
        self.notify_changed();
        Ok(())
    }

    pub fn delete_server(&self, name: &str) -> Result<()> {
        let changed = self
            .pool
            .with_connection(|conn| conn.execute("DELETE FROM servers WHERE name = ?1", params![name]))?;
        if changed == 0 {
            return Err(StoreError::UnknownServer(name.to_string()));
        }
        self.notify_changed();
        Ok(())
    }

    pub fn list_servers(&self) -> Result<Vec<ServerDefinition>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, transport_kind, transport_json, enabled, placement_host, placement_mode FROM servers",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let name: String = row.get(0)?;
                    let transport_json: String = row.get(2)?;
                    let enabled: bool = row.get(3)?;
                    let placement_host: Option<String> = row.get(4)?;
                    let placement_mode: Option<String> = row.get(5)?;
                    Ok((name, transport_json, enabled, placement_host, placement_mode))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows
                .into_iter()
                .filter_map(|(name, transport_json, enabled, host, mode)| {
                    let transport: Transport = serde_json::from_str(&transport_json).ok()?;
                    let placement = match (host, mode) {
                        (Some(host), Some(mode)) => Some(PlacementHint {
                            host,
                            mode: mode_from_str(&mode),
                        }),
                        _ => None,
                    };
                    Some(ServerDefinition {
                        name,
                        transport,
                        enabled,
                        placement,
                    })
                })
                .collect())
        }).map_err(StoreError::from)
    }

    pub fn enabled_servers(&self) -> Result<Vec<ServerDefinition>> {
        Ok(self
            .list_servers()?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    /// Servers actually live on `host`: globally enabled AND (no placement
    /// row for this host, or that row is itself enabled) — spec.md §3's
    /// "a server is live on a host only when its global enabled flag AND
    /// its placement-enabled flag are both true". This, not
    /// `enabled_servers`, is what the serving path must load from.
    pub fn servers_live_on_host(&self, host: &str) -> Result<Vec<ServerDefinition>> {
        self.enabled_servers()?
            .into_iter()
            .map(|s| {
                let live = self.is_live_on_host(&s.name, host)?;
                Ok((s, live))
            })
            .collect::<Result<Vec<_>>>()
            .map(|servers| {
                servers
                    .into_iter()
                    .filter_map(|(s, live)| live.then_some(s))
                    .collect()
            })
    }

    pub fn upsert_placement(&self, placement: &Placement) -> Result<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "INSERT INTO placements (server, host, enabled) VALUES (?1, ?2, ?3)
                 ON CONFLICT(server, host) DO UPDATE SET enabled = excluded.enabled",
                params![placement.server, placement.host, placement.enabled],
            )
        })?;
        self.notify_changed();
        Ok(())
    }

    /// Whether `server` is live on `host`: both its global enabled flag and
    /// its placement-enabled flag must be true (spec.md §3).
    pub fn is_live_on_host(&self, server: &str, host: &str) -> Result<bool> {
        self.pool.with_connection(|conn| {
            let server_enabled: Option<bool> = conn
                .query_row(
                    "SELECT enabled FROM servers WHERE name = ?1",
                    params![server],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(server_enabled) = server_enabled else {
                return Ok(false);
            };
            if !server_enabled {
                return Ok(false);
            }
            let placement_enabled: Option<bool> = conn
                .query_row(
                    "SELECT enabled FROM placements WHERE server = ?1 AND host = ?2",
                    params![server, host],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(placement_enabled.unwrap_or(true))
        }).map_err(StoreError::from)
    }

    pub fn create_context(&self, name: &str, description: &str) -> Result<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "INSERT INTO contexts (name, description, is_default) VALUES (?1, ?2, 0)",
                params![name, description],
            )
        })?;
        self.notify_changed();
        Ok(())
    }

    pub fn delete_context(&self, name: &str) -> Result<()> {
        let ctx = self.get_context(name)?;
        let Some(ctx) = ctx else {
            return Err(StoreError::UnknownContext(name.to_string()));
        };
        if ctx.is_default {
            return Err(StoreError::CannotDeleteDefault(name.to_string()));
        }
        self.pool
            .with_connection(|conn| conn.execute("DELETE FROM contexts WHERE name = ?1", params![name]))?;
        self.notify_changed();
        Ok(())
    }

    pub fn get_context(&self, name: &str) -> Result<Option<Context>> {
        self.pool.with_connection(|conn| {
            conn.query_row(
                "SELECT name, description, is_default FROM contexts WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Context {
                        name: row.get(0)?,
                        description: row.get(1)?,
                        is_default: row.get(2)?,
                    })
                },
            )
            .optional()
        }).map_err(StoreError::from)
    }

    pub fn default_context(&self) -> Result<Option<Context>> {
        self.pool.with_connection(|conn| {
            conn.query_row(
                "SELECT name, description, is_default FROM contexts WHERE is_default = 1",
                [],
                |row| {
                    Ok(Context {
                        name: row.get(0)?,
                        description: row.get(1)?,
                        is_default: row.get(2)?,
                    })
                },
            )
            .optional()
        }).map_err(StoreError::from)
    }

    /// Transactional swap of the default-context flag (spec.md §4.6).
    pub fn set_default_context(&self, name: &str) -> Result<()> {
        self.pool.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let exists: Option<String> = tx
                .query_row("SELECT name FROM contexts WHERE name = ?1", params![name], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            tx.execute("UPDATE contexts SET is_default = 0", [])?;
            tx.execute(
                "UPDATE contexts SET is_default = 1 WHERE name = ?1",
                params![name],
            )?;
            tx.commit()
        }).map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::UnknownContext(name.to_string()),
            other => StoreError::Db(other),
        })?;
        self.notify_changed();
        Ok(())
    }

    pub fn list_contexts(&self) -> Result<Vec<Context>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT name, description, is_default FROM contexts")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Context {
                        name: row.get(0)?,
                        description: row.get(1)?,
                        is_default: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        }).map_err(StoreError::from)
    }

    pub fn set_context_server(&self, context: &str, server: &str, enabled: bool) -> Result<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "INSERT INTO context_servers (context, server, enabled) VALUES (?1, ?2, ?3)
                 ON CONFLICT(context, server) DO UPDATE SET enabled = excluded.enabled",
                params![context, server, enabled],
            )
        })?;
        self.notify_changed();
        Ok(())
    }

    pub fn remove_context_server(&self, context: &str, server: &str) -> Result<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "DELETE FROM context_servers WHERE context = ?1 AND server = ?2",
                params![context, server],
            )
        })?;
        self.notify_changed();
        Ok(())
    }

    pub fn list_context_servers(&self, context: &str) -> Result<Vec<ContextServer>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT context, server, enabled FROM context_servers WHERE context = ?1",
            )?;
            let rows = stmt
                .query_map(params![context], |row| {
                    Ok(ContextServer {
                        context: row.get(0)?,
                        server: row.get(1)?,
                        enabled: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        }).map_err(StoreError::from)
    }

    pub fn set_tool_override(&self, context: &str, server: &str, tool: &str, enabled: bool) -> Result<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tool_overrides (context, server, tool_name, enabled) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(context, server, tool_name) DO UPDATE SET enabled = excluded.enabled",
                params![context, server, tool, enabled],
            )
        })?;
        self.notify_changed();
        Ok(())
    }

    /// Look up an override; `None` means "no override row" (spec.md §3:
    /// tools default to enabled when absent).
    pub fn tool_override(&self, context: &str, server: &str, tool: &str) -> Result<Option<bool>> {
        self.pool.with_connection(|conn| {
            conn.query_row(
                "SELECT enabled FROM tool_overrides WHERE context = ?1 AND server = ?2 AND tool_name = ?3",
                params![context, server, tool],
                |row| row.get(0),
            )
            .optional()
        }).map_err(StoreError::from)
    }

    pub fn list_tool_overrides(&self, context: &str, server: &str) -> Result<Vec<(String, bool)>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tool_name, enabled FROM tool_overrides WHERE context = ?1 AND server = ?2",
            )?;
            let rows = stmt
                .query_map(params![context, server], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        }).map_err(StoreError::from)
    }

    /// One-time legacy JSON config import, gated on the server table being
    /// empty (SPEC_FULL.md §9): a populated store means either a prior
    /// import already ran or the operator configured things by hand, and
    /// either way we must not clobber it.
    pub fn import_legacy_json_if_empty(&self, path: &std::path::Path) -> Result<bool> {
        let server_count: i64 = self
            .pool
            .with_connection(|conn| conn.query_row("SELECT COUNT(*) FROM servers", [], |row| row.get(0)))?;
        if server_count > 0 {
            return Ok(false);
        }
        if !path.exists() {
            return Ok(false);
        }

        let raw = std::fs::read_to_string(path).map_err(|source| StoreError::LegacyImportRead {
            path: path.display().to_string(),
            source,
        })?;
        let legacy: LegacyConfig =
            serde_json::from_str(&raw).map_err(|source| StoreError::LegacyImportParse {
                path: path.display().to_string(),
                source,
            })?;

        self.ensure_default_context()?;
        for server in legacy.servers {
            self.upsert_server(&server)?;
        }
        Ok(true)
    }
}

/// Shape of the legacy pre-SQLite config file this hub's ancestor used to
/// read on every startup. Only the bits relevant to server definitions are
/// modeled; unknown fields are ignored by `serde`'s default behavior.
#[derive(Debug, serde::Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    servers: Vec<ServerDefinition>,
}

fn mode_str(mode: PlacementMode) -> &'static str {
    match mode {
        PlacementMode::Master => "master",
        PlacementMode::Specific => "specific",
        PlacementMode::Any => "any",
    }
}

fn mode_from_str(s: &str) -> PlacementMode {
    match s {
        "specific" => PlacementMode::Specific,
        "any" => PlacementMode::Any,
        _ => PlacementMode::Master,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{StoreConfig, StorePool};
    use std::collections::HashMap;

    fn test_store() -> Store {
        Store::new(StorePool::new(StoreConfig::in_memory()).unwrap())
    }

    fn stdio_def(name: &str) -> ServerDefinition {
        ServerDefinition {
            name: name.to_string(),
            transport: Transport::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            enabled: true,
            placement: None,
        }
    }

    #[test]
    fn fresh_install_gets_default_context() {
        let store = test_store();
        store.ensure_default_context().unwrap();
        let default = store.default_context().unwrap().unwrap();
        assert_eq!(default.name, DEFAULT_CONTEXT_NAME);
        assert!(default.is_default);

        // Calling again must not create a second context or error.
        store.ensure_default_context().unwrap();
        assert_eq!(store.list_contexts().unwrap().len(), 1);
    }

    #[test]
    fn default_context_cannot_be_deleted() {
        let store = test_store();
        store.ensure_default_context().unwrap();
        let err = store.delete_context(DEFAULT_CONTEXT_NAME).unwrap_err();
        assert!(matches!(err, StoreError::CannotDeleteDefault(_)));
    }

    #[test]
    fn default_context_swap_is_transactional() {
        let store = test_store();
        store.ensure_default_context().unwrap();
        store.create_context("work", "Work context").unwrap();
        store.set_default_context("work").unwrap();

        let default = store.default_context().unwrap().unwrap();
        assert_eq!(default.name, "work");

        let personal = store.get_context(DEFAULT_CONTEXT_NAME).unwrap().unwrap();
        assert!(!personal.is_default);
    }

    #[test]
    fn server_and_membership_crud() {
        let store = test_store();
        store.ensure_default_context().unwrap();
        store.upsert_server(&stdio_def("gh")).unwrap();
        store
            .set_context_server(DEFAULT_CONTEXT_NAME, "gh", true)
            .unwrap();
        store
            .set_tool_override(DEFAULT_CONTEXT_NAME, "gh", "open_pr", false)
            .unwrap();

        assert_eq!(
            store
                .tool_override(DEFAULT_CONTEXT_NAME, "gh", "open_pr")
                .unwrap(),
            Some(false)
        );
        assert_eq!(
            store
                .tool_override(DEFAULT_CONTEXT_NAME, "gh", "list_repos")
                .unwrap(),
            None
        );
    }

    #[test]
    fn cascade_delete_removes_memberships_and_overrides() {
        let store = test_store();
        store.ensure_default_context().unwrap();
        store.upsert_server(&stdio_def("gh")).unwrap();
        store
            .set_context_server(DEFAULT_CONTEXT_NAME, "gh", true)
            .unwrap();
        store
            .set_tool_override(DEFAULT_CONTEXT_NAME, "gh", "open_pr", false)
            .unwrap();

        store.delete_server("gh").unwrap();

        assert!(store
            .list_context_servers(DEFAULT_CONTEXT_NAME)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .tool_override(DEFAULT_CONTEXT_NAME, "gh", "open_pr")
                .unwrap(),
            None
        );
    }

    #[test]
    fn builtin_registration_is_idempotent_and_disabled_by_default() {
        let store = test_store();
        store.ensure_builtin_registered("clock").unwrap();
        store.ensure_builtin_registered("clock").unwrap();

        let servers = store.list_servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert!(!servers[0].enabled);
    }

    #[test]
    fn placement_requires_both_flags_enabled() {
        let store = test_store();
        store.upsert_server(&stdio_def("gh")).unwrap();
        store
            .upsert_placement(&Placement {
                server: "gh".to_string(),
                host: "laptop".to_string(),
                enabled: false,
            })
            .unwrap();

        assert!(!store.is_live_on_host("gh", "laptop").unwrap());
        // No placement row recorded for this host: falls back to "live"
        // since a server can be unplaced in single-host deployments.
        assert!(store.is_live_on_host("gh", "desktop").unwrap());
    }

    #[test]
    fn servers_live_on_host_excludes_servers_disabled_on_that_host() {
        let store = test_store();
        store.upsert_server(&stdio_def("gh")).unwrap();
        store.upsert_server(&stdio_def("jira")).unwrap();
        store
            .upsert_placement(&Placement {
                server: "gh".to_string(),
                host: "laptop".to_string(),
                enabled: false,
            })
            .unwrap();

        let live: Vec<String> = store
            .servers_live_on_host("laptop")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(live, vec!["jira".to_string()]);

        let live_elsewhere: Vec<String> = store
            .servers_live_on_host("desktop")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(live_elsewhere.len(), 2);
    }

    #[test]
    fn globally_disabled_server_is_never_live_regardless_of_placement() {
        let store = test_store();
        let mut def = stdio_def("gh");
        def.enabled = false;
        store.upsert_server(&def).unwrap();
        store
            .upsert_placement(&Placement {
                server: "gh".to_string(),
                host: "laptop".to_string(),
                enabled: true,
            })
            .unwrap();

        assert!(store.servers_live_on_host("laptop").unwrap().is_empty());
    }

    #[tokio::test]
    async fn mutations_that_affect_visibility_notify_subscribers() {
        let store = test_store();
        let mut changes = store.subscribe();

        store.ensure_default_context().unwrap();
        store.create_context("work", "Work context").unwrap();
        changes.recv().await.unwrap();

        store.upsert_server(&stdio_def("gh")).unwrap();
        changes.recv().await.unwrap();

        store.set_context_server("work", "gh", true).unwrap();
        changes.recv().await.unwrap();

        store
            .set_tool_override("work", "gh", "open_pr", false)
            .unwrap();
        changes.recv().await.unwrap();

        store
            .upsert_placement(&Placement {
                server: "gh".to_string(),
                host: "laptop".to_string(),
                enabled: false,
            })
            .unwrap();
        changes.recv().await.unwrap();
    }

    #[test]
    fn server_name_with_separator_is_rejected() {
        let store = test_store();
        let err = store.upsert_server(&stdio_def("gh_enterprise")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransport { .. }));
    }
}
