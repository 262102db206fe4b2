//! `diane servers ...`: CRUD over server definitions (spec.md §3, §4.6).
//! Thin wrapper over `diane_storage::Store`; all validation (name
//! uniqueness, transport-kind-specific fields) lives there already.

use std::collections::HashMap;

use anyhow::Result;
use comfy_table::{Cell, Table};
use diane_core::model::{ServerDefinition, Transport};

use crate::cli::ServersCommand;

use super::open_store;

pub fn execute(config: &diane_config::AppConfig, command: ServersCommand) -> Result<()> {
    let store = open_store(config)?;

    match command {
        ServersCommand::List => {
            let servers = store.list_servers()?;
            let mut table = Table::new();
            table.set_header(vec!["name", "transport", "enabled"]);
            for server in servers {
                table.add_row(vec![
                    Cell::new(&server.name),
                    Cell::new(server.transport.kind_name()),
                    Cell::new(server.enabled),
                ]);
            }
            println!("{table}");
        }
        ServersCommand::AddStdio { name, command, args } => {
            store.upsert_server(&ServerDefinition {
                name,
                transport: Transport::Stdio {
                    command,
                    args,
                    env: HashMap::new(),
                },
                enabled: true,
                placement: None,
            })?;
        }
        ServersCommand::AddHttp { name, url } => {
            store.upsert_server(&ServerDefinition {
                name,
                transport: Transport::Http {
                    url,
                    headers: HashMap::new(),
                    oauth: None,
                },
                enabled: true,
                placement: None,
            })?;
        }
        ServersCommand::AddSse { name, url } => {
            store.upsert_server(&ServerDefinition {
                name,
                transport: Transport::Sse {
                    url,
                    headers: HashMap::new(),
                    oauth: None,
                },
                enabled: true,
                placement: None,
            })?;
        }
        ServersCommand::SetEnabled { name, enabled } => {
            store.set_server_enabled(&name, enabled)?;
        }
        ServersCommand::Remove { name } => {
            store.delete_server(&name)?;
        }
    }
    Ok(())
}
