//! `diane contexts ...`: CRUD over contexts and their server memberships
//! (spec.md §3, §4.3, §4.6).

use anyhow::Result;
use comfy_table::{Cell, Table};

use crate::cli::ContextsCommand;

use super::open_store;

pub fn execute(config: &diane_config::AppConfig, command: ContextsCommand) -> Result<()> {
    let store = open_store(config)?;

    match command {
        ContextsCommand::List => {
            let contexts = store.list_contexts()?;
            let mut table = Table::new();
            table.set_header(vec!["name", "description", "default"]);
            for context in contexts {
                table.add_row(vec![
                    Cell::new(&context.name),
                    Cell::new(&context.description),
                    Cell::new(context.is_default),
                ]);
            }
            println!("{table}");
        }
        ContextsCommand::Create { name, description } => {
            store.create_context(&name, &description)?;
        }
        ContextsCommand::Delete { name } => {
            store.delete_context(&name)?;
        }
        ContextsCommand::SetDefault { name } => {
            store.set_default_context(&name)?;
        }
        ContextsCommand::SetServer {
            context,
            server,
            enabled,
        } => {
            store.set_context_server(&context, &server, enabled)?;
        }
    }
    Ok(())
}
