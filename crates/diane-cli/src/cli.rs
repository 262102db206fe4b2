use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser)]
#[command(name = "diane")]
#[command(about = "Diane MCP hub: aggregates upstream MCP servers behind one filtered endpoint")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace). Overrides config/env.
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file path (defaults to no file, i.e. built-in defaults).
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite database (overrides config file and DIANE_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the hub over stdio (one session, context from DIANE_CONTEXT).
    Stdio,
    /// Serve the hub over HTTP-streamable at the configured bind address.
    Http,
    /// Serve the hub over Server-Sent Events at the configured bind address.
    Sse,
    /// Serve all three transports concurrently until interrupted.
    Serve,
    /// Manage upstream server definitions.
    Servers(ServersArgs),
    /// Manage contexts and their server memberships.
    Contexts(ContextsArgs),
}

#[derive(clap::Args)]
pub struct ServersArgs {
    #[command(subcommand)]
    pub command: ServersCommand,
}

#[derive(Subcommand)]
pub enum ServersCommand {
    /// List every registered server.
    List,
    /// Register or update a stdio-transport server.
    AddStdio {
        name: String,
        command: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Register or update an HTTP-transport server.
    AddHttp { name: String, url: String },
    /// Register or update an SSE-transport server.
    AddSse { name: String, url: String },
    /// Enable or disable a server without forgetting its definition.
    SetEnabled { name: String, enabled: bool },
    /// Remove a server definition entirely.
    Remove { name: String },
}

#[derive(clap::Args)]
pub struct ContextsArgs {
    #[command(subcommand)]
    pub command: ContextsCommand,
}

#[derive(Subcommand)]
pub enum ContextsCommand {
    /// List every context.
    List,
    /// Create a new, empty context.
    Create { name: String, description: String },
    /// Delete a context (the default context cannot be deleted).
    Delete { name: String },
    /// Make a context the one sessions fall back to absent an explicit choice.
    SetDefault { name: String },
    /// Enable or disable a server's membership in a context.
    SetServer {
        context: String,
        server: String,
        enabled: bool,
    },
}
