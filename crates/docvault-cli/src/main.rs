mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docvault_core::audit::RequestContext;
use docvault_core::record::{AccessScope, OwnerId};

#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted, signed document vault", long_about = None)]
struct Cli {
    /// Configuration file (defaults to <data dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Whose documents a command may touch.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ScopeArgs {
    /// Act as this owner; only their documents are visible
    #[arg(long)]
    owner: Option<String>,
    /// Act as an administrator over every document
    #[arg(long)]
    any: bool,
}

impl ScopeArgs {
    fn resolve(&self) -> (RequestContext, AccessScope) {
        match &self.owner {
            Some(owner) => (
                RequestContext::new(owner.as_str()).with_role("USER"),
                AccessScope::Owner(OwnerId::new(owner.as_str())),
            ),
            None => (
                RequestContext::new("admin").with_role("ADMIN"),
                AccessScope::Any,
            ),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a signing keypair (never overwrites existing keys)
    Keygen {
        /// Write both files here instead of the configured key paths
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print the fingerprint of the configured public key
    Fingerprint,
    /// Protect and store a file
    Upload {
        file: PathBuf,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        mime: Option<String>,
        /// Stored name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Verify and write a document's plaintext; nothing is written on failure
    Download {
        id: String,
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Check integrity and signature without releasing plaintext
    Verify {
        id: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// List documents, newest first
    List {
        #[arg(long)]
        owner: Option<String>,
        /// Case-insensitive substring of the document name
        #[arg(long)]
        name: Option<String>,
        /// Created at or after (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Created at or before (RFC 3339, or YYYY-MM-DD for the whole day)
        #[arg(long)]
        until: Option<String>,
    },
    Rename {
        id: String,
        name: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    Delete {
        id: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Show recent audit events, newest first
    Audit {
        #[arg(long)]
        limit: Option<usize>,
        /// RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
    },
    /// Check the audit log hash chain and signatures
    AuditVerify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    commands::run(cli)
}
