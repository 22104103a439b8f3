use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use tracing::info;

use docvault_core::audit::RequestContext;
use docvault_core::config::VaultConfig;
use docvault_core::error::KeyRole;
use docvault_core::keys::{fingerprint_of, generate_key_pair, load_pem, write_key_pair};
use docvault_core::record::{AccessScope, DocumentId, OwnerId};
use docvault_core::service::{LocalVault, UploadRequest};
use docvault_core::store::ListFilter;

use crate::{Cli, Commands};

pub fn run(cli: Cli) -> Result<()> {
    let config = VaultConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Keygen { dir } => {
            let generated = match dir {
                Some(dir) => generate_key_pair(&dir)?,
                None => write_key_pair(&config.private_key_path, &config.public_key_path)?,
            };
            println!("private key: {}", generated.private_key_path.display());
            println!("public key:  {}", generated.public_key_path.display());
            println!("fingerprint: {}", generated.fingerprint);
        }
        Commands::Fingerprint => {
            let pem = load_pem(&config.public_key_path, KeyRole::Public)?;
            println!("{}", fingerprint_of(&pem));
        }
        Commands::Upload {
            file,
            owner,
            mime,
            name,
        } => {
            let bytes = fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let file_name = match name {
                Some(n) => n,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow!("cannot derive a name from {}", file.display()))?,
            };
            let vault = LocalVault::open(&config)?;
            let ctx = RequestContext::new(owner.as_str()).with_role("USER");
            let summary = vault.upload(
                &ctx,
                UploadRequest {
                    file_name,
                    mime_type: mime.unwrap_or_default(),
                    bytes,
                },
            )?;
            print_json(&summary)?;
        }
        Commands::Download { id, out, scope } => {
            let id = parse_id(&id)?;
            let (ctx, scope) = scope.resolve();
            let vault = LocalVault::open(&config)?;
            let doc = vault.download(&ctx, &id, &scope)?;
            fs::write(&out, &doc.bytes).with_context(|| format!("write {}", out.display()))?;
            info!(document_id = %id, out = %out.display(), "document written");
            println!("{}", out.display());
        }
        Commands::Verify { id, scope } => {
            let id = parse_id(&id)?;
            let (ctx, scope) = scope.resolve();
            let vault = LocalVault::open(&config)?;
            print_json(&vault.verify(&ctx, &id, &scope)?)?;
        }
        Commands::List {
            owner,
            name,
            since,
            until,
        } => {
            let filter = ListFilter {
                name_contains: name,
                created_from: since.as_deref().map(|s| parse_bound(s, false)).transpose()?,
                created_to: until.as_deref().map(|s| parse_bound(s, true)).transpose()?,
            };
            let (ctx, scope) = match owner {
                Some(o) => (
                    RequestContext::new(o.as_str()).with_role("USER"),
                    AccessScope::Owner(OwnerId::new(o)),
                ),
                None => (
                    RequestContext::new("admin").with_role("ADMIN"),
                    AccessScope::Any,
                ),
            };
            let vault = LocalVault::open(&config)?;
            print_json(&vault.list(&ctx, &scope, &filter)?)?;
        }
        Commands::Rename { id, name, scope } => {
            let id = parse_id(&id)?;
            let (ctx, scope) = scope.resolve();
            let vault = LocalVault::open(&config)?;
            print_json(&vault.rename(&ctx, &id, &scope, &name)?)?;
        }
        Commands::Delete { id, scope } => {
            let id = parse_id(&id)?;
            let (ctx, scope) = scope.resolve();
            let vault = LocalVault::open(&config)?;
            print_json(&vault.delete(&ctx, &id, &scope)?)?;
        }
        Commands::Audit { limit, since } => {
            let since = since.as_deref().map(parse_rfc3339).transpose()?;
            let vault = LocalVault::open(&config)?;
            for entry in vault.audit().read_recent(since, limit)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::AuditVerify => {
            let vault = LocalVault::open(&config)?;
            let report = vault.audit().verify_chain()?;
            if let Some(broken) = report.broken {
                bail!(
                    "audit log chain broken at line {}: {}",
                    broken.line,
                    broken.reason
                );
            }
            println!("audit log intact: {} entries", report.entries);
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<DocumentId> {
    Ok(raw.parse::<DocumentId>()?)
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp: {raw}"))
}

/// A bare date covers the whole day: its start for a lower bound, its last
/// instant for an upper one.
fn parse_bound(raw: &str, upper: bool) -> Result<DateTime<Utc>> {
    let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        return parse_rfc3339(raw);
    };
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date: {raw}"))?
        .and_utc();
    Ok(if upper {
        start + Duration::days(1) - Duration::nanoseconds(1)
    } else {
        start
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
