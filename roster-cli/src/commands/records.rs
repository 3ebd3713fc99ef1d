//! `roster records` — inspect the persisted invitation mapping store.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::Args;

use roster_core::types::{InvitationRecord, InvitationStatus};
use roster_core::Config;
use roster_sync::{JsonMappingStore, MappingStore};

/// Thin wrapper so clap can parse [`InvitationStatus`] from CLI args.
#[derive(Debug, Clone)]
pub struct StatusArg(pub InvitationStatus);

impl FromStr for StatusArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self(InvitationStatus::Pending)),
            "resolved" => Ok(Self(InvitationStatus::Resolved)),
            "failed" => Ok(Self(InvitationStatus::Failed)),
            "expired" => Ok(Self(InvitationStatus::Expired)),
            "cancelled" => Ok(Self(InvitationStatus::Cancelled)),
            "removed" => Ok(Self(InvitationStatus::Removed)),
            other => Err(format!(
                "unknown status '{other}'; expected: pending, resolved, failed, expired, cancelled, removed"
            )),
        }
    }
}

impl fmt::Display for StatusArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Args, Debug)]
pub struct RecordsArgs {
    /// Path to the YAML configuration file.
    #[arg(long, short)]
    pub config: PathBuf,

    /// Only show records in this lifecycle status.
    #[arg(long)]
    pub status: Option<StatusArg>,

    /// Emit records as JSON instead of one line per record.
    #[arg(long)]
    pub json: bool,
}

const ALL_STATUSES: [InvitationStatus; 6] = [
    InvitationStatus::Pending,
    InvitationStatus::Resolved,
    InvitationStatus::Failed,
    InvitationStatus::Expired,
    InvitationStatus::Cancelled,
    InvitationStatus::Removed,
];

impl RecordsArgs {
    pub async fn run(self) -> Result<()> {
        let config = Config::load(&self.config)
            .with_context(|| format!("invalid configuration at {}", self.config.display()))?;
        if !config.store.enabled {
            bail!("the mapping store is disabled in {}", self.config.display());
        }

        let store = JsonMappingStore::open(&config.store.path, config.store.ttl_days)
            .with_context(|| format!("opening store at {}", config.store.path.display()))?;
        let organization = &config.target.organization;

        let statuses: Vec<InvitationStatus> = match &self.status {
            Some(status) => vec![status.0],
            None => ALL_STATUSES.to_vec(),
        };

        let mut records: Vec<InvitationRecord> = Vec::new();
        for status in statuses {
            records.extend(store.by_status(organization, status).await?);
        }
        records.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));

        if self.json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if records.is_empty() {
            println!("no records for organization {organization}");
            return Ok(());
        }
        for record in &records {
            println!(
                "{:<24} {:<10} {:<8} {:<32} {} invited {}",
                record.key.to_string(),
                record.status,
                record.role,
                record.email,
                record.account_handle.as_deref().unwrap_or("-"),
                record.invited_at.format("%Y-%m-%d"),
            );
        }
        println!("{} record(s)", records.len());
        Ok(())
    }
}
