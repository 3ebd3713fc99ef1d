//! File-backed [`MappingStore`] persisting a single JSON document.
//!
//! Writes use an atomic `.tmp` + rename so a crashed run never leaves a
//! truncated store behind. Records whose TTL window has elapsed are purged
//! on open, mirroring a backend's native expiry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use roster_core::types::{
    AuditCursor, InvitationRecord, InvitationStatus, MemberRole, RecordKey,
};

use crate::error::{io_err, StoreError};
use crate::traits::MappingStore;

/// On-disk store payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    records: Vec<InvitationRecord>,
    #[serde(default)]
    cursors: HashMap<String, AuditCursor>,
}

/// Mapping store backed by one JSON file.
///
/// All mutations rewrite the whole document; the store is sized for
/// organization rosters, not bulk data.
pub struct JsonMappingStore {
    path: PathBuf,
    ttl_days: i64,
    state: Mutex<StoreFile>,
}

impl JsonMappingStore {
    /// Open the store at `path`, creating an empty one if the file does not
    /// yet exist. Expired records are dropped on load.
    pub fn open(path: impl Into<PathBuf>, ttl_days: i64) -> Result<JsonMappingStore, StoreError> {
        let path = path.into();
        let mut file = load_file(&path)?;

        let now = Utc::now().timestamp();
        let before = file.records.len();
        file.records.retain(|record| record.ttl > now);
        if file.records.len() < before {
            debug!(
                purged = before - file.records.len(),
                path = %path.display(),
                "purged expired mapping records",
            );
        }

        Ok(JsonMappingStore {
            path,
            ttl_days,
            state: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mutate the in-memory state, then persist the whole document.
    fn with_state<T>(
        &self,
        apply: impl FnOnce(&mut StoreFile) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))?;
        let value = apply(&mut state)?;
        save_file(&self.path, &state)?;
        Ok(value)
    }

    fn read_state<T>(&self, read: impl FnOnce(&StoreFile) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))?;
        Ok(read(&state))
    }

    fn not_found(organization: &str, key: &RecordKey) -> StoreError {
        StoreError::RecordNotFound {
            organization: organization.to_string(),
            key: key.to_string(),
        }
    }
}

fn load_file(path: &Path) -> Result<StoreFile, StoreError> {
    if !path.exists() {
        return Ok(StoreFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write to `<path>.tmp` then rename into place.
fn save_file(path: &Path, file: &StoreFile) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid store path")));
    };
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn find_mut<'a>(
    state: &'a mut StoreFile,
    organization: &str,
    key: &RecordKey,
) -> Option<&'a mut InvitationRecord> {
    state
        .records
        .iter_mut()
        .find(|record| record.organization == organization && record.key == *key)
}

#[async_trait]
impl MappingStore for JsonMappingStore {
    async fn save(&self, record: InvitationRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            // Same-key save is a replace.
            state
                .records
                .retain(|r| !(r.organization == record.organization && r.key == record.key));
            state.records.push(record);
            Ok(())
        })
    }

    async fn get(
        &self,
        organization: &str,
        key: &RecordKey,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        self.read_state(|state| {
            state
                .records
                .iter()
                .find(|record| record.organization == organization && record.key == *key)
                .cloned()
        })
    }

    async fn by_email(
        &self,
        organization: &str,
        email: &str,
    ) -> Result<Vec<InvitationRecord>, StoreError> {
        self.read_state(|state| {
            state
                .records
                .iter()
                .filter(|record| {
                    record.organization == organization
                        && record.email.eq_ignore_ascii_case(email)
                })
                .cloned()
                .collect()
        })
    }

    async fn by_status(
        &self,
        organization: &str,
        status: InvitationStatus,
    ) -> Result<Vec<InvitationRecord>, StoreError> {
        self.read_state(|state| {
            state
                .records
                .iter()
                .filter(|record| record.organization == organization && record.status == status)
                .cloned()
                .collect()
        })
    }

    async fn resolve(
        &self,
        organization: &str,
        key: &RecordKey,
        account_handle: &str,
    ) -> Result<(), StoreError> {
        let ttl_days = self.ttl_days;
        self.with_state(|state| {
            let record =
                find_mut(state, organization, key).ok_or_else(|| Self::not_found(organization, key))?;
            record.resolve(account_handle, ttl_days);
            Ok(())
        })
    }

    async fn update_status(
        &self,
        organization: &str,
        key: &RecordKey,
        status: InvitationStatus,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            let record =
                find_mut(state, organization, key).ok_or_else(|| Self::not_found(organization, key))?;
            record.status = status;
            if status != InvitationStatus::Pending && record.resolved_at.is_none() {
                record.resolved_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    async fn update_role(
        &self,
        organization: &str,
        key: &RecordKey,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            let record =
                find_mut(state, organization, key).ok_or_else(|| Self::not_found(organization, key))?;
            record.role = role;
            Ok(())
        })
    }

    async fn resolved_mappings(
        &self,
        organization: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        self.read_state(|state| {
            state
                .records
                .iter()
                .filter(|record| {
                    record.organization == organization
                        && record.status == InvitationStatus::Resolved
                })
                .filter_map(|record| {
                    record
                        .account_handle
                        .as_ref()
                        .map(|handle| (record.email.to_ascii_lowercase(), handle.clone()))
                })
                .collect()
        })
    }

    async fn audit_cursor(&self, organization: &str) -> Result<Option<AuditCursor>, StoreError> {
        self.read_state(|state| state.cursors.get(organization).cloned())
    }

    async fn save_audit_cursor(&self, cursor: AuditCursor) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.cursors.insert(cursor.organization.clone(), cursor);
            Ok(())
        })
    }
}
