use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeploymentError;
use crate::layout::RemoteLayout;
use crate::ssh::Session;

static VERSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// An immutable deployment version. Appended on every successful image
/// build; never mutated, only pruned by retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_revision: Option<String>,
    pub image_digest: String,
    pub config_hash: String,
}

/// Resolves a version reference: `current`, `previous`, or an explicit id.
pub enum VersionRef {
    Current,
    Previous,
    Id(String),
}

impl VersionRef {
    pub fn parse(s: &str) -> Self {
        match s {
            "current" => VersionRef::Current,
            "previous" => VersionRef::Previous,
            other => VersionRef::Id(other.to_string()),
        }
    }
}

/// Version Store (C5). Persisted on the host under `versions/<id>/record.json`
/// next to the rendered bundle; no local mirror is kept.
pub struct VersionStore<'a> {
    session: &'a dyn Session,
    layout: &'a RemoteLayout<'a>,
}

impl<'a> VersionStore<'a> {
    pub fn new(session: &'a dyn Session, layout: &'a RemoteLayout<'a>) -> Self {
        Self { session, layout }
    }

    /// Generates a monotonically increasing, lexicographically sortable id:
    /// a fixed-width hex timestamp (milliseconds) followed by a fixed-width
    /// hex per-process counter, so same-millisecond collisions still sort.
    pub fn next_id() -> String {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let seq = VERSION_COUNTER.fetch_add(1, Ordering::SeqCst) % 0xFFFF;
        format!("{millis:013x}{seq:04x}")
    }

    pub async fn record(
        &self,
        id: &str,
        image_digest: &str,
        config_hash: &str,
        source_revision: Option<String>,
    ) -> Result<VersionRecord, DeploymentError> {
        let record = VersionRecord {
            id: id.to_string(),
            created_at: Utc::now(),
            source_revision,
            image_digest: image_digest.to_string(),
            config_hash: config_hash.to_string(),
        };

        let path = format!("{}/record.json", self.layout.version_dir(id));
        let json = serde_json::to_vec_pretty(&record).expect("VersionRecord always serializes");
        self.session.upload(&json, &path, 0o644).await?;

        Ok(record)
    }

    /// Descending order (newest first).
    pub async fn list(&self) -> Result<Vec<VersionRecord>, DeploymentError> {
        let root = self.layout.versions_root();
        if !self.session.exists(&root).await? {
            return Ok(Vec::new());
        }

        let listing = self
            .session
            .exec(&format!("ls -1 {root} 2>/dev/null || true"))
            .await?;

        let mut records = Vec::new();
        for id in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = format!("{}/record.json", self.layout.version_dir(id));
            if !self.session.exists(&path).await? {
                continue;
            }
            let bytes = self.session.download(&path).await?;
            if let Ok(record) = serde_json::from_slice::<VersionRecord>(&bytes) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }

    pub async fn resolve(&self, reference: &VersionRef) -> Result<VersionRecord, DeploymentError> {
        let records = self.list().await?;

        match reference {
            VersionRef::Current => {
                let state = self.layout.read_state().await?;
                let active = state.active_version.ok_or_else(|| DeploymentError::NoPreviousVersion {
                    deployment_id: self.layout.root().to_string(),
                })?;
                records
                    .into_iter()
                    .find(|r| r.id == active)
                    .ok_or_else(|| DeploymentError::NoPreviousVersion {
                        deployment_id: self.layout.root().to_string(),
                    })
            }
            VersionRef::Previous => records.into_iter().nth(1).ok_or_else(|| {
                DeploymentError::NoPreviousVersion {
                    deployment_id: self.layout.root().to_string(),
                }
            }),
            VersionRef::Id(id) => records
                .into_iter()
                .find(|r| &r.id == id)
                .ok_or_else(|| DeploymentError::NoPreviousVersion {
                    deployment_id: self.layout.root().to_string(),
                }),
        }
    }

    /// Prunes versions beyond `max_count` AND older than `max_age_days`
    /// (intersection, never union). The active version and its immediate
    /// predecessor are always retained for single-step rollback safety.
    pub async fn apply_retention(
        &self,
        max_count: usize,
        max_age_days: u32,
    ) -> Result<(), DeploymentError> {
        let records = self.list().await?;
        if records.len() <= max_count {
            return Ok(());
        }

        let state = self.layout.read_state().await?;
        let active = state.active_version.clone();
        let predecessor = records
            .iter()
            .position(|r| Some(&r.id) == active.as_ref())
            .and_then(|idx| records.get(idx + 1))
            .map(|r| r.id.clone());

        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);

        for (idx, record) in records.iter().enumerate() {
            let keep_for_count = idx < max_count;
            let keep_for_age = record.created_at >= cutoff;
            let keep_for_rollback_safety =
                Some(&record.id) == active.as_ref() || Some(&record.id) == predecessor.as_ref();

            if keep_for_rollback_safety || keep_for_count || keep_for_age {
                continue;
            }

            let dir = self.layout.version_dir(&record.id);
            self.session.exec(&format!("rm -rf {dir}")).await?;
        }

        Ok(())
    }
}
