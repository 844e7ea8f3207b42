//! Filesystem-backed topology checkpoints: one JSON file per saved
//! snapshot under `<state dir>/.patchctl/checkpoints/`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

pub const STATE_DIR: &str = ".patchctl";
pub const CHECKPOINT_DIR: &str = "checkpoints";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub checkpoint_id: String,
    pub label: String,
    pub created_at: String,
    pub box_count: usize,
    pub line_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    meta: CheckpointMeta,
    snapshot: Snapshot,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: &Path) -> Self {
        CheckpointStore {
            dir: root.join(STATE_DIR).join(CHECKPOINT_DIR),
        }
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist a snapshot and return its metadata.
    pub fn save(&self, snapshot: &Snapshot, label: &str) -> anyhow::Result<CheckpointMeta> {
        self.ensure_dir()?;
        let now = chrono::Utc::now();
        let meta = CheckpointMeta {
            checkpoint_id: format!("ckpt-{}", now.timestamp_millis()),
            label: label.to_string(),
            created_at: now.to_rfc3339(),
            box_count: snapshot.boxes.len(),
            line_count: snapshot.lines.len(),
        };
        let file = CheckpointFile {
            meta: meta.clone(),
            snapshot: snapshot.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(self.path_for(&meta.checkpoint_id), json)?;
        tracing::debug!(id = %meta.checkpoint_id, "checkpoint saved");
        Ok(meta)
    }

    /// All checkpoint metadata, newest first.
    pub fn list(&self) -> anyhow::Result<Vec<CheckpointMeta>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| Ok(serde_json::from_str::<CheckpointFile>(&s)?))
            {
                Ok(file) => metas.push(file.meta),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "unreadable checkpoint")
                }
            }
        }
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }

    /// Load one checkpoint's snapshot.
    pub fn load(&self, id: &str) -> anyhow::Result<Snapshot> {
        let path = self.path_for(id);
        let json = fs::read_to_string(&path)?;
        let file: CheckpointFile = serde_json::from_str(&json)?;
        Ok(file.snapshot)
    }
}
