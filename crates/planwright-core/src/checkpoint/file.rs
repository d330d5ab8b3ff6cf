use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{Checkpoint, CheckpointStore, SessionSummary};
use crate::synthesis::AgentOutput;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const OUTPUTS_DIR: &str = "outputs";

/// Stores each session in its own directory under `root`:
///
/// ```text
/// <root>/<session-id>/checkpoint.json
/// <root>/<session-id>/outputs/<round>-<agent-id>.json
/// ```
///
/// Checkpoints are replaced atomically (write to a temp file, then rename).
/// Output files are written to a temp file and hard-linked into place, so
/// a visible output file is always complete and never overwritten.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn output_path(&self, session_id: Uuid, output: &AgentOutput) -> PathBuf {
        let agent: String = output
            .agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.session_dir(session_id)
            .join(OUTPUTS_DIR)
            .join(format!("{:02}-{agent}.json", output.round))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Flush directory entries so a rename or link survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .await
        .with_context(|| format!("failed to open {}", dir.display()))?
        .sync_all()
        .await
        .with_context(|| format!("failed to sync {}", dir.display()))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.session_dir(checkpoint.session_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let bytes = serde_json::to_vec_pretty(&checkpoint.to_value()?)?;
        let target = dir.join(CHECKPOINT_FILE);
        let tmp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));

        write_synced(&tmp, &bytes).await?;
        fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("failed to move checkpoint into {}", target.display()))?;
        sync_dir(&dir).await
    }

    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<Checkpoint>> {
        let path = self.session_dir(session_id).join(CHECKPOINT_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let payload = serde_json::from_slice(&bytes)
            .with_context(|| format!("checkpoint {} is not valid JSON", path.display()))?;
        Ok(Some(Checkpoint::from_value(payload)?))
    }

    async fn append_agent_outputs(&self, session_id: Uuid, outputs: &[AgentOutput]) -> Result<usize> {
        let dir = self.session_dir(session_id).join(OUTPUTS_DIR);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut written = 0;
        for output in outputs {
            let path = self.output_path(session_id, output);
            if fs::try_exists(&path).await? {
                continue;
            }
            let tmp = path.with_extension("json.tmp");
            write_synced(&tmp, &serde_json::to_vec_pretty(output)?).await?;

            // Linking fails if the target exists, which keeps the first write.
            let linked = fs::hard_link(&tmp, &path).await;
            fs::remove_file(&tmp)
                .await
                .with_context(|| format!("failed to remove {}", tmp.display()))?;
            match linked {
                Ok(()) => written += 1,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to link {}", path.display()));
                }
            }
        }
        if written > 0 {
            sync_dir(&dir).await?;
        }
        Ok(written)
    }

    async fn load_agent_outputs(&self, session_id: Uuid, round: u32) -> Result<Vec<AgentOutput>> {
        let dir = self.session_dir(session_id).join(OUTPUTS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", dir.display()));
            }
        };

        let prefix = format!("{round:02}-");
        let mut outputs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();
            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let output: AgentOutput = serde_json::from_slice(&bytes)
                .with_context(|| format!("agent output {} is not valid JSON", path.display()))?;
            // File names are sanitized; the payload carries the exact round.
            if output.round == round {
                outputs.push(output);
            }
        }
        outputs.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(outputs)
    }

    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<SessionSummary>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", self.root.display()));
            }
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(session_id) = entry.file_name().to_string_lossy().parse::<Uuid>() else {
                continue;
            };
            match self.load_checkpoint(session_id).await {
                Ok(Some(cp)) if user_id.is_none_or(|u| u == cp.user_id) => {
                    summaries.push(cp.summary());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "skipping unreadable checkpoint");
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
