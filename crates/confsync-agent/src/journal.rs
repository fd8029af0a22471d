//! Local result journal
//!
//! A Result is journaled before it is published. If the agent dies between
//! applying a request and publishing its Result, the next cycle finds the
//! journal entry and republishes it instead of applying again.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use confsync_model::{ChangeResult, RequestId};
use tokio::fs;
use tracing::debug;

use crate::error::AgentError;

/// `state_dir/results/{id}.json`
#[derive(Debug, Clone)]
pub struct ResultJournal {
    dir: PathBuf,
}

impl ResultJournal {
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("results"),
        }
    }

    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &RequestId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Durably record `result`
    ///
    /// # Errors
    /// The journal directory or entry could not be written
    pub async fn record(&self, result: &ChangeResult) -> Result<(), AgentError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::io(&self.dir, e))?;
        let bytes = serde_json::to_vec_pretty(result).map_err(|e| AgentError::Journal {
            id: result.request_id.to_string(),
            message: e.to_string(),
        })?;
        let path = self.path_of(&result.request_id);
        let tmp = self.dir.join(format!(".{}.tmp", result.request_id));
        fs::write(&tmp, bytes).await.map_err(|e| AgentError::io(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| AgentError::io(&path, e))?;
        debug!(request = %result.request_id, "Result journaled");
        Ok(())
    }

    /// Journaled result for `id`
    ///
    /// # Errors
    /// The entry exists but cannot be read or parsed
    pub async fn get(&self, id: &RequestId) -> Result<Option<ChangeResult>, AgentError> {
        let path = self.path_of(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AgentError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AgentError::Journal {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    /// Drop the entry once its Result is published
    ///
    /// # Errors
    /// The entry exists but cannot be removed
    pub async fn remove(&self, id: &RequestId) -> Result<(), AgentError> {
        let path = self.path_of(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::io(path, e)),
        }
    }
}
