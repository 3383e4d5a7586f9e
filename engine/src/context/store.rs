//! Context persistence keyed by workflow id.

use crate::context::diagnostics::DiagnosticBundle;
use crate::context::types::{WorkflowContext, WorkflowId};
use crate::error::{ContextError, ContextResult};
use crate::fs_atomic::atomic_write_json;
use std::path::{Path, PathBuf};

const CONTEXT_FILE: &str = "context.json";
const DIAGNOSTICS_FILE: &str = "diagnostics.json";

/// Durable storage for workflow contexts and their diagnostic bundles.
pub trait ContextStore: Send + Sync {
    fn save_context(&self, ctx: &WorkflowContext) -> ContextResult<()>;

    fn load_context(&self, id: WorkflowId) -> ContextResult<Option<WorkflowContext>>;

    /// Write the bundle once. A second write for the same id is an error.
    fn save_diagnostic_bundle(&self, bundle: &DiagnosticBundle) -> ContextResult<()>;

    fn load_diagnostic_bundle(&self, id: WorkflowId) -> ContextResult<Option<DiagnosticBundle>>;
}

/// `<root>/<workflow_id>/{context.json,diagnostics.json}`, written atomically.
#[derive(Debug, Clone)]
pub struct FileContextStore {
    root: PathBuf,
}

impl FileContextStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflow_dir(&self, id: WorkflowId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Workflow ids with a persisted context, newest directory last.
    pub fn list(&self) -> ContextResult<Vec<WorkflowId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<(std::time::SystemTime, WorkflowId)> = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<WorkflowId>().ok())
            else {
                continue;
            };
            if !entry.path().join(CONTEXT_FILE).exists() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            ids.push((modified, id));
        }
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> ContextResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let value = serde_json::from_str(&raw).map_err(|e| ContextError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }
}

impl ContextStore for FileContextStore {
    fn save_context(&self, ctx: &WorkflowContext) -> ContextResult<()> {
        let path = self.workflow_dir(ctx.workflow_id()).join(CONTEXT_FILE);
        atomic_write_json(&path, ctx)?;
        Ok(())
    }

    fn load_context(&self, id: WorkflowId) -> ContextResult<Option<WorkflowContext>> {
        Self::read_json(&self.workflow_dir(id).join(CONTEXT_FILE))
    }

    fn save_diagnostic_bundle(&self, bundle: &DiagnosticBundle) -> ContextResult<()> {
        let path = self.workflow_dir(bundle.workflow_id).join(DIAGNOSTICS_FILE);
        if path.exists() {
            return Err(ContextError::BundleExists {
                id: bundle.workflow_id,
            });
        }
        atomic_write_json(&path, bundle)?;
        Ok(())
    }

    fn load_diagnostic_bundle(&self, id: WorkflowId) -> ContextResult<Option<DiagnosticBundle>> {
        Self::read_json(&self.workflow_dir(id).join(DIAGNOSTICS_FILE))
    }
}
