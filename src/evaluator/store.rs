use super::key::AnswerKey;
use crate::detector::GridConfig;
use crate::error::{OmrError, OmrResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a sheet version needs: its key and, optionally, its layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetTemplate {
    #[serde(flatten)]
    pub key: AnswerKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridConfig>,
}

impl SheetTemplate {
    pub fn from_json_str(json: &str) -> OmrResult<Self> {
        let template: SheetTemplate = serde_json::from_str(json)
            .map_err(|e| OmrError::KeyValidation(format!("malformed sheet template: {}", e)))?;
        template.key.validate()?;
        if let Some(grid) = &template.grid {
            grid.validate()?;
        }
        Ok(template)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OmrResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Declared layout, or one derived from the key.
    pub fn grid_or_derived(&self) -> GridConfig {
        self.grid.clone().unwrap_or_else(|| self.key.derive_grid())
    }
}

/// External configuration/storage collaborator that resolves sheet versions.
pub trait KeySource: Send + Sync {
    /// `Ok(None)` when the version is simply not known to this source.
    fn load(&self, version: &str) -> OmrResult<Option<SheetTemplate>>;
}

/// Reads `<root>/<version>.json`.
pub struct DirectoryKeySource {
    root: PathBuf,
}

impl DirectoryKeySource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl KeySource for DirectoryKeySource {
    fn load(&self, version: &str) -> OmrResult<Option<SheetTemplate>> {
        let safe = !version.is_empty()
            && !version.contains(['/', '\\'])
            && version != "."
            && version != "..";
        if !safe {
            return Ok(None);
        }
        let path = self.root.join(format!("{}.json", version));
        if !path.is_file() {
            return Ok(None);
        }
        debug!(path = %path.display(), "Loading sheet template");
        let mut template = SheetTemplate::load_from_file(&path)?;
        if template.key.version.is_empty() {
            template.key.version = version.to_string();
        }
        Ok(Some(template))
    }
}
