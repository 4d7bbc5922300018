//! Model Resolution
//!
//! Static table from caller-facing model ids to upstream identifiers.
//! - Built-in defaults cover the upstream's published models
//! - Optional JSON or YAML file replaces the table at startup
//! - Unknown ids pass through unchanged
//! - Produces the OpenAI-style `/v1/models` listing

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{ModelCard, ModelList};

/// Upstream id used when a request names no model.
pub const DEFAULT_MODEL: &str = "deepseek70b";

/// Base `created` timestamp of the model listing; entries count up from here.
const LISTING_EPOCH: u64 = 1_677_650_000;

const BUILTIN: &[(&str, &str)] = &[
    ("deepseek-r1-70b", "deepseek70b"),
    ("deepseek-r1-turbo", "deepseekr1turbo"),
    ("deepseek-r1-turbo-2", "deepseekr1turbo2"),
    ("deepseek-r1-turbo-3", "deepseekr1turbo3"),
    ("deepseek-ai/DeepSeek-R1-Turbo", "deepseekr1turbo"),
    ("deepseek-ai/DeepSeek-V3-Turbo", "deepseekv3turbo"),
    ("deepseek-v3-turbo", "deepseekv3turbo"),
    ("deepseek-v3-turbo2", "deepseekv3turbo2"),
    ("deepseek-v3-0324-3", "deepseekv303243"),
    ("deepseek-v3-0324-2", "deepseekv303242"),
    ("deepseek-v3-0324", "deepseekv30324"),
    ("deepseek-r1-search", "volcengine"),
    ("grok-3", "grok3"),
    ("grok-3-search", "grok3search"),
    ("grok-3-deepsearch", "grok3deepsearch"),
    ("grok-3-reasoning", "grok3reasoning"),
    ("qwen-32b", "qwen32b"),
    ("qwq-32b", "qwq32b"),
];

/// One caller id → upstream id mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelAlias {
    /// Caller-facing model id
    pub alias: String,

    /// Upstream model identifier
    pub target: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMap {
    #[serde(default)]
    pub aliases: Vec<ModelAlias>,

    /// Upstream id used for requests without a model
    #[serde(default = "default_model")]
    pub default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMapStats {
    pub total_aliases: usize,
    pub enabled_aliases: usize,
    pub distinct_targets: usize,
}

impl Default for ModelMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelMap {
    /// The upstream's published model table.
    pub fn builtin() -> Self {
        Self {
            aliases: BUILTIN
                .iter()
                .map(|(alias, target)| ModelAlias {
                    alias: (*alias).to_string(),
                    target: (*target).to_string(),
                    owned_by: None,
                    enabled: true,
                })
                .collect(),
            default_model: default_model(),
        }
    }

    /// Load a table from a `.json`, `.yaml` or `.yml` file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading model map {}", path.display()))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let map: ModelMap = match ext.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") | None => serde_json::from_str(&content)?,
            Some(other) => return Err(anyhow!("unsupported model map format: .{other}")),
        };

        if map.default_model.trim().is_empty() {
            return Err(anyhow!("model map default_model must not be empty"));
        }
        tracing::info!(
            path = %path.display(),
            aliases = map.aliases.len(),
            "loaded model map"
        );
        Ok(map)
    }

    /// Map a caller id to its upstream id; unknown ids pass through unchanged.
    pub fn resolve_alias(&self, model: &str) -> String {
        self.aliases
            .iter()
            .find(|a| a.enabled && a.alias == model)
            .map(|a| a.target.clone())
            .unwrap_or_else(|| model.to_string())
    }

    /// Resolve an optional request model, using `default_model` when absent or blank.
    pub fn resolve(&self, model: Option<&str>) -> String {
        match model.map(str::trim) {
            Some(m) if !m.is_empty() => self.resolve_alias(m),
            _ => self.default_model.clone(),
        }
    }

    /// OpenAI-style listing of enabled aliases.
    pub fn model_list(&self) -> ModelList {
        let data = self
            .aliases
            .iter()
            .filter(|a| a.enabled)
            .enumerate()
            .map(|(idx, a)| ModelCard {
                id: a.alias.clone(),
                object: "model".into(),
                created: LISTING_EPOCH + idx as u64,
                owned_by: a.owned_by.clone().unwrap_or_else(|| owner_of(&a.alias)),
                permission: Vec::new(),
                root: a.target.clone(),
                parent: None,
            })
            .collect();
        ModelList {
            object: "list".into(),
            data,
        }
    }

    pub fn stats(&self) -> ModelMapStats {
        let mut targets: Vec<&str> = self.aliases.iter().map(|a| a.target.as_str()).collect();
        targets.sort_unstable();
        targets.dedup();
        ModelMapStats {
            total_aliases: self.aliases.len(),
            enabled_aliases: self.aliases.iter().filter(|a| a.enabled).count(),
            distinct_targets: targets.len(),
        }
    }
}

fn owner_of(model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    if lower.contains("deepseek") {
        "deepseek".into()
    } else if lower.contains("grok") {
        "xai".into()
    } else {
        "alibaba".into()
    }
}
