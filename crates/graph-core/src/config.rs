//! Runtime settings for a Graph instance.
//!
//! Settings are loaded from (in priority order):
//! 1. Environment variables (`GRAPH__` prefix, e.g. `GRAPH__DISPATCH=background`)
//! 2. Config file (`graph.toml` by default)
//! 3. Defaults

use serde::Deserialize;

use crate::error::Result;

/// Where watch handlers run.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the committing thread, before `commit` returns.
    #[default]
    Inline,
    /// On a background tokio task, in commit order.
    Background,
}

/// Whether context-scoped reads see staged changes.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    #[default]
    Committed,
    IncludeStaged,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GraphSettings {
    #[serde(default)]
    pub dispatch: DispatchMode,

    #[serde(default)]
    pub read_mode: ReadMode,

    /// Depth cap applied to traversals that do not set their own.
    #[serde(default = "default_traversal_max_depth")]
    pub traversal_max_depth: usize,

    /// JSON store location for file-backed graphs.
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

fn default_traversal_max_depth() -> usize {
    64
}

fn default_store_path() -> String {
    "./graph.json".to_string()
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            read_mode: ReadMode::default(),
            traversal_max_depth: default_traversal_max_depth(),
            store_path: default_store_path(),
        }
    }
}

impl GraphSettings {
    /// Load settings from `{file_prefix}` (any format the `config` crate
    /// understands, optional) layered under `GRAPH__*` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("GRAPH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: GraphSettings = cfg.try_deserialize()?;
        tracing::debug!(?settings, "Graph settings loaded");
        Ok(settings)
    }
}
