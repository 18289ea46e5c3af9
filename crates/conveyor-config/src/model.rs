use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of AI round-trips a single conversation may take.
pub const DEFAULT_MAX_TURNS: usize = 8;

/// Default length above which string parameters are cut in tool-call messages.
pub const DEFAULT_PARAMETER_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_turns: usize,
    pub parameter_preview_chars: usize,
    pub tools: ToolsConfig,
    pub prompts: PromptsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            parameter_preview_chars: DEFAULT_PARAMETER_PREVIEW_CHARS,
            tools: ToolsConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

/// Site-wide tool settings.
///
/// A tool is globally enabled unless listed in `disabled`. It counts as
/// configured when `settings` holds a non-empty entry for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub disabled: Vec<String>,
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl ToolsConfig {
    pub fn is_disabled(&self, tool: &str) -> bool {
        self.disabled.iter().any(|name| name == tool)
    }

    pub fn has_settings(&self, tool: &str) -> bool {
        match self.settings.get(tool) {
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(serde_json::Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub identity: Option<String>,
    pub global: Option<String>,
    pub pipeline_instructions: Option<String>,
    pub chat_instructions: Option<String>,
    pub context_files: Vec<PathBuf>,
    pub environment: BTreeMap<String, String>,
    /// Contents of `context_files`, filled in by the loader.
    #[serde(skip)]
    pub reference_material: Vec<ReferenceDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDocument {
    pub name: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_engine_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.max_turns, 8);
        assert_eq!(config.parameter_preview_chars, 50);
        assert!(config.tools.disabled.is_empty());
    }

    #[test]
    fn tool_settings_presence() {
        let mut tools = ToolsConfig::default();
        tools
            .settings
            .insert("wordpress_publish".into(), json!({ "site": "blog" }));
        tools.settings.insert("google_search".into(), json!({}));
        tools.disabled.push("local_search".into());

        assert!(tools.has_settings("wordpress_publish"));
        assert!(!tools.has_settings("google_search"));
        assert!(!tools.has_settings("unknown"));
        assert!(tools.is_disabled("local_search"));
        assert!(!tools.is_disabled("wordpress_publish"));
    }
}
