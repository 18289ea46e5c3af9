use std::path::{Path, PathBuf};

use conveyor_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::{EngineConfig, ReferenceDocument};

const CONFIG_DIR_NAME: &str = "conveyor";
const ENV_MAX_TURNS: &str = "CONVEYOR_MAX_TURNS";
const ENV_PREVIEW_CHARS: &str = "CONVEYOR_PREVIEW_CHARS";

/// Loads [`EngineConfig`] from a YAML or TOML file, then applies
/// environment overrides and reads the configured context files.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// `<config dir>/conveyor/config.yml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.yml"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Result<EngineConfig> {
        let mut config = match &self.path {
            Some(path) if path.exists() => {
                info!("loading engine config from {}", path.display());
                parse_file(path)?
            }
            Some(path) => {
                debug!("no config at {}, using defaults", path.display());
                EngineConfig::default()
            }
            None => EngineConfig::default(),
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok());

        let base_dir = self
            .path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        load_reference_material(&mut config, base_dir.as_deref())?;

        Ok(config)
    }
}

fn parse_file(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("yml") | Some("yaml") => Ok(serde_yaml::from_str(&raw)?),
        Some("toml") => Ok(toml::from_str(&raw)?),
        Some("json") => Ok(serde_json::from_str(&raw)?),
        other => Err(Error::Config(format!(
            "unsupported config format '{}' for {}",
            other.unwrap_or(""),
            path.display()
        ))),
    }
}

/// Apply `CONVEYOR_*` overrides. `lookup` abstracts the environment so the
/// rules can be exercised without mutating process state.
pub(crate) fn apply_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(ENV_MAX_TURNS) {
        match raw.trim().parse::<usize>() {
            Ok(value) => config.max_turns = value,
            Err(_) => warn!("ignoring invalid {ENV_MAX_TURNS} value '{raw}'"),
        }
    }
    if let Some(raw) = lookup(ENV_PREVIEW_CHARS) {
        match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 => config.parameter_preview_chars = value,
            _ => warn!("ignoring invalid {ENV_PREVIEW_CHARS} value '{raw}'"),
        }
    }
}

fn load_reference_material(config: &mut EngineConfig, base_dir: Option<&Path>) -> Result<()> {
    let mut documents = Vec::with_capacity(config.prompts.context_files.len());
    for file in &config.prompts.context_files {
        let resolved = match base_dir {
            Some(base) if file.is_relative() => base.join(file),
            _ => file.clone(),
        };
        let content = std::fs::read_to_string(&resolved).map_err(|e| {
            Error::Config(format!(
                "failed to read context file {}: {e}",
                resolved.display()
            ))
        })?;
        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| resolved.display().to_string());
        documents.push(ReferenceDocument { name, content });
    }
    config.prompts.reference_material = documents;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_path(dir.path().join("absent.yml"));
        let config = loader.load().unwrap();
        assert_eq!(config.max_turns, 8);
    }

    #[test]
    fn loads_yaml_with_context_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("brand.md"), "Write in a friendly voice.").unwrap();

        let path = dir.path().join("config.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "max_turns: 4\n\
             tools:\n  disabled: [local_search]\n  settings:\n    wordpress_publish:\n      site: blog\n\
             prompts:\n  identity: You are the pipeline agent.\n  context_files: [brand.md]\n"
        )
        .unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.max_turns, 4);
        assert_eq!(config.parameter_preview_chars, 50);
        assert!(config.tools.is_disabled("local_search"));
        assert!(config.tools.has_settings("wordpress_publish"));
        assert_eq!(
            config.prompts.identity.as_deref(),
            Some("You are the pipeline agent.")
        );
        assert_eq!(config.prompts.reference_material.len(), 1);
        assert_eq!(config.prompts.reference_material[0].name, "brand.md");
        assert_eq!(
            config.prompts.reference_material[0].content,
            "Write in a friendly voice."
        );
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "max_turns = 3\nparameter_preview_chars = 20\n\n[prompts.environment]\nsite = \"Example\"\n",
        )
        .unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.parameter_preview_chars, 20);
        assert_eq!(
            config.prompts.environment.get("site").map(String::as_str),
            Some("Example")
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "max_turns=3").unwrap();
        let err = ConfigLoader::with_path(&path).load().unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn missing_context_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "prompts:\n  context_files: [nope.md]\n").unwrap();
        let err = ConfigLoader::with_path(&path).load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CONVEYOR_MAX_TURNS", "12"),
            ("CONVEYOR_PREVIEW_CHARS", "zero"),
        ]);
        let mut config = EngineConfig::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.max_turns, 12);
        assert_eq!(config.parameter_preview_chars, 50);
    }
}
