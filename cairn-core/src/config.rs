use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    undo: UndoConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    provenance: ProvenanceConfig,
    #[serde(default)]
    log: LogConfig,
}

#[derive(Deserialize, Default)]
struct UndoConfig {
    depth: Option<usize>,
    max_bytes: Option<usize>,
}

#[derive(Deserialize, Default)]
struct DispatchConfig {
    event_capacity: Option<usize>,
}

#[derive(Deserialize, Default)]
struct ProvenanceConfig {
    record: Option<bool>,
}

#[derive(Deserialize, Default)]
struct LogConfig {
    action_log: Option<bool>,
}

pub struct Config {
    undo: UndoConfig,
    dispatch: DispatchConfig,
    provenance: ProvenanceConfig,
    log: LogConfig,
}

impl Config {
    /// Embedded defaults overlaid with the user's config file, if any.
    pub fn load() -> Self {
        let mut config = Self::embedded();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => config.merge(user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        config
    }

    /// Only the embedded defaults. Used by tests and tools that must not
    /// depend on the user's environment.
    pub fn embedded() -> Self {
        let base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("Failed to parse embedded config.toml");
        Self::from_file(base)
    }

    /// Embedded defaults overlaid with `overrides`.
    pub fn from_toml_str(overrides: &str) -> Result<Self, toml::de::Error> {
        let user: ConfigFile = toml::from_str(overrides)?;
        let mut config = Self::embedded();
        config.merge(user);
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        Config {
            undo: file.undo,
            dispatch: file.dispatch,
            provenance: file.provenance,
            log: file.log,
        }
    }

    fn merge(&mut self, user: ConfigFile) {
        merge_undo(&mut self.undo, user.undo);
        if user.dispatch.event_capacity.is_some() {
            self.dispatch.event_capacity = user.dispatch.event_capacity;
        }
        if user.provenance.record.is_some() {
            self.provenance.record = user.provenance.record;
        }
        if user.log.action_log.is_some() {
            self.log.action_log = user.log.action_log;
        }
    }

    /// Number of undo steps kept.
    pub fn undo_depth(&self) -> usize {
        self.undo.depth.unwrap_or(100)
    }

    pub fn undo_max_bytes(&self) -> usize {
        self.undo.max_bytes.unwrap_or(256 * 1024 * 1024)
    }

    /// Per-subscriber event queue size (at least 1).
    pub fn event_capacity(&self) -> usize {
        self.dispatch.event_capacity.unwrap_or(1024).max(1)
    }

    pub fn record_provenance(&self) -> bool {
        self.provenance.record.unwrap_or(true)
    }

    pub fn action_log_enabled(&self) -> bool {
        self.log.action_log.unwrap_or(false)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::embedded()
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cairn").join("config.toml"))
}

fn merge_undo(base: &mut UndoConfig, user: UndoConfig) {
    if user.depth.is_some() {
        base.depth = user.depth;
    }
    if user.max_bytes.is_some() {
        base.max_bytes = user.max_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults() {
        let config = Config::embedded();
        assert_eq!(config.undo_depth(), 100);
        assert_eq!(config.undo_max_bytes(), 268_435_456);
        assert_eq!(config.event_capacity(), 1024);
        assert!(config.record_provenance());
        assert!(!config.action_log_enabled());
    }

    #[test]
    fn overrides_replace_only_given_keys() {
        let config = Config::from_toml_str("[undo]\ndepth = 3\n[provenance]\nrecord = false\n").unwrap();
        assert_eq!(config.undo_depth(), 3);
        assert_eq!(config.undo_max_bytes(), 268_435_456);
        assert!(!config.record_provenance());
    }

    #[test]
    fn malformed_overrides_are_errors() {
        assert!(Config::from_toml_str("[undo]\ndepth = \"lots\"").is_err());
    }
}
