//! Configuration for the `rigvm` command: loading, defaults and the host
//! types a config file can declare.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use rigvm_core::VmOptions;
use serde::{Deserialize, Serialize};

/// Directory under the user's config directory.
const CONFIG_DIR: &str = "rigvm";
const CONFIG_FILE: &str = "rigvm.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Entry run when `--entry` is not given.
    pub default_entry: String,
    pub vm: VmOptions,
    /// Enum types registered before any program is assembled or loaded.
    pub enums: Vec<EnumConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            default_entry: "main".to_string(),
            vm: VmOptions::default(),
            enums: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnumConfig {
    pub name: String,
    pub variants: Vec<String>,
    /// Registry key used for later removal; defaults to `/<name>`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads `explicit` when given, otherwise the file in the user config
    /// directory. Only an explicit path is required to exist.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("configuration file {} does not exist", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok((Self::default(), None)),
            },
        };
        let data =
            fs::read_to_string(&path).with_context(|| format!("reading configuration from {}", path.display()))?;
        let config = Self::from_toml(&data).with_context(|| format!("parsing configuration {}", path.display()))?;
        Ok((config, Some(path)))
    }

    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(data)?;
        for declared in &config.enums {
            if declared.variants.is_empty() {
                bail!("enum '{}' declares no variants", declared.name);
            }
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = Config::from_toml("default_entry = \"tick\"\n[vm]\nmax_entry_depth = 4\n").unwrap();
        assert_eq!(config.default_entry, "tick");
        assert_eq!(config.log_filter, "warn");
        assert_eq!(config.vm.max_entry_depth, 4);
        assert_eq!(config.vm.max_diagnostics, VmOptions::default().max_diagnostics);
        assert!(config.enums.is_empty());
    }

    #[test]
    fn enums_are_read_in_order() {
        let config = Config::from_toml(
            "[[enums]]\nname = \"Gait\"\nvariants = [\"Walk\", \"Run\"]\n\n\
             [[enums]]\nname = \"Side\"\nvariants = [\"Left\", \"Right\"]\npath = \"/rig/Side\"\n",
        )
        .unwrap();
        let names: Vec<_> = config.enums.iter().map(|declared| declared.name.as_str()).collect();
        assert_eq!(names, ["Gait", "Side"]);
        assert_eq!(config.enums[0].path, None);
        assert_eq!(config.enums[1].path.as_deref(), Some("/rig/Side"));
    }

    #[test]
    fn empty_enums_are_rejected() {
        assert!(Config::from_toml("[[enums]]\nname = \"Empty\"\nvariants = []\n").is_err());
    }

    #[test]
    fn explicit_paths_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());

        let path = dir.path().join("rigvm.toml");
        let mut config = Config::default();
        config.vm.trace = true;
        fs::write(&path, config.to_toml().unwrap()).unwrap();
        let (loaded, from) = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(from.as_deref(), Some(path.as_path()));
    }
}
