use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::PalaverConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "palaver.toml",
    "palaver.yaml",
    "palaver.yml",
    "palaver.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<PalaverConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    parse_config(&raw, ext)
}

/// Parse raw config text in the format named by `ext`.
pub fn parse_config(raw: &str, ext: &str) -> Result<PalaverConfig> {
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./palaver.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/palaver/palaver.{toml,yaml,yml,json}` (user-global)
///
/// Returns `PalaverConfig::default()` if no config file is found or the one
/// found does not parse.
pub fn discover_and_load() -> PalaverConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    PalaverConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists());
    if local.is_some() {
        return local;
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/palaver/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "palaver").map(|d| d.config_dir().to_path_buf())
}

/// Apply `PALAVER_*` environment overrides on top of a loaded config.
///
/// Recognised: `PALAVER_TICK_INTERVAL_MS`, `PALAVER_MAX_THREAD_AGE_MS`,
/// `PALAVER_MIN_DELIVERY_INTERVAL_MS`, `PALAVER_AUTOSTART`.
pub fn apply_env_overrides(config: PalaverConfig) -> Result<PalaverConfig> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_env_overrides_with(
    mut config: PalaverConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PalaverConfig> {
    let millis = |key: &str| -> Result<Option<u64>> {
        lookup(key)
            .map(|v| v.trim().parse::<u64>().map_err(|e| Error::invalid(key, e)))
            .transpose()
    };

    if let Some(ms) = millis("PALAVER_TICK_INTERVAL_MS")? {
        config.scheduler.tick_interval_ms = ms;
    }
    if let Some(ms) = millis("PALAVER_MAX_THREAD_AGE_MS")? {
        config.scheduler.max_thread_age_ms = ms;
    }
    if let Some(ms) = millis("PALAVER_MIN_DELIVERY_INTERVAL_MS")? {
        config.scheduler.min_delivery_interval_ms = Some(ms);
    }
    if let Some(raw) = lookup("PALAVER_AUTOSTART") {
        config.scheduler.autostart = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(Error::invalid(
                    "PALAVER_AUTOSTART",
                    format!("expected a boolean, got {other:?}"),
                ));
            },
        };
    }

    Ok(config)
}
