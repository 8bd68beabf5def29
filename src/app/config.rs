//! Configuration file loading for CLI defaults.
//!
//! The file is a flat list of `key = value` lines. Strings are
//! double-quoted, `#` starts a comment outside strings, unknown keys are
//! rejected.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Values a config file may set. `None` means "not set in the file".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileConfig {
    /// Task catalog database file.
    pub(crate) database_path: Option<PathBuf>,
    /// Root directory for stored artifacts.
    pub(crate) data_dir: Option<PathBuf>,
    /// ThetaData terminal base URL.
    pub(crate) api_base_url: Option<String>,
    /// Sampling interval requested from the terminal (`5s`, `1m`, ...).
    pub(crate) interval: Option<String>,
    /// Attempts per task before failure is terminal.
    pub(crate) max_retries: Option<u32>,
    /// Age after which an in-progress lease is reclaimed.
    pub(crate) lease_timeout_secs: Option<u64>,
    /// Base pause between polls of an empty catalog.
    pub(crate) idle_interval_ms: Option<u64>,
    /// Period of in-process reclaim sweeps; 0 disables.
    pub(crate) reclaim_interval_secs: Option<u64>,
    /// Period of status count reports; 0 disables.
    pub(crate) report_interval_secs: Option<u64>,
    /// Per-request HTTP timeout.
    pub(crate) request_timeout_secs: Option<u64>,
    /// Worker loops per process.
    pub(crate) workers: Option<u32>,
    /// Database pool max connections (1..=20).
    pub(crate) db_max_connections: Option<u32>,
    /// Database busy timeout in milliseconds.
    pub(crate) db_busy_timeout_ms: Option<u32>,
    /// Default verbosity mode.
    pub(crate) verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_range("max_retries", self.max_retries.map(u64::from), 0, 100)?;
        validate_range("lease_timeout_secs", self.lease_timeout_secs, 1, 604_800)?;
        validate_range("idle_interval_ms", self.idle_interval_ms, 0, 600_000)?;
        validate_range("reclaim_interval_secs", self.reclaim_interval_secs, 0, 86_400)?;
        validate_range("report_interval_secs", self.report_interval_secs, 0, 3600)?;
        validate_range("request_timeout_secs", self.request_timeout_secs, 1, 3600)?;
        validate_range("workers", self.workers.map(u64::from), 1, 64)?;
        validate_range(
            "db_max_connections",
            self.db_max_connections.map(u64::from),
            1,
            20,
        )?;
        validate_range(
            "db_busy_timeout_ms",
            self.db_busy_timeout_ms.map(u64::from),
            0,
            120_000,
        )?;

        if let Some(interval) = self.interval.as_deref()
            && !is_valid_interval(interval)
        {
            bail!(
                "Invalid config value for `interval`: \"{interval}\". Expected a number followed by ms, s, m or h (e.g. \"5s\")"
            );
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Returns true for sampling intervals like `500ms`, `5s`, `1m` or `1h`.
pub(crate) fn is_valid_interval(value: &str) -> bool {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(digits_end);
    !number.is_empty()
        && number.parse::<u64>().is_ok_and(|n| n > 0)
        && matches!(unit, "ms" | "s" | "m" | "h")
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadedConfig {
    /// Config path that was consulted, if one could be resolved.
    pub(crate) path: Option<PathBuf>,
    /// Parsed file config; default when no file was found.
    pub(crate) config: FileConfig,
    /// Indicates whether configuration was loaded from disk.
    pub(crate) loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            ..LoadedConfig::default()
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

pub(crate) fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "database_path" => {
                cfg.database_path = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "data_dir" => {
                cfg.data_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "api_base_url" => {
                cfg.api_base_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "interval" => {
                cfg.interval = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "max_retries" => {
                cfg.max_retries = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "lease_timeout_secs" => {
                cfg.lease_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "idle_interval_ms" => {
                cfg.idle_interval_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "reclaim_interval_secs" => {
                cfg.reclaim_interval_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "report_interval_secs" => {
                cfg.report_interval_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "workers" => {
                cfg.workers = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "db_max_connections" => {
                cfg.db_max_connections = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "db_busy_timeout_ms" => {
                cfg.db_busy_timeout_ms = Some(parse_integer_u32(value).with_context(invalid)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let value = parse_integer_u64(raw_value)?;
    u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
