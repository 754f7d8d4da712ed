use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shard: ShardSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub economy: EconomySettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths pass through untouched; relative paths are joined with the
/// config file's parent directory so behavior does not depend on the current
/// working directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Default Paths
// ============================================================================

/// Default balance database file (relative to config file).
pub const DEFAULT_DB_PATH: &str = "shoal.db";

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_total_shards() -> u32 {
    1
}

fn default_namespace() -> String {
    "shoal".to_string()
}

fn default_coordinator_url() -> String {
    "127.0.0.1:3442".to_string()
}

fn default_heartbeat_seconds() -> u64 {
    10
}

fn default_timely_period_hours() -> u32 {
    24
}

fn default_min_threshold() -> i64 {
    99
}

fn default_decay_interval_hours() -> u32 {
    24
}

fn default_decay_tick_seconds() -> u64 {
    300
}

fn default_prefix() -> String {
    ".".to_string()
}

fn default_command_cooldown_seconds() -> u64 {
    3
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// # Limitations
///
/// - No nested/recursive expansion: `${VAR:-${DEFAULT}}` is not supported
/// - Unclosed `${` (missing `}`) returns an error
///
/// # Examples
///
/// ```yaml
/// # Required - errors if DISCORD_TOKEN is not set
/// gateway:
///   discord:
///     token: ${DISCORD_TOKEN}
///
/// # Optional with default
/// coordinator:
///   url: ${SHOAL_COORDINATOR_URL:-127.0.0.1:3442}
///
/// # Plain $ doesn't need escaping
/// motd: win $100
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                // Escaped $ -> literal $
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                // Start of variable reference
                Some('{') => {
                    chars.next(); // consume '{'
                    let expanded = parse_var_reference(&mut chars)?;
                    result.push_str(&expanded);
                }
                // Not a variable reference, keep literal $
                _ => {
                    result.push('$');
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
///
/// Handles:
/// - `VAR}` - Required variable
/// - `VAR:-default}` - Variable with default
///
/// Returns error if closing `}` is missing.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut in_default = false;
    let mut found_closing_brace = false;

    while let Some(&c) = chars.peek() {
        match c {
            '}' => {
                chars.next(); // consume '}'
                found_closing_brace = true;
                break;
            }
            ':' if !in_default => {
                chars.next(); // consume ':'
                // Check for '-' (default value syntax)
                if chars.peek() == Some(&'-') {
                    chars.next(); // consume '-'
                    in_default = true;
                    default_value = Some(String::new());
                } else {
                    // ':' without '-' is part of var name (unusual but valid)
                    var_name.push(':');
                }
            }
            _ => {
                chars.next();
                if in_default {
                    default_value.as_mut().unwrap().push(c);
                } else {
                    var_name.push(c);
                }
            }
        }
    }

    if !found_closing_brace {
        return Err(ConfigError::UnclosedVarReference);
    }

    // Look up the environment variable
    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => match default_value {
            Some(default) => Ok(default),
            None => Err(ConfigError::MissingEnvVar(var_name)),
        },
    }
}

// ============================================================================
// ShardSettings
// ============================================================================

/// Which partition of the fleet this process owns. `id` must stay below
/// `total`; the `run` command validates the pair after CLI overrides.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ShardSettings {
    #[serde(default)]
    pub id: u32,
    #[serde(default = "default_total_shards")]
    pub total: u32,
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            id: 0,
            total: default_total_shards(),
        }
    }
}

// ============================================================================
// GatewaySettings
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct GatewaySettings {
    /// Discord connector configuration.
    #[serde(default)]
    pub discord: Option<DiscordSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordSettings {
    /// Discord bot token.
    pub token: String,
}

// ============================================================================
// CacheSettings
// ============================================================================

/// Settings for the shared cache store.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Key prefix so independent deployments can share one store.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

// ============================================================================
// CoordinatorSettings
// ============================================================================

/// Settings for the remote coordination service. Only consulted when the
/// `SHOAL_COORDINATED` environment toggle is set.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_coordinator_url")]
    pub url: String,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            url: default_coordinator_url(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}

// ============================================================================
// EconomySettings
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct EconomySettings {
    /// Balance database file. Defaults to [`DEFAULT_DB_PATH`] next to the
    /// config file.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub timely: TimelySettings,
    #[serde(default)]
    pub decay: DecaySettings,
}

/// Periodic stipend a user can claim with the `timely` command.
/// An amount or period of zero disables the feature.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimelySettings {
    #[serde(default)]
    pub amount: i64,
    #[serde(default = "default_timely_period_hours")]
    pub period_hours: u32,
}

impl Default for TimelySettings {
    fn default() -> Self {
        Self {
            amount: 0,
            period_hours: default_timely_period_hours(),
        }
    }
}

/// Periodic proportional reduction of every large balance.
///
/// `percent` outside `(0, 1]` disables the job. `max_amount` caps the cut
/// per account (0 = uncapped) and `min_threshold` exempts small balances.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DecaySettings {
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub max_amount: i64,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: i64,
    /// Minimum hours between two applications.
    #[serde(default = "default_decay_interval_hours")]
    pub interval_hours: u32,
    /// How often the scheduler wakes up to check the gate.
    #[serde(default = "default_decay_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            percent: 0.0,
            max_amount: 0,
            min_threshold: default_min_threshold(),
            interval_hours: default_decay_interval_hours(),
            tick_seconds: default_decay_tick_seconds(),
        }
    }
}

// ============================================================================
// PipelineSettings
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Command prefix (a bot mention also works as a prefix).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Groups whose messages are dropped before any processing.
    #[serde(default)]
    pub blocked_groups: Vec<u64>,
    /// Users whose messages are dropped before any processing.
    #[serde(default)]
    pub blocked_users: Vec<u64>,
    /// Per-user cooldown between commands. Zero disables the throttle.
    #[serde(default = "default_command_cooldown_seconds")]
    pub command_cooldown_seconds: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            blocked_groups: Vec::new(),
            blocked_users: Vec::new(),
            command_cooldown_seconds: default_command_cooldown_seconds(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    // ========================================================================
    // Config Tests
    // ========================================================================

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.shard.id, 0);
        assert_eq!(config.shard.total, 1);
        assert!(config.gateway.discord.is_none());
        assert_eq!(config.cache.namespace, "shoal");
        assert_eq!(config.coordinator.url, "127.0.0.1:3442");
        assert_eq!(config.coordinator.heartbeat_seconds, 10);
        assert!(config.economy.db_path.is_none());
        assert_eq!(config.economy.timely.amount, 0);
        assert_eq!(config.economy.timely.period_hours, 24);
        assert_eq!(config.economy.decay.percent, 0.0);
        assert_eq!(config.economy.decay.max_amount, 0);
        assert_eq!(config.economy.decay.min_threshold, 99);
        assert_eq!(config.economy.decay.interval_hours, 24);
        assert_eq!(config.economy.decay.tick_seconds, 300);
        assert_eq!(config.pipeline.prefix, ".");
        assert!(config.pipeline.blocked_groups.is_empty());
        assert!(config.pipeline.blocked_users.is_empty());
        assert_eq!(config.pipeline.command_cooldown_seconds, 3);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-shoal.yaml");
        let config = Config::load(missing_path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.shard.total, 1);
        assert_eq!(config.cache.namespace, "shoal");
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
shard:
  id: 3
  total: 16
gateway:
  discord:
    token: "abc.def.ghi"
cache:
  namespace: "prod"
coordinator:
  url: "10.0.0.5:3442"
  heartbeat_seconds: 5
economy:
  db_path: "data/economy.db"
  timely:
    amount: 200
    period_hours: 12
  decay:
    percent: 0.02
    max_amount: 1000
    min_threshold: 500
    interval_hours: 48
    tick_seconds: 60
pipeline:
  prefix: "!"
  blocked_groups: [111, 222]
  blocked_users: [333]
  command_cooldown_seconds: 5
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.shard.id, 3);
        assert_eq!(config.shard.total, 16);
        assert_eq!(config.gateway.discord.unwrap().token, "abc.def.ghi");
        assert_eq!(config.cache.namespace, "prod");
        assert_eq!(config.coordinator.url, "10.0.0.5:3442");
        assert_eq!(config.coordinator.heartbeat_seconds, 5);
        assert_eq!(
            config.economy.db_path,
            Some(PathBuf::from("data/economy.db"))
        );
        assert_eq!(config.economy.timely.amount, 200);
        assert_eq!(config.economy.timely.period_hours, 12);
        assert_eq!(config.economy.decay.percent, 0.02);
        assert_eq!(config.economy.decay.max_amount, 1000);
        assert_eq!(config.economy.decay.min_threshold, 500);
        assert_eq!(config.economy.decay.interval_hours, 48);
        assert_eq!(config.economy.decay.tick_seconds, 60);
        assert_eq!(config.pipeline.prefix, "!");
        assert_eq!(config.pipeline.blocked_groups, vec![111, 222]);
        assert_eq!(config.pipeline.blocked_users, vec![333]);
        assert_eq!(config.pipeline.command_cooldown_seconds, 5);
    }

    #[tokio::test]
    async fn test_load_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
shard:
  id: 1
  total: 4
economy:
  decay:
    percent: 0.01
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.shard.id, 1);
        assert_eq!(config.shard.total, 4);
        assert_eq!(config.economy.decay.percent, 0.01);
        assert_eq!(config.economy.decay.min_threshold, 99); // default
        assert_eq!(config.economy.decay.interval_hours, 24); // default
        assert_eq!(config.cache.namespace, "shoal"); // default
        assert_eq!(config.pipeline.prefix, "."); // default
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path().to_str().unwrap()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
    }

    // ========================================================================
    // resolve_path Tests
    // ========================================================================

    #[test]
    fn test_resolve_path_absolute() {
        let config_path = Path::new("/etc/shoal/shoal.yaml");
        let absolute_path = Path::new("/var/data/economy.db");
        let result = resolve_path(config_path, absolute_path);
        assert_eq!(result, PathBuf::from("/var/data/economy.db"));
    }

    #[test]
    fn test_resolve_path_relative() {
        let config_path = Path::new("/etc/shoal/shoal.yaml");
        let relative_path = Path::new("data/economy.db");
        let result = resolve_path(config_path, relative_path);
        assert_eq!(result, PathBuf::from("/etc/shoal/data/economy.db"));
    }

    #[test]
    fn test_resolve_path_config_in_current_dir() {
        let config_path = Path::new("shoal.yaml");
        let relative_path = Path::new("shoal.db");
        let result = resolve_path(config_path, relative_path);
        // When config has no parent dir, uses "." which joins to just the relative path
        assert_eq!(result, PathBuf::from("shoal.db"));
    }

    // ========================================================================
    // Environment Variable Expansion Tests
    // ========================================================================

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "plain string without variables";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_expand_env_vars_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::set_var("SHOAL_TEST_REQUIRED", "test_value") };
        let input = "prefix ${SHOAL_TEST_REQUIRED} suffix";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, "prefix test_value suffix");
        unsafe { std::env::remove_var("SHOAL_TEST_REQUIRED") };
    }

    #[test]
    fn test_expand_env_vars_missing_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("SHOAL_TEST_MISSING_12345") };
        let input = "value: ${SHOAL_TEST_MISSING_12345}";
        let result = expand_env_vars(input);
        match result {
            Err(ConfigError::MissingEnvVar(name)) => {
                assert_eq!(name, "SHOAL_TEST_MISSING_12345");
            }
            _ => panic!("expected MissingEnvVar error"),
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("SHOAL_TEST_UNSET_DEFAULT") };
        let input = "value: ${SHOAL_TEST_UNSET_DEFAULT:-default_value}";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, "value: default_value");
    }

    #[test]
    fn test_expand_env_vars_with_empty_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("SHOAL_TEST_EMPTY_DEFAULT") };
        let input = "value: ${SHOAL_TEST_EMPTY_DEFAULT:-}";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, "value: ");
    }

    #[test]
    fn test_expand_env_vars_set_var_ignores_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::set_var("SHOAL_TEST_SET_DEFAULT", "actual_value") };
        let input = "value: ${SHOAL_TEST_SET_DEFAULT:-ignored_default}";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, "value: actual_value");
        unsafe { std::env::remove_var("SHOAL_TEST_SET_DEFAULT") };
    }

    #[test]
    fn test_expand_env_vars_escaped_dollar() {
        let input = "price: $$100";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, "price: $100");
    }

    #[test]
    fn test_expand_env_vars_plain_dollar_kept() {
        let input = "win $100 today";
        let result = expand_env_vars(input).unwrap();
        assert_eq!(result, "win $100 today");
    }

    #[test]
    fn test_expand_env_vars_unclosed_brace() {
        let input = "value: ${UNCLOSED_VAR";
        let result = expand_env_vars(input);
        match result {
            Err(ConfigError::UnclosedVarReference) => {}
            _ => panic!("expected UnclosedVarReference error"),
        }
    }

    #[test]
    fn test_expand_env_vars_unclosed_brace_with_default() {
        let input = "value: ${VAR:-default";
        let result = expand_env_vars(input);
        match result {
            Err(ConfigError::UnclosedVarReference) => {}
            _ => panic!("expected UnclosedVarReference error"),
        }
    }
}
