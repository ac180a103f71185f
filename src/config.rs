//! Application-level configuration loading: studio layout, buzzer expiry,
//! polling cadence, and reconnection backoff bounds.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::studio::StudioId;

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SCREENER_SYNC_CONFIG_PATH";

/// Allowed range for per-studio line counts.
const MIN_LINES: u8 = 4;
const MAX_LINES: u8 = 6;

/// Canonical buzzer expiry window (milliseconds).
const DEFAULT_BUZZER_EXPIRY_MS: u64 = 10_000;
/// Polling fallback cadence (milliseconds).
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Layout of one studio or auxiliary chat channel.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Number of provisioned call lines (always 0 for chat-only channels).
    pub lines: u8,
    /// Auxiliary chat-only channel: no lines and no buzzer pair.
    pub chat_only: bool,
}

/// Reconnection backoff bounds for the push transport.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Cap applied to the exponential growth.
    pub max: Duration,
    /// Attempts before the transport gives up for the session.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            max_attempts: 15,
        }
    }
}

/// Immutable runtime configuration shared across the engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    studios: IndexMap<StudioId, StudioConfig>,
    buzzer_expiry: Duration,
    poll_interval: Duration,
    backoff: BackoffConfig,
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        studios = config.studios.len(),
                        "loaded studio layout from config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Studio layout, in declaration order.
    pub fn studios(&self) -> &IndexMap<StudioId, StudioConfig> {
        &self.studios
    }

    /// Layout entry for one studio, if configured.
    pub fn studio(&self, id: &StudioId) -> Option<&StudioConfig> {
        self.studios.get(id)
    }

    /// Forced-deactivation window applied to every buzzer activation.
    pub fn buzzer_expiry(&self) -> Duration {
        self.buzzer_expiry
    }

    /// Buzzer expiry window as epoch-ms arithmetic-friendly milliseconds.
    pub fn buzzer_expiry_ms(&self) -> i64 {
        self.buzzer_expiry.as_millis() as i64
    }

    /// Cadence of the polling fallback.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Push-transport reconnection bounds.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            studios: default_studios(),
            buzzer_expiry: Duration::from_millis(DEFAULT_BUZZER_EXPIRY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file.
struct RawConfig {
    #[serde(default)]
    studios: Vec<RawStudio>,
    #[serde(default)]
    buzzer_expiry_ms: Option<u64>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    backoff: Option<RawBackoff>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single studio entry.
struct RawStudio {
    id: String,
    #[serde(default)]
    lines: Option<u8>,
    #[serde(default)]
    chat_only: bool,
}

#[derive(Debug, Deserialize)]
/// JSON representation of the backoff bounds.
struct RawBackoff {
    #[serde(default)]
    initial_ms: Option<u64>,
    #[serde(default)]
    max_ms: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

impl From<RawConfig> for SyncConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = SyncConfig::default();

        let studios = if raw.studios.is_empty() {
            defaults.studios
        } else {
            raw.studios
                .into_iter()
                .map(|studio| {
                    let id = StudioId::new(studio.id);
                    let config = if studio.chat_only {
                        StudioConfig {
                            lines: 0,
                            chat_only: true,
                        }
                    } else {
                        let requested = studio.lines.unwrap_or(MAX_LINES);
                        let lines = requested.clamp(MIN_LINES, MAX_LINES);
                        if lines != requested {
                            warn!(
                                studio = %id,
                                requested,
                                clamped = lines,
                                "studio line count outside supported range"
                            );
                        }
                        StudioConfig {
                            lines,
                            chat_only: false,
                        }
                    };
                    (id, config)
                })
                .collect()
        };

        let backoff_defaults = BackoffConfig::default();
        let backoff = raw
            .backoff
            .map(|raw| BackoffConfig {
                initial: raw
                    .initial_ms
                    .map(Duration::from_millis)
                    .unwrap_or(backoff_defaults.initial),
                max: raw
                    .max_ms
                    .map(Duration::from_millis)
                    .unwrap_or(backoff_defaults.max),
                max_attempts: raw.max_attempts.unwrap_or(backoff_defaults.max_attempts),
            })
            .unwrap_or(backoff_defaults);

        Self {
            studios,
            buzzer_expiry: Duration::from_millis(
                raw.buzzer_expiry_ms.unwrap_or(DEFAULT_BUZZER_EXPIRY_MS),
            ),
            poll_interval: Duration::from_millis(
                raw.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            backoff,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in layout: four broadcast studios plus two auxiliary chat channels.
fn default_studios() -> IndexMap<StudioId, StudioConfig> {
    let mut studios = IndexMap::new();
    for index in 1..=4u8 {
        studios.insert(
            StudioId::new(format!("studio-{index}")),
            StudioConfig {
                lines: MAX_LINES,
                chat_only: false,
            },
        );
    }
    studios.insert(
        StudioId::new("tech"),
        StudioConfig {
            lines: 0,
            chat_only: true,
        },
    );
    studios.insert(
        StudioId::new("remote"),
        StudioConfig {
            lines: 0,
            chat_only: true,
        },
    );
    studios
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_provision_four_studios_and_two_aux_channels() {
        let config = SyncConfig::default();
        assert_eq!(config.studios().len(), 6);
        assert_eq!(
            config.studio(&StudioId::from("studio-1")).unwrap().lines,
            6
        );
        assert!(config.studio(&StudioId::from("remote")).unwrap().chat_only);
        assert_eq!(config.buzzer_expiry(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn raw_config_clamps_line_counts() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "studios": [
                    {"id": "studio-1", "lines": 9},
                    {"id": "studio-2", "lines": 2},
                    {"id": "tech", "chat_only": true}
                ],
                "buzzer_expiry_ms": 5000
            }"#,
        )
        .unwrap();
        let config: SyncConfig = raw.into();

        assert_eq!(config.studio(&StudioId::from("studio-1")).unwrap().lines, 6);
        assert_eq!(config.studio(&StudioId::from("studio-2")).unwrap().lines, 4);
        assert_eq!(config.studio(&StudioId::from("tech")).unwrap().lines, 0);
        assert_eq!(config.buzzer_expiry(), Duration::from_secs(5));
        // Unspecified knobs keep their defaults.
        assert_eq!(config.backoff().max_attempts, 15);
    }
}
