use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const DEFAULT_HEALTH_PORT: u16 = 8420;

// ─── BrokerConfig ─────────────────────────────────────────────────────────────

/// Broker gateway configuration (`[broker]` in config.toml).
///
/// Events reach the broker through its HTTP gateway. When `gateway_url` is
/// unset the daemon runs with the logging fallback publisher — mutations
/// still succeed, events are recorded locally and reported as degraded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the broker HTTP gateway, e.g. `"http://localhost:8480"`.
    /// None = no broker; the logging fallback publisher is selected at startup.
    pub gateway_url: Option<String>,
    /// TCP connect timeout for gateway requests (milliseconds). Default: 1000.
    pub connect_timeout_ms: u64,
    /// Per-publish send timeout (milliseconds). Default: 2000.
    pub publish_timeout_ms: u64,
    /// Consumer group shared by the worker processes. Default: "taskd-workers".
    pub consumer_group: String,
    /// Long-poll wait per consumer poll (milliseconds). Default: 1000.
    pub poll_wait_ms: u64,
    /// Maximum events fetched per consumer poll. Default: 10.
    pub poll_batch: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            connect_timeout_ms: 1_000,
            publish_timeout_ms: 2_000,
            consumer_group: "taskd-workers".to_string(),
            poll_wait_ms: 1_000,
            poll_batch: 10,
        }
    }
}

// ─── RemindersConfig ──────────────────────────────────────────────────────────

/// Due-reminder scanner configuration (`[reminders]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemindersConfig {
    /// Seconds between due-reminder scans. Hot-reloadable. Default: 30.
    pub scan_interval_secs: u64,
    /// Maximum reminders published per scan tick. Default: 50.
    pub scan_batch: usize,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            scan_batch: 50,
        }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,taskd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Port for the health/metrics HTTP endpoint (default: 8420).
    health_port: Option<u16>,
    /// Broker gateway configuration (`[broker]`).
    broker: Option<BrokerConfig>,
    /// Due-reminder scanner configuration (`[reminders]`).
    reminders: Option<RemindersConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── TaskdConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TaskdConfig {
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Port for the per-process health/metrics endpoint.
    pub health_port: u16,
    /// Broker gateway: URL, timeouts, consumer group, poll bounds.
    pub broker: BrokerConfig,
    /// Due-reminder scanner: interval and batch cap.
    pub reminders: RemindersConfig,
    /// Observability: slow query threshold.
    pub observability: ObservabilityConfig,
}

impl TaskdConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        data_dir: Option<PathBuf>,
        log: Option<String>,
        broker_url: Option<String>,
        health_port: Option<u16>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("TASKD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let health_port = health_port.or(toml.health_port).unwrap_or(DEFAULT_HEALTH_PORT);

        let mut broker = toml.broker.unwrap_or_default();
        if let Some(url) = broker_url.filter(|s| !s.is_empty()) {
            broker.gateway_url = Some(url);
        }

        let reminders = toml.reminders.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            data_dir,
            log,
            log_format,
            health_port,
            broker,
            reminders,
            observability,
        }
    }
}

// ─── Hot-reloadable config subset ─────────────────────────────────────────────

/// Non-critical config fields that can be changed without restarting the daemon.
#[derive(Debug, Clone)]
pub struct HotConfig {
    pub log_level: String,
    pub scan_interval_secs: u64,
}

/// Watches `config.toml` for changes and reloads non-critical fields.
///
/// The watcher uses the `notify` crate (kqueue on macOS, inotify on Linux)
/// to detect file modifications. Only `log` and `reminders.scan_interval_secs`
/// are reloaded; broker settings and other startup-only fields require a
/// full restart.
pub struct ConfigWatcher {
    pub hot: Arc<RwLock<HotConfig>>,
    // Hold the watcher alive; dropping it stops the file watch.
    _watcher: notify_debouncer_full::Debouncer<
        notify_debouncer_full::notify::RecommendedWatcher,
        notify_debouncer_full::FileIdMap,
    >,
}

impl ConfigWatcher {
    /// Start watching `{data_dir}/config.toml` for changes.
    ///
    /// Returns `None` if the watcher could not be created (non-fatal; the
    /// daemon runs fine without hot-reload).
    pub fn start(data_dir: &Path) -> Option<Self> {
        let config_path = data_dir.join("config.toml");
        let initial = load_hot_config(&config_path);
        let hot = Arc::new(RwLock::new(initial));

        let hot_clone = hot.clone();
        let config_path_clone = config_path.clone();
        let rt_handle = tokio::runtime::Handle::current();

        let watcher = notify_debouncer_full::new_debouncer(
            std::time::Duration::from_secs(2),
            None,
            move |result: notify_debouncer_full::DebounceEventResult| {
                if let Ok(events) = result {
                    // Only act on modify/create events
                    let relevant = events.iter().any(|e| {
                        use notify_debouncer_full::notify::EventKind;
                        matches!(e.event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    });
                    if relevant {
                        let hot = hot_clone.clone();
                        let path = config_path_clone.clone();
                        rt_handle.spawn(async move {
                            let new_config = load_hot_config(&path);
                            let mut guard = hot.write().await;
                            if guard.log_level != new_config.log_level
                                || guard.scan_interval_secs != new_config.scan_interval_secs
                            {
                                info!(
                                    log_level = %new_config.log_level,
                                    scan_interval_secs = new_config.scan_interval_secs,
                                    "config.toml reloaded"
                                );
                                *guard = new_config;
                            }
                        });
                    }
                }
            },
        );

        match watcher {
            Ok(mut debouncer) => {
                use notify_debouncer_full::notify::Watcher as _;
                // Watch the data_dir (parent of config.toml) since watching a
                // non-existent file fails on some platforms.
                let watch_path = config_path.parent().unwrap_or_else(|| Path::new("."));
                if let Err(e) = debouncer.watcher().watch(
                    watch_path,
                    notify_debouncer_full::notify::RecursiveMode::NonRecursive,
                ) {
                    warn!("config watcher failed to start: {e} — hot-reload disabled");
                    return None;
                }
                info!(path = %config_path.display(), "config hot-reload watcher started");
                Some(Self {
                    hot,
                    _watcher: debouncer,
                })
            }
            Err(e) => {
                warn!("config watcher creation failed: {e} — hot-reload disabled");
                None
            }
        }
    }
}

/// Load only the hot-reloadable fields from config.toml.
fn load_hot_config(path: &Path) -> HotConfig {
    let toml = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| toml::from_str::<TomlConfig>(&s).ok())
        .unwrap_or_default();
    HotConfig {
        log_level: toml.log.unwrap_or_else(|| "info".to_string()),
        scan_interval_secs: toml
            .reminders
            .map(|r| r.scan_interval_secs)
            .unwrap_or_else(|| RemindersConfig::default().scan_interval_secs),
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/taskd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("taskd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/taskd or ~/.local/share/taskd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("taskd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("taskd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\taskd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("taskd");
        }
    }
    // Fallback
    PathBuf::from(".taskd")
}
