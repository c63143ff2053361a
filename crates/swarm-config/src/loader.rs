use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use swarm_core::SwarmError;

use crate::schema::SwarmConfig;

/// Called with the new config after every successful hot-reload.
pub type ReloadHook = Box<dyn Fn(&SwarmConfig) + Send + Sync + 'static>;

/// Loads and optionally hot-reloads the Swarm configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<SwarmConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > SWARM_CONFIG env > ~/.swarm/swarm.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("SWARM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".swarm")
            .join("swarm.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> swarm_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            SwarmConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Wrap an already-built config. Nothing is read from disk.
    pub fn from_config(config: SwarmConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> SwarmConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<SwarmConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply SWARM_* environment overrides on top of the file values.
    pub fn apply_env_overrides(config: SwarmConfig) -> SwarmConfig {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable variable lookup.
    pub fn apply_overrides_from(
        mut config: SwarmConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SwarmConfig {
        if let Some(v) = lookup("SWARM_THINKING_MODEL") {
            config.routing.thinking_model = Some(v);
        }
        if let Some(v) = lookup("SWARM_FAST_MODEL") {
            config.routing.fast_model = Some(v);
        }
        if let Some(v) = lookup("SWARM_LOCAL_MODEL") {
            config.routing.local_model = Some(v);
        }
        if let Some(v) = lookup("SWARM_MAX_ITERATIONS")
            && let Ok(n) = v.parse::<u32>()
        {
            config.agent.max_iterations = n;
        }
        if let Some(v) = lookup("SWARM_SOFT_TOKEN_LIMIT")
            && let Ok(n) = v.parse::<usize>()
        {
            config.agent.soft_token_limit = n;
        }
        if let Some(v) = lookup("SWARM_MAX_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            config.routing.max_retries = n;
        }
        if let Some(v) = lookup("SWARM_PROXY_URL") {
            config.proxy.enabled = !v.is_empty();
            if !v.is_empty() {
                config.proxy.base_url = v;
            }
        }
        if let Some(v) = lookup("SWARM_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("SWARM_LOG_FORMAT") {
            config.logging.format = v;
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> swarm_core::Result<()> {
        if !self.config_path.exists() {
            return Err(SwarmError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(parse_file(&self.config_path)?);
        check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads the config when the file
    /// changes and hands the new value to `on_reload`. The returned watcher
    /// must be kept alive for watching to continue.
    pub fn watch(&self, on_reload: ReloadHook) -> swarm_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("config file changed, reloading");
                    let parsed = parse_file(&path_for_event)
                        .map(ConfigLoader::apply_env_overrides)
                        .and_then(|c| check(&c).map(|_| c));
                    match parsed {
                        Ok(new_config) => {
                            on_reload(&new_config);
                            *config.write() = new_config;
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            })
            .map_err(|e| SwarmError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| SwarmError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}

fn parse_file(path: &Path) -> swarm_core::Result<SwarmConfig> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str::<SwarmConfig>(&raw)
        .map_err(|e| SwarmError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

/// Log warnings, fail on errors.
fn check(config: &SwarmConfig) -> swarm_core::Result<()> {
    match config.validate() {
        Ok(warnings) => {
            for w in &warnings {
                warn!("{}", w);
            }
            Ok(())
        }
        Err(e) => Err(SwarmError::Config(e)),
    }
}
