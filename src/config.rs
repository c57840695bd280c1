//! Configuration management for kernelmem

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{KernelError, KernelResult};

/// Environment variable consulted when no explicit library path is configured
pub const DEFAULT_LIBRARY_ENV: &str = "KERNELMEM_ACCELERATOR_LIBRARY";

/// Symbol prefix exported by the CUDA kernels library
pub const DEFAULT_SYMBOL_PREFIX: &str = "awkward_cuda_ptr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Explicit location of the kernels library; wins over `library_env`
    pub library_path: Option<PathBuf>,
    pub library_env: String,
    pub symbol_prefix: String,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            library_env: DEFAULT_LIBRARY_ENV.to_string(),
            symbol_prefix: DEFAULT_SYMBOL_PREFIX.to_string(),
        }
    }
}

impl AcceleratorConfig {
    /// Library location from the explicit setting, falling back to the environment.
    ///
    /// Empty values count as unset.
    pub fn resolved_library_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.library_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            return Some(path.clone());
        }
        std::env::var_os(&self.library_env)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub accelerator: AcceleratorConfig,
    pub logging: LoggingConfig,
}

/// Configuration manager backed by an optional JSON file
pub struct ConfigManager {
    config: RwLock<KernelConfig>,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(KernelConfig::default()),
            config_file: None,
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> KernelResult<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::IoError(format!("Failed to read config file {:?}: {}", path, e)))?;

        let config: KernelConfig = serde_json::from_str(&content)
            .map_err(|e| KernelError::InvalidInput(format!("Failed to parse config file {:?}: {}", path, e)))?;

        *self.config.write() = config;
        self.config_file = Some(path.to_path_buf());

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> KernelResult<()> {
        let content = serde_json::to_string_pretty(&*self.config.read())?;
        std::fs::write(path, content)
            .map_err(|e| KernelError::IoError(format!("Failed to write config file {:?}: {}", path, e)))?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> KernelConfig {
        self.config.read().clone()
    }

    pub fn update_config<F>(&mut self, f: F) -> KernelResult<()>
    where
        F: FnOnce(&mut KernelConfig),
    {
        f(&mut *self.config.write());

        if let Some(ref path) = self.config_file {
            self.save_to_file(path)?;
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Get the global configuration
pub fn get_config() -> KernelConfig {
    CONFIG_MANAGER.read().get_config()
}

/// Update the global configuration
pub fn update_config<F>(f: F) -> KernelResult<()>
where
    F: FnOnce(&mut KernelConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

/// Load the global configuration from a JSON file
pub fn load_config_from_file(path: &Path) -> KernelResult<()> {
    CONFIG_MANAGER.write().load_from_file(path)
}

/// Fluent builder for a [`KernelConfig`]
pub struct ConfigBuilder {
    config: KernelConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
        }
    }

    pub fn accelerator(mut self, f: impl FnOnce(&mut AcceleratorConfig)) -> Self {
        f(&mut self.config.accelerator);
        self
    }

    pub fn logging(mut self, f: impl FnOnce(&mut LoggingConfig)) -> Self {
        f(&mut self.config.logging);
        self
    }

    pub fn library_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.accelerator(|a| a.library_path = Some(path))
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }

    /// Replace the global configuration with this one
    pub fn apply(self) -> KernelResult<()> {
        update_config(|config| *config = self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
