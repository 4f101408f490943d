use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EastmoneyProviderConfig {
    /// Host serving `pingzhongdata/{code}.js` and `js/fundcode_search.js`
    pub fund_base_url: String,
    /// Host serving realtime estimates `js/{code}.js`
    pub estimate_base_url: String,
    /// Host serving index quotes `api/qt/ulist.np/get`
    pub quote_base_url: String,
}

impl Default for EastmoneyProviderConfig {
    fn default() -> Self {
        EastmoneyProviderConfig {
            fund_base_url: "https://fund.eastmoney.com".to_string(),
            estimate_base_url: "http://fundgz.1234567.com.cn".to_string(),
            quote_base_url: "https://push2.eastmoney.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub eastmoney: EastmoneyProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScreeningConfig {
    /// Number of funds fetched in parallel by a screening run
    pub concurrency: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        ScreeningConfig { concurrency: 4 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    pub compare_ttl_secs: u64,
    pub market_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            compare_ttl_secs: 30 * 60,
            market_ttl_secs: 5 * 60,
        }
    }
}

impl CacheConfig {
    pub fn compare_ttl(&self) -> Duration {
        Duration::from_secs(self.compare_ttl_secs)
    }

    pub fn market_ttl(&self) -> Duration {
        Duration::from_secs(self.market_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub screening: ScreeningConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub data_path: Option<String>,
    /// Keep watchlist, search index and screening data on disk
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            screening: ScreeningConfig::default(),
            cache: CacheConfig::default(),
            data_path: None,
            persist: default_persist(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "fundwatch", "fundwatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "fundwatch", "fundwatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
