//! Service configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use ets_types::Chain;
use serde::{Deserialize, Serialize};

use crate::client::RetryConfig;
use crate::resolver::ExplorerTemplates;
use crate::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtsConfig {
    /// Where records and blobs are kept
    pub storage: StorageConfig,

    /// Calendar servers for aggregated proofs
    pub calendar: CalendarConfig,

    /// Signed timestamp authority
    pub tsa: TsaConfig,

    /// Block hash lookup and explorer links per chain
    pub chains: ChainsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; `db/` and `files/` live below it
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Calendar base URLs, tried in order
    pub urls: Vec<String>,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Retries for transient failures (0 disables retry)
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsaConfig {
    /// Authority endpoint; empty disables token creation
    pub url: String,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Retries for transient failures (0 disables retry)
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainsConfig {
    pub bitcoin: ChainConfig,
    pub litecoin: ChainConfig,
}

impl ChainsConfig {
    pub fn get(&self, chain: Chain) -> &ChainConfig {
        match chain {
            Chain::Bitcoin => &self.bitcoin,
            Chain::Litecoin => &self.litecoin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Block hash API with a `{height}` placeholder; empty disables lookups
    pub block_hash_api: String,

    /// Explorer link with a `{hash}` placeholder
    pub explorer_block_url: String,

    /// Explorer link with a `{height}` placeholder
    pub explorer_height_url: String,

    /// Lookup timeout (milliseconds)
    pub timeout_ms: u64,
}

impl ChainConfig {
    fn defaults(api: &str, explorer: &str) -> Self {
        Self {
            block_hash_api: api.to_string(),
            explorer_block_url: format!("https://blockchair.com/{}/block/{{hash}}", explorer),
            explorer_height_url: format!("https://blockchair.com/{}/block/{{height}}", explorer),
            timeout_ms: 8_000,
        }
    }

    pub fn explorer_templates(&self) -> ExplorerTemplates {
        ExplorerTemplates::new(self.explorer_block_url.clone(), self.explorer_height_url.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub const DEFAULT_CALENDARS: [&str; 5] = [
    "https://a.pool.opentimestamps.org",
    "https://b.pool.opentimestamps.org",
    "https://a.pool.eternitywall.com",
    "https://ots.btc.catallaxy.com",
    "https://alice.btc.calendar.opentimestamps.org",
];

impl Default for EtsConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("data"),
            },
            calendar: CalendarConfig {
                urls: DEFAULT_CALENDARS.iter().map(|u| u.to_string()).collect(),
                timeout_ms: 10_000,
                max_retries: 0,
            },
            tsa: TsaConfig {
                url: "https://freetsa.org/tsr".to_string(),
                timeout_ms: 10_000,
                max_retries: 0,
            },
            chains: ChainsConfig {
                bitcoin: ChainConfig::defaults("https://blockstream.info/api/block-height/{height}", "bitcoin"),
                litecoin: ChainConfig::defaults("https://sochain.com/api/v2/get_block/LTC/{height}", "litecoin"),
            },
        }
    }
}

impl EtsConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Configuration(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| ClientError::Configuration(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// File if given, otherwise defaults; then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)
            .map_err(|e| ClientError::Configuration(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Override settings from environment-style variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(dir) = get("DATA_DIR").filter(|d| !d.is_empty()) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("TSA_URL") {
            self.tsa.url = url;
        }
        if let Some(urls) = get("OTS_CALENDAR_URLS") {
            self.calendar.urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }

        let chains = [
            ("BTC", &mut self.chains.bitcoin),
            ("LTC", &mut self.chains.litecoin),
        ];
        for (prefix, chain) in chains {
            if let Some(api) = get(&format!("{}_BLOCK_HASH_API", prefix)) {
                chain.block_hash_api = api;
            }
            if let Some(url) = get(&format!("{}_EXPLORER_BLOCK_URL", prefix)) {
                chain.explorer_block_url = url;
            }
            if let Some(url) = get(&format!("{}_EXPLORER_HEIGHT_URL", prefix)) {
                chain.explorer_height_url = url;
            }
        }
    }

    pub fn calendar_timeout(&self) -> Duration {
        Duration::from_millis(self.calendar.timeout_ms)
    }

    pub fn tsa_timeout(&self) -> Duration {
        Duration::from_millis(self.tsa.timeout_ms)
    }

    pub fn calendar_retry(&self) -> Option<RetryConfig> {
        (self.calendar.max_retries > 0).then(|| RetryConfig {
            max_retries: self.calendar.max_retries,
            ..RetryConfig::default()
        })
    }

    pub fn tsa_retry(&self) -> Option<RetryConfig> {
        (self.tsa.max_retries > 0).then(|| RetryConfig {
            max_retries: self.tsa.max_retries,
            ..RetryConfig::default()
        })
    }
}
