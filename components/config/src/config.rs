use std::env;
use std::str::FromStr;

pub const DEFAULT_INDEXER_URL: &str = "http://localhost:80";
pub const DEFAULT_ORDISCAN_URL: &str = "https://api.ordiscan.com";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_BATCH_SIZE: u64 = 100;
pub const DEFAULT_CONCURRENT_PROCESSING: usize = 10;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_START_INSCRIPTION: u64 = 0;
pub const DEFAULT_HIGH_FAILURE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct Config {
    pub provider: ProviderConfig,
    pub kv: KvConfig,
    pub workload: WorkloadConfig,
    pub cache: CacheConfig,
    pub network: Network,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderType {
    Node,
    Api,
}

#[derive(Clone, Debug)]
pub struct KvConfig {
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    pub worker_id: Option<String>,
    pub batch_size: u64,
    pub concurrent_processing: usize,
    pub poll_interval_ms: u64,
    pub start_inscription: u64,
    pub high_failure_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Signet,
    Testnet,
}

impl Network {
    /// Network qualifier used inside `did:btco` resource identifiers.
    /// Mainnet identifiers carry no qualifier at all.
    pub fn did_tag(&self) -> Option<&'static str> {
        match self {
            Network::Mainnet => None,
            Network::Signet => Some("sig"),
            Network::Testnet => Some("test"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Signet => "signet",
            Network::Testnet => "testnet",
        }
    }

    pub fn from_label(label: &str) -> Result<Network, String> {
        match label {
            "mainnet" => Ok(Network::Mainnet),
            "signet" => Ok(Network::Signet),
            "testnet" => Ok(Network::Testnet),
            _ => Err(format!("NETWORK not supported: {label}")),
        }
    }
}

impl Config {
    /// Builds the runtime configuration from process environment variables,
    /// falling back to defaults for anything unset. Called once at startup;
    /// the resulting value is passed explicitly to every component.
    pub fn from_env() -> Result<Config, String> {
        let provider_type = match env_var("PROVIDER_TYPE").as_deref() {
            None | Some("node") => ProviderType::Node,
            Some("api") => ProviderType::Api,
            Some(other) => return Err(format!("PROVIDER_TYPE not supported: {other}")),
        };
        let network = match env_var("NETWORK") {
            Some(label) => Network::from_label(&label)?,
            None => Network::Mainnet,
        };
        let endpoint = env_var("INDEXER_URL").unwrap_or_else(|| match provider_type {
            ProviderType::Node => DEFAULT_INDEXER_URL.to_string(),
            ProviderType::Api => DEFAULT_ORDISCAN_URL.to_string(),
        });
        let config = Config {
            provider: ProviderConfig {
                provider_type,
                endpoint,
                api_key: env_var("ORDISCAN_API_KEY"),
                timeout_secs: env_parse("PROVIDER_TIMEOUT")?
                    .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            },
            kv: KvConfig {
                url: env_var("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            },
            workload: WorkloadConfig {
                worker_id: env_var("WORKER_ID"),
                batch_size: env_parse("BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
                concurrent_processing: env_parse("CONCURRENT_PROCESSING")?
                    .unwrap_or(DEFAULT_CONCURRENT_PROCESSING),
                poll_interval_ms: env_parse("POLL_INTERVAL")?.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                start_inscription: env_parse("START_INSCRIPTION")?
                    .unwrap_or(DEFAULT_START_INSCRIPTION),
                high_failure_threshold: env_parse("HIGH_FAILURE_THRESHOLD")?
                    .unwrap_or(DEFAULT_HIGH_FAILURE_THRESHOLD),
            },
            cache: CacheConfig {
                ttl_secs: env_parse("CACHE_TTL")?.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            },
            network,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.provider.provider_type == ProviderType::Api && self.provider.api_key.is_none() {
            return Err("ORDISCAN_API_KEY is required when PROVIDER_TYPE=api".to_string());
        }
        if self.workload.batch_size == 0 {
            return Err("BATCH_SIZE must be greater than zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.workload.high_failure_threshold) {
            return Err("HIGH_FAILURE_THRESHOLD must be between 0 and 1".to_string());
        }
        Ok(())
    }

    pub fn devnet_default() -> Config {
        Config {
            provider: ProviderConfig {
                provider_type: ProviderType::Node,
                endpoint: DEFAULT_INDEXER_URL.to_string(),
                api_key: None,
                timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            },
            kv: KvConfig {
                url: DEFAULT_REDIS_URL.to_string(),
            },
            workload: WorkloadConfig {
                worker_id: None,
                batch_size: DEFAULT_BATCH_SIZE,
                concurrent_processing: DEFAULT_CONCURRENT_PROCESSING,
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                start_inscription: DEFAULT_START_INSCRIPTION,
                high_failure_threshold: DEFAULT_HIGH_FAILURE_THRESHOLD,
            },
            cache: CacheConfig {
                ttl_secs: DEFAULT_CACHE_TTL_SECS,
            },
            network: Network::Mainnet,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, String> {
    match env_var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid value for {name}: {value}")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolves_network_labels() {
        assert_eq!(Network::from_label("mainnet"), Ok(Network::Mainnet));
        assert_eq!(Network::from_label("signet"), Ok(Network::Signet));
        assert_eq!(Network::from_label("testnet"), Ok(Network::Testnet));
        assert!(Network::from_label("regtest").is_err());
    }

    #[test]
    fn network_did_tags() {
        assert_eq!(Network::Mainnet.did_tag(), None);
        assert_eq!(Network::Signet.did_tag(), Some("sig"));
        assert_eq!(Network::Testnet.did_tag(), Some("test"));
    }

    #[test]
    fn api_provider_requires_key() {
        let mut config = Config::devnet_default();
        config.provider.provider_type = ProviderType::Api;
        assert!(config.validate().is_err());
        config.provider.api_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_workloads() {
        let mut config = Config::devnet_default();
        config.workload.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::devnet_default();
        config.workload.high_failure_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
