use std::sync::OnceLock;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{FabricError, FabricResult};

mod log_config;
pub use log_config::LogConfig;

pub static AGGREGATOR: OnceLock<AggregatorConfig> = OnceLock::new();
pub static PROXY: OnceLock<ProxyConfig> = OnceLock::new();

fn load<C: DeserializeOwned>() -> C {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("APP_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::prefixed("APP_").global());

    match raw_config.extract::<C>() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            std::process::exit(1);
        }
    }
}

pub fn init_aggregator() -> &'static AggregatorConfig {
    let config: AggregatorConfig = load();
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }
    AGGREGATOR.set(config).expect("config should be set once");
    aggregator()
}

pub fn aggregator() -> &'static AggregatorConfig {
    AGGREGATOR.get().expect("config should be set")
}

pub fn init_proxy() -> &'static ProxyConfig {
    let config: ProxyConfig = load();
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }
    PROXY.set(config).expect("config should be set once");
    proxy()
}

pub fn proxy() -> &'static ProxyConfig {
    PROXY.get().expect("config should be set")
}

#[derive(Deserialize, Clone, Debug)]
pub struct AggregatorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_aggregator_port")]
    pub listen_port: u16,
    #[serde(default = "default_ingest_port")]
    pub ingest_port: u16,
    /// Capacity of each sink's truncating buffer.
    #[serde(default = "default_message_buffer_size")]
    pub message_buffer_size: usize,
    /// Seconds a viewer may stay silent before its sink closes.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub log: LogConfig,
}

impl AggregatorConfig {
    pub fn validate(&self) -> FabricResult<()> {
        if self.keep_alive_secs == 0 {
            return Err(FabricError::Config(
                "keep_alive_secs must be greater than zero".into(),
            ));
        }
        if self.message_buffer_size == 0 {
            return Err(FabricError::Config(
                "message_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_proxy_port")]
    pub listen_port: u16,
    /// One inner list per shard group; order matters for placement.
    pub hash_groups: Vec<Vec<String>>,
    /// Base URL of the platform API answering log-access checks.
    pub api_endpoint: String,
    #[serde(default)]
    pub log: LogConfig,
}

impl ProxyConfig {
    pub fn validate(&self) -> FabricResult<()> {
        if self.hash_groups.is_empty() {
            return Err(FabricError::Config(
                "at least one hash group must be configured".into(),
            ));
        }
        if self.hash_groups.iter().any(|group| group.is_empty()) {
            return Err(FabricError::Config(
                "every hash group needs at least one aggregator endpoint".into(),
            ));
        }
        if self.api_endpoint.is_empty() {
            return Err(FabricError::Config("api_endpoint is not set".into()));
        }
        Ok(())
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_aggregator_port() -> u16 {
    8081
}

fn default_ingest_port() -> u16 {
    3456
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_message_buffer_size() -> usize {
    100
}

fn default_keep_alive_secs() -> u64 {
    60
}
