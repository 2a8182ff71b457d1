use serde::Deserialize;

/// Configuration of one console instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Name this instance reports itself as across the cluster.
    pub instance: String,
    /// The single receiver instance aggregates cluster data and evaluates
    /// watches; every other instance only collects and forwards.
    #[serde(default)]
    pub receiver: bool,
    #[serde(default = "default_interval_secs")]
    pub collection_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub evaluation_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    1
}

impl ConsoleConfig {
    pub fn new(instance: &str, receiver: bool) -> Self {
        Self {
            instance: instance.to_string(),
            receiver,
            collection_interval_secs: default_interval_secs(),
            evaluation_interval_secs: default_interval_secs(),
        }
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
