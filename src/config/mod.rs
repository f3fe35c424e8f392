use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub target: TargetConfig,
    pub load: LoadConfig,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub url: String,
    pub access_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadConfig {
    pub clients: usize,
    pub duration_secs: u64,
    pub call_interval_ms: u64,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_arguments")]
    pub arguments: serde_json::Value,
}

fn default_tool() -> String {
    "server_info".to_string()
}

fn default_arguments() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
