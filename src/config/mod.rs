//! Node configuration.
//!
//! Sources, later wins: built-in defaults, an optional TOML file
//! (`--config <path>`), the `HYDRO_NODE_SECRET` environment variable, then
//! command-line flags.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::clock::DEFAULT_NTP_SERVER;
use crate::dispatch::DEFAULT_RESPONSE_BUFFER_BUDGET;
use crate::transport::HttpsConfig;
use crate::types::NodeIdentity;

/// Environment variable holding the shared secret
pub const SECRET_ENV_VAR: &str = "HYDRO_NODE_SECRET";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub sensor_id: String,
    pub secret_key: String,
    pub host: String,
    pub path: String,
    pub port: u16,
    /// Type tag sent with each reading
    pub reading_type: String,
    pub interval_seconds: u64,
    pub ntp_server: String,
    pub ntp_update_interval_seconds: u64,
    pub time_offset_seconds: i64,
    pub request_timeout_seconds: u64,
    pub accept_invalid_certs: bool,
    pub response_buffer_budget: usize,
    pub log_level: String,
    pub simulate: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sensor_id: String::new(),
            secret_key: String::new(),
            host: "hydronode.texhfexlabs.de".to_string(),
            path: "/api/webhook/sensor-value".to_string(),
            port: 443,
            reading_type: "ph".to_string(),
            interval_seconds: 60,
            ntp_server: DEFAULT_NTP_SERVER.to_string(),
            ntp_update_interval_seconds: 60,
            time_offset_seconds: 0,
            request_timeout_seconds: 10,
            accept_invalid_certs: false,
            response_buffer_budget: DEFAULT_RESPONSE_BUFFER_BUDGET,
            log_level: "info".to_string(),
            simulate: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file; missing keys take defaults
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.as_ref().display(), e))?;

        let config: NodeConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Build the configuration from process arguments (without the program
    /// name) and an optional secret from the environment.
    pub fn from_args<I>(args: I, env_secret: Option<String>) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();

        let mut config = match config_path(&args)? {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(secret) = env_secret.filter(|s| !s.is_empty()) {
            config.secret_key = secret;
        }

        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--config" => i += 1,
                "--sensor-id" => {
                    config.sensor_id = require(&args[i], value)?;
                    i += 1;
                }
                "--secret" => {
                    config.secret_key = require(&args[i], value)?;
                    i += 1;
                }
                "--host" => {
                    config.host = require(&args[i], value)?;
                    i += 1;
                }
                "--path" => {
                    config.path = require(&args[i], value)?;
                    i += 1;
                }
                "--port" => {
                    config.port = require(&args[i], value)?.parse()?;
                    i += 1;
                }
                "--type" => {
                    config.reading_type = require(&args[i], value)?;
                    i += 1;
                }
                "--interval" => {
                    config.interval_seconds = require(&args[i], value)?.parse()?;
                    i += 1;
                }
                "--ntp-server" => {
                    config.ntp_server = require(&args[i], value)?;
                    i += 1;
                }
                "--log-level" => {
                    config.log_level = require(&args[i], value)?;
                    i += 1;
                }
                "--insecure" => config.accept_invalid_certs = true,
                "--simulate" => config.simulate = true,
                other => anyhow::bail!("Unknown argument: {}", other),
            }
            i += 1;
        }

        Ok(config)
    }

    /// Reject configurations the node cannot report with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sensor_id.is_empty() {
            anyhow::bail!("sensor_id is required (--sensor-id)");
        }
        if self.secret_key.is_empty() {
            anyhow::bail!("secret_key is required (--secret or {})", SECRET_ENV_VAR);
        }
        if self.host.is_empty() {
            anyhow::bail!("host must not be empty");
        }
        if self.interval_seconds == 0 {
            anyhow::bail!("interval_seconds must be at least 1");
        }
        if self.ntp_update_interval_seconds == 0 {
            anyhow::bail!("ntp_update_interval_seconds must be at least 1");
        }
        Ok(())
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(
            self.sensor_id.clone(),
            self.secret_key.clone().into_bytes(),
            self.host.clone(),
            self.path.clone(),
            self.port,
        )
    }

    pub fn https(&self) -> HttpsConfig {
        HttpsConfig {
            timeout: Duration::from_secs(self.request_timeout_seconds),
            accept_invalid_certs: self.accept_invalid_certs,
            max_response_bytes: self.response_buffer_budget,
        }
    }

    pub fn ntp_update_interval(&self) -> Duration {
        Duration::from_secs(self.ntp_update_interval_seconds)
    }
}

/// Path following `--config`, if the flag is present
fn config_path(args: &[String]) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == "--config") {
        Some(i) => require("--config", args.get(i + 1).cloned()).map(Some),
        None => Ok(None),
    }
}

fn require(flag: &str, value: Option<String>) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
}
