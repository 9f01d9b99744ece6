/// TOML configuration with sensible defaults.
/// No config file is required to run — defaults work out of the box.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rf: RfConfig,
    pub ir: IrConfig,
    pub bluetooth: BluetoothConfig,
    pub integration: IntegrationConfig,
    pub discovery: DiscoveryConfig,
    pub paths: PathsConfig,
    /// Task queue channel capacity.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RfConfig {
    /// CE GPIO line (CSN is fixed to SPI chip-select 0, /dev/spidev0.0).
    pub ce_pin: u32,
    pub spi_path: String,
    pub channel: u8,
    /// Two 5-byte addresses, hex-encoded, for reading pipes 1 and 2.
    pub addresses: Vec<String>,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IrConfig {
    pub tx_gpio: u32,
    pub rx_gpio: u32,
    pub carrier_hz: u32,
    /// Trailing silence (ms) that ends a recording session.
    pub recording_silence_ms: u64,
    pub repeat_interval_ms: u64,
    pub max_pulses: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub adapter_alias: String,
    pub maintenance_interval_s: u64,
    pub connect_timeout_s: u64,
    pub confirm_timeout_s: u64,
    pub service_auth_timeout_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub base_url: String,
    pub token: String,
    pub request_timeout_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub service_name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub config_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rf: RfConfig::default(),
            ir: IrConfig::default(),
            bluetooth: BluetoothConfig::default(),
            integration: IntegrationConfig::default(),
            discovery: DiscoveryConfig::default(),
            paths: PathsConfig::default(),
            queue_capacity: 64,
        }
    }
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            ce_pin: 25,
            spi_path: "/dev/spidev0.0".into(),
            channel: 5,
            addresses: Vec::new(),
            poll_interval_ms: 50,
        }
    }
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            tx_gpio: 18,
            rx_gpio: 23,
            carrier_hz: 38_000,
            recording_silence_ms: 100,
            repeat_interval_ms: 108,
            max_pulses: 512,
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter_alias: "Equilibrium Remote".into(),
            maintenance_interval_s: 5,
            connect_timeout_s: 10,
            confirm_timeout_s: 30,
            service_auth_timeout_s: 15,
        }
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            request_timeout_s: 5,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "_equilibrium._tcp".into(),
            port: 8000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { config_dir: "config".into() }
    }
}

impl Config {
    /// Load config from `equilibrium.toml` in the working directory, or
    /// return defaults if not found or unparsable.
    pub fn load() -> Self {
        let config_path = config_file_path();
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {config_path}");
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config file {config_path}: {e}. Using defaults.");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found at {config_path}. Using defaults.");
                Self::default()
            }
        }
    }
}

fn config_file_path() -> String {
    std::env::var("EQUILIBRIUM_CONFIG").unwrap_or_else(|_| "equilibrium.toml".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.rf.channel, 5);
        assert_eq!(config.rf.poll_interval_ms, 50);
        assert_eq!(config.discovery.service_name, "_equilibrium._tcp");
        assert_eq!(config.discovery.port, 8000);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            queue_capacity = 128

            [rf]
            channel = 10
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.rf.channel, 10);
        // Other fields should be defaults
        assert_eq!(config.rf.poll_interval_ms, 50);
        assert_eq!(config.bluetooth.adapter_alias, "Equilibrium Remote");
    }
}
