use eyre::Report;
use homie_loop::{Datatype, DeviceConfig};
use rumqttc::{MqttOptions, Transport};
use rustls::{ClientConfig, RootCertStore};
use serde_derive::Deserialize;
use stable_eyre::eyre::WrapErr;
use std::fs::read_to_string;
use std::time::Duration;

const DEFAULT_HOST: &str = "test.mosquitto.org";
const DEFAULT_PORT: u16 = 1883;
const CONFIG_FILENAME: &str = "virtual-homie.toml";
const KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub homie: DeviceConfig,
    pub nodes: Vec<NodeConfig>,
}

impl Config {
    pub fn from_file() -> Result<Config, Report> {
        Config::read(CONFIG_FILENAME)
    }

    fn read(filename: &str) -> Result<Config, Report> {
        let config_file =
            read_to_string(filename).wrap_err_with(|| format!("Reading {filename}"))?;
        Ok(toml::from_str(&config_file)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> MqttConfig {
        MqttConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            use_tls: false,
            username: None,
            password: None,
            client_name: None,
        }
    }
}

/// A node of the virtual device.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

/// A property of a virtual node. Raw properties are identified by their `raw_topic` rather than
/// an `id`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PropertyConfig {
    pub id: String,
    pub name: String,
    pub datatype: Datatype,
    pub settable: bool,
    pub retained: bool,
    pub fake_retained: bool,
    pub publish_empty: bool,
    pub unit: Option<String>,
    pub format: Option<String>,
    /// The value to start with, before anything is received from the broker.
    pub initial: Option<String>,
    pub raw_topic: Option<String>,
}

impl Default for PropertyConfig {
    fn default() -> PropertyConfig {
        PropertyConfig {
            id: String::new(),
            name: String::new(),
            datatype: Datatype::String,
            settable: false,
            retained: true,
            fake_retained: false,
            publish_empty: true,
            unit: None,
            format: None,
            initial: None,
            raw_topic: None,
        }
    }
}

/// Construct the `MqttOptions` for connecting to the MQTT broker based on configuration options or
/// defaults.
pub fn get_mqtt_options(config: MqttConfig, device_id: &str) -> MqttOptions {
    let client_name = config.client_name.unwrap_or_else(|| device_id.to_owned());

    let mut mqtt_options = MqttOptions::new(client_name, config.host, config.port);

    mqtt_options.set_keep_alive(KEEP_ALIVE);
    if let (Some(username), Some(password)) = (config.username, config.password) {
        mqtt_options.set_credentials(username, password);
    }

    if config.use_tls {
        let native_certs = rustls_native_certs::load_native_certs();
        for error in &native_certs.errors {
            log::warn!("Failed to load platform certificate: {}", error);
        }
        let mut root_store = RootCertStore::empty();
        root_store.add_parsable_certificates(native_certs.certs);
        let client_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        mqtt_options.set_transport(Transport::tls_with_config(client_config.into()));
    }
    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parsing the example config file should not give any errors.
    #[test]
    fn example_config() {
        let config = Config::read("virtual-homie.example.toml").unwrap();
        assert_eq!(config.nodes.len(), 2);
        let power = &config.nodes[1].properties[0];
        assert_eq!(power.datatype, Datatype::Boolean);
        assert!(power.settable);
        assert!(power.retained);
        assert_eq!(
            config.nodes[1].properties[2].raw_topic.as_deref(),
            Some("home/lamp1/power")
        );
    }

    /// Parsing an empty config file should not give any errors.
    #[test]
    fn empty_config() {
        let config = toml::from_str::<Config>("").unwrap();
        assert_eq!(config.homie, DeviceConfig::default());
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn unknown_datatype_is_rejected() {
        assert!(
            toml::from_str::<Config>(
                r#"
                [[nodes]]
                id = "n"
                name = "N"
                type = "t"
                [[nodes.properties]]
                id = "p"
                datatype = "decimal"
                "#
            )
            .is_err()
        );
    }
}
