mod config;

use crate::config::{Config, NodeConfig, PropertyConfig, get_mqtt_options};
use eyre::Report;
use homie_loop::{HomieDevice, MqttTransport, PropertyId, Transport, run_until};
use mac_address::get_mac_address;
use stable_eyre::eyre::WrapErr;
use std::future;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    pretty_env_logger::init();
    color_backtrace::install();

    let config = Config::from_file()?;

    let mqtt_options = get_mqtt_options(config.mqtt, &config.homie.device_id);
    let (transport, events) = MqttTransport::new(mqtt_options, &config.homie.device_base());
    let mut homie = HomieDevice::new(config.homie, transport);
    homie.set_firmware(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    match network_info() {
        Some((local_ip, mac)) => homie.set_network_info(&local_ip, &mac),
        None => log::warn!("Couldn't determine local IP and MAC address."),
    }

    let initial_values = add_nodes(&mut homie, &config.nodes)?;
    homie.init()?;
    for (id, value) in initial_values {
        if !homie.set_value(id, &value) {
            log::warn!(
                "Initial value {:?} is invalid for {}.",
                value,
                homie.property(id).topic()
            );
        }
    }

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => log::info!("Interrupted, shutting down."),
            Err(e) => {
                log::error!("Failed to listen for Ctrl-C: {}", e);
                future::pending::<()>().await;
            }
        }
    };
    run_until(&mut homie, events, |_, _| {}, shutdown).await?;
    Ok(())
}

fn network_info() -> Option<(String, String)> {
    let local_ip = local_ipaddress::get()?;
    let mac = get_mac_address().ok().flatten()?;
    Some((local_ip, mac.to_string()))
}

/// Add the configured nodes and properties to the device, returning the initial values to set
/// once it is initialized.
fn add_nodes<T: Transport>(
    homie: &mut HomieDevice<T>,
    nodes: &[NodeConfig],
) -> Result<Vec<(PropertyId, String)>, Report> {
    let mut initial_values = vec![];
    for node_config in nodes {
        let node = homie
            .new_node(&node_config.id, &node_config.name, &node_config.node_type)
            .wrap_err_with(|| format!("Adding node {}", node_config.id))?;
        for property_config in &node_config.properties {
            let label = property_config
                .raw_topic
                .as_deref()
                .unwrap_or(&property_config.id);
            let id = match &property_config.raw_topic {
                Some(topic) => homie.new_raw_property(
                    node,
                    topic,
                    &property_config.name,
                    property_config.datatype,
                ),
                None => homie.new_property(
                    node,
                    &property_config.id,
                    &property_config.name,
                    property_config.datatype,
                ),
            }
            .wrap_err_with(|| format!("Adding property {} to node {}", label, node_config.id))?;
            configure_property(homie, id, property_config);
            if let Some(initial) = &property_config.initial {
                initial_values.push((id, initial.clone()));
            }
        }
    }
    Ok(initial_values)
}

fn configure_property<T: Transport>(
    homie: &mut HomieDevice<T>,
    id: PropertyId,
    config: &PropertyConfig,
) {
    let property = homie.property_mut(id);
    if config.raw_topic.is_none() {
        property
            .set_settable(config.settable)
            .set_retained(config.retained)
            .set_fake_retained(config.fake_retained)
            .set_publish_empty(config.publish_empty);
    }
    if let Some(unit) = &config.unit {
        property.set_unit(unit);
    }
    if let Some(format) = &config.format {
        property.set_format(format);
    }
    if property.is_settable() {
        property.add_callback(|property| {
            log::info!("{} set to {:?}", property.topic(), property.value());
        });
    }
}
