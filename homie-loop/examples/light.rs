use homie_loop::{ColorRgb, Datatype, DeviceConfig, HomieDevice, MqttTransport, SpawnError, run};
use rumqttc::MqttOptions;

#[tokio::main]
async fn main() -> Result<(), SpawnError> {
    pretty_env_logger::init();

    let config = DeviceConfig {
        device_id: "example-light".to_owned(),
        device_name: "Homie light example".to_owned(),
        ..DeviceConfig::default()
    };
    let mqttoptions = MqttOptions::new("homie_example", "test.mosquitto.org", 1883);
    let (transport, events) = MqttTransport::new(mqttoptions, &config.device_base());
    let mut homie = HomieDevice::new(config, transport);

    let node = homie
        .new_node("light", "Light", "light")
        .map_err(|_| SpawnError::Internal("Failed to add node"))?;
    let power = homie
        .new_property(node, "power", "On", Datatype::Boolean)
        .map_err(|_| SpawnError::Internal("Failed to add property"))?;
    homie
        .property_mut(power)
        .set_settable(true)
        .add_callback(|property| println!("power is now {}", property.value()));
    let colour = homie
        .new_property(node, "colour", "Colour", Datatype::Color)
        .map_err(|_| SpawnError::Internal("Failed to add property"))?;
    homie
        .property_mut(colour)
        .set_settable(true)
        .set_format("rgb")
        .add_callback(|property| match property.color::<ColorRgb>() {
            Some(rgb) => println!("colour is now {:06x}", rgb.packed()),
            None => println!("invalid colour {:?}", property.value()),
        });
    homie
        .init()
        .map_err(|_| SpawnError::Internal("Failed to initialize device"))?;

    // This will only return (with an error) if something goes wrong with the MQTT task.
    run(&mut homie, events, |_, _| {}).await
}
