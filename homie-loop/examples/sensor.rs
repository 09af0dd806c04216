use homie_loop::{Datatype, DeviceConfig, HomieDevice, MqttTransport, run};
use rand::random;
use rumqttc::MqttOptions;
use std::error::Error;
use std::time::{Duration, Instant};

const UPDATE_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    pretty_env_logger::init();

    let config = DeviceConfig {
        device_id: "example-sensor".to_owned(),
        device_name: "Homie sensor example".to_owned(),
        ..DeviceConfig::default()
    };
    let mqttoptions = MqttOptions::new("homie_example", "test.mosquitto.org", 1883);
    let (transport, events) = MqttTransport::new(mqttoptions, &config.device_base());
    let mut homie = HomieDevice::new(config, transport);

    let node = homie.new_node("sensor", "Sensor", "Environment sensor")?;
    let temperature = homie.new_property(node, "temperature", "Temperature", Datatype::Float)?;
    homie.property_mut(temperature).set_unit("ºC");
    let humidity = homie.new_property(node, "humidity", "Humidity", Datatype::Integer)?;
    homie
        .property_mut(humidity)
        .set_unit("%")
        .set_format("0:100");
    homie.init()?;

    let mut last_update: Option<Instant> = None;
    run(&mut homie, events, |homie, now| {
        if last_update.is_some_and(|last| now - last < UPDATE_INTERVAL) {
            return;
        }
        last_update = Some(now);
        let temperature_value = random::<f32>() * 40.0;
        let humidity_value = (random::<f32>() * 100.0) as u8;
        println!("Update: {}ºC {}%", temperature_value, humidity_value);
        homie.set_value(temperature, &temperature_value.to_string());
        homie.set_value(humidity, &humidity_value.to_string());
    })
    .await?;
    Ok(())
}
