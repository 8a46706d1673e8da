use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use log::{info, warn};
use serde::Serialize;
use std::fmt::Debug;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vebus_master::command::Target;
use vebus_master::definitions::RamVariable;
use vebus_master::{Link, ResponseData, VeBus};

// idle time of the worker between two transport polls
const WORKER_IDLE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Flattens a serializable struct into one message per field.
pub fn data_to_vec_mqtt_json<T: Serialize>(
    data: &T,
    mqtt_topic_name: &str,
    group: &str,
) -> anyhow::Result<Vec<MqttMessage>> {
    let mut mqtt_payload: Vec<MqttMessage> = vec![];
    match serde_json::to_value(data)? {
        serde_json::Value::Object(fields) => {
            fields.iter().for_each(|(key, value)| {
                mqtt_payload.push(MqttMessage {
                    topic: format!("{}/{}/{}", mqtt_topic_name, group, key),
                    payload: format!("{}", value),
                });
            });
        }
        value => mqtt_payload.push(MqttMessage {
            topic: format!("{}/{}", mqtt_topic_name, group),
            payload: format!("{}", value),
        }),
    }
    Ok(mqtt_payload)
}

pub fn response_to_mqtt_json(
    response: &ResponseData,
    mqtt_topic_name: &str,
) -> anyhow::Result<MqttMessage> {
    let name = match response.target {
        Some(Target::RamVar(variable)) => format!("{:?}", variable),
        Some(Target::Setting(setting)) => format!("{:?}", setting),
        None => format!("{:?}", response.command),
    };
    Ok(MqttMessage {
        topic: format!("{}/{}", mqtt_topic_name, name),
        payload: serde_json::to_string(&response.value)?,
    })
}

pub fn publish(message: &MqttMessage) {
    info!("{} {}", message.topic, message.payload);
}

/// Runs `link` on its own thread for the life of the process.
pub fn spawn_worker<S, P>(mut link: Link<S, P>) -> anyhow::Result<JoinHandle<()>>
where
    S: serial::Read<u8> + serial::Write<u8> + Send + 'static,
    <S as serial::Read<u8>>::Error: Debug,
    <S as serial::Write<u8>>::Error: Debug,
    P: OutputPin + Send + 'static,
    P::Error: Debug,
{
    let handle = thread::Builder::new()
        .name("vebus_worker".to_string())
        .spawn(move || loop {
            if let Err(e) = link.poll() {
                warn!("VE.Bus link error {:?}", e);
            }
            thread::sleep(WORKER_IDLE);
        })?;
    Ok(handle)
}

/// Queues the periodic reads, at most six RAM variables per frame.
pub fn poll_task(bus: &VeBus, variables: &[RamVariable]) {
    for chunk in variables.chunks(vebus_master::command::MAX_RAM_VARS_PER_READ) {
        if let Err(e) = bus.read_ram_vars(chunk) {
            warn!("Read request rejected: {}", e);
        }
    }
    if let Err(e) = bus.read_device_state() {
        warn!("Device state request rejected: {}", e);
    }
}

/// Publishes every status snapshot that changed since the last call.
pub fn status_task(bus: &VeBus, mqtt_topic_name: &str, boot_time: Instant) -> anyhow::Result<()> {
    let mut messages = vec![];
    if bus.new_master_multi_led_available() {
        messages.extend(data_to_vec_mqtt_json(
            &bus.master_multi_led(),
            mqtt_topic_name,
            "led",
        )?);
    }
    if bus.new_multi_plus_status_available() {
        messages.extend(data_to_vec_mqtt_json(
            &bus.multi_plus_status(),
            mqtt_topic_name,
            "status",
        )?);
    }
    if bus.new_dc_info_available() {
        messages.extend(data_to_vec_mqtt_json(
            &bus.dc_info(),
            mqtt_topic_name,
            "dc",
        )?);
    }
    while let Some(phase) = bus.new_ac_info_available() {
        if let Some(ac) = bus.ac_info(phase) {
            messages.extend(data_to_vec_mqtt_json(
                &ac,
                mqtt_topic_name,
                &format!("ac/{:?}", phase),
            )?);
        }
    }
    if messages.is_empty() {
        return Ok(());
    }
    messages.iter().for_each(publish);

    // update alive time update
    publish(&MqttMessage {
        topic: mqtt_topic_name.to_string(),
        payload: format!("Uptime {:?}", Instant::now().duration_since(boot_time)),
    });
    Ok(())
}
