use std::thread;
use std::time::{Duration, Instant};
use vebus_master::definitions::RamVariable;
use vebus_master::transport::{RtsDirection, SerialTransport};
use vebus_master::{AutoDirection, Config, FrameFilter, VeBus};
mod events;
use events::{publish, response_to_mqtt_json};

#[macro_use]
extern crate dotenv_codegen;

// Deployment constants from .env file
const VEBUS_PORT: &str = dotenv!("VEBUS_PORT");
const VEBUS_BAUD: &str = dotenv!("VEBUS_BAUD");
const VEBUS_DIRECTION: &str = dotenv!("VEBUS_DIRECTION");
const VEBUS_CONFIG: &str = dotenv!("VEBUS_CONFIG");
const VEBUS_MAINTAIN_MS: &str = dotenv!("VEBUS_MAINTAIN_MS");
const VEBUS_POLL_MS: &str = dotenv!("VEBUS_POLL_MS");
const MQTT_TOPIC_NAME: &str = dotenv!("MQTT_TOPIC_NAME");

const VERSION: &str = dotenv!("CARGO_PKG_VERSION");

const POLLED_RAM_VARS: [RamVariable; 8] = [
    RamVariable::UMainsRms,
    RamVariable::IMainsRms,
    RamVariable::UInverterRms,
    RamVariable::IInverterRms,
    RamVariable::UBat,
    RamVariable::IBat,
    RamVariable::ChargeState,
    RamVariable::OutputPower,
];

fn load_config(path: &str) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(json) => Config::from_json(&json),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No {} found, using defaults", path);
            Ok(Config::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let boot_time: Instant = Instant::now();
    let config = load_config(VEBUS_CONFIG)?;
    let maintain_period = Duration::from_millis(VEBUS_MAINTAIN_MS.parse()?);
    let poll_period = Duration::from_millis(VEBUS_POLL_MS.parse()?);

    let mut bus = VeBus::new(config);

    // Serial port ****************************
    let serial = SerialTransport::open(VEBUS_PORT, VEBUS_BAUD.parse()?)?;
    let _worker = match VEBUS_DIRECTION {
        "rts" => {
            let direction = RtsDirection::new(serial.port().try_clone()?);
            events::spawn_worker(bus.link(serial, direction))?
        }
        _ => events::spawn_worker(bus.link(serial, AutoDirection))?,
    };

    bus.set_response_callback(|response| match response_to_mqtt_json(response, MQTT_TOPIC_NAME) {
        Ok(message) => publish(&message),
        Err(e) => log::warn!("Response not published {:?}", e),
    });
    // sync frames would flood the log
    bus.set_receive_callback(
        |frame| log::trace!("Rx {:02X?}", frame),
        &[],
        &[FrameFilter::new(0xFD, 2)],
    );
    bus.set_abandon_callback(|id, command| log::warn!("Request {:02X} {:?} abandoned", id, command));
    bus.start_communication();

    bus.read_software_version()?;
    for variable in POLLED_RAM_VARS {
        bus.read_ram_var_info(variable)?;
    }

    log::info!("FW version: {}", VERSION);

    let mut last_poll = Instant::now();
    loop {
        bus.maintain();
        if let Err(e) = events::status_task(&bus, MQTT_TOPIC_NAME, boot_time) {
            log::warn!("Status not published {:?}", e);
        }
        if last_poll.elapsed() >= poll_period {
            last_poll = Instant::now();
            events::poll_task(&bus, &POLLED_RAM_VARS);
        }
        thread::sleep(maintain_period);
    }
}
