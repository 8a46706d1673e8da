//! Master side of the Victron VE.Bus protocol.
//!
//! A [`VeBus`] handle queues requests from the application. Its [`Link`]
//! runs in a worker context, answers sync frames from the device with the
//! queued frames and decodes broadcast status frames. [`VeBus::maintain`]
//! settles responses and must be called periodically.
//!
//! ```no_run
//! use vebus_master::{transport::SerialTransport, AutoDirection, Config, VeBus};
//! use vebus_master::definitions::RamVariable;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut bus = VeBus::new(Config::default());
//! let mut link = bus.link(SerialTransport::open("/dev/ttyUSB0", 256_000)?, AutoDirection);
//! std::thread::spawn(move || loop {
//!     let _ = link.poll();
//! });
//!
//! bus.set_response_callback(|response| println!("{:?}", response));
//! bus.start_communication();
//! bus.read_ram_var(RamVariable::UBat)?;
//! loop {
//!     bus.maintain();
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # }
//! ```

pub mod command;
pub mod config;
pub mod convert;
pub mod definitions;
pub mod fifo;
pub mod frame;
pub mod link;
pub mod response;
pub mod status;
pub mod transport;
pub mod vebus;

pub use config::Config;
pub use link::{FrameFilter, FrameKind, Link};
pub use response::{ResponseData, ResponseValue};
pub use transport::AutoDirection;
pub use vebus::{RequestError, VeBus};
