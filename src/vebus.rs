use crate::command::{RamVarList, Request, Target, MAX_RAM_VARS_PER_READ};
use crate::config::Config;
use crate::convert::{RamVarInfo, SettingInfo};
use crate::definitions::{
    DeviceStateCommand, PhaseInfo, RamVariable, Setting, StorageType, SwitchState, WinmonCommand,
};
use crate::fifo::{Correlation, RequestRecord};
use crate::link::{FrameFilter, Link, Shared};
use crate::response::{self, ResponseData};
use crate::status::{AcPhaseInfo, DcInfo, MasterMultiLed, MultiPlusStatus};
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use log::{debug, info, warn};
use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

// transaction id of switch frames, which carry none on the wire
const SWITCH_STATE_ID: u8 = 0;

/// Why a request was not queued.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("no free transaction id")]
    FifoFull,
    #[error("value below setting minimum")]
    OutsideLowerRange,
    #[error("value above setting maximum")]
    OutsideUpperRange,
    #[error("no conversion info available or value out of range")]
    ConvertError,
    #[error("invalid argument")]
    InvalidArgument,
}

pub type ResponseCallback = Box<dyn FnMut(&ResponseData) + Send>;
pub type ReceiveCallback = Box<dyn FnMut(&[u8]) + Send>;
pub type AbandonCallback = Box<dyn FnMut(u8, WinmonCommand) + Send>;

/// Application side handle of the engine.
///
/// Requests only queue work. The [`Link`] returned by [`VeBus::link`] puts it
/// on the bus from the worker context, and [`VeBus::maintain`] has to be
/// called periodically to settle responses and run the callbacks.
pub struct VeBus {
    shared: Arc<Shared>,
    on_response: Option<ResponseCallback>,
    on_receive: Option<ReceiveCallback>,
    on_abandon: Option<AbandonCallback>,
}

impl Default for VeBus {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl VeBus {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            on_response: None,
            on_receive: None,
            on_abandon: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Worker for `serial`; `direction` is the transmit-enable line.
    pub fn link<S, P>(&self, serial: S, direction: P) -> Link<S, P>
    where
        S: serial::Read<u8> + serial::Write<u8>,
        <S as serial::Read<u8>>::Error: Debug,
        <S as serial::Write<u8>>::Error: Debug,
        P: OutputPin,
        P::Error: Debug,
    {
        Link::new(serial, direction, self.shared.clone())
    }

    pub fn set_response_callback(&mut self, cb: impl FnMut(&ResponseData) + Send + 'static) {
        self.on_response = Some(Box::new(cb));
    }

    /// Raw frames passing the filters are handed to `cb` from [`VeBus::maintain`].
    pub fn set_receive_callback(
        &mut self,
        cb: impl FnMut(&[u8]) + Send + 'static,
        whitelist: &[FrameFilter],
        blacklist: &[FrameFilter],
    ) {
        self.shared
            .receive_log
            .lock()
            .set_filters(whitelist, blacklist);
        self.on_receive = Some(Box::new(cb));
    }

    /// Called with the id of every request dropped after its last resend.
    pub fn set_abandon_callback(&mut self, cb: impl FnMut(u8, WinmonCommand) + Send + 'static) {
        self.on_abandon = Some(Box::new(cb));
    }

    pub fn start_communication(&self) {
        self.shared.resumed.store(true, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        info!("VE.Bus communication started");
    }

    /// Stops dispatching. Queued requests stay in the fifo.
    pub fn stop_communication(&self) {
        self.shared.running.store(false, Ordering::Release);
        info!("VE.Bus communication stopped");
    }

    pub fn is_communicating(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn fifo_size(&self) -> usize {
        self.shared.fifo.lock().len()
    }

    fn enqueue(&self, request: Request) -> Result<u8, RequestError> {
        let mut fifo = self.shared.fifo.lock();
        let id = fifo.allocate_id().ok_or(RequestError::FifoFull)?;
        fifo.add_or_update(RequestRecord::new(id, request), true, Instant::now());
        Ok(id)
    }

    // address and data frame share one id, the address frame expects no answer
    fn enqueue_two_phase_write(&self, target: Target, value: u16) -> Result<u8, RequestError> {
        let mut fifo = self.shared.fifo.lock();
        let id = fifo.allocate_id().ok_or(RequestError::FifoFull)?;
        let now = Instant::now();
        fifo.add_or_update(
            RequestRecord::new(id, Request::WriteAddress(target)),
            false,
            now,
        );
        fifo.add_or_update(
            RequestRecord::new(id, Request::WriteData { target, value }),
            false,
            now,
        );
        Ok(id)
    }

    pub fn read_ram_var(&self, variable: RamVariable) -> Result<u8, RequestError> {
        self.read_ram_vars(&[variable])
    }

    /// Reads up to six RAM variables with one frame.
    pub fn read_ram_vars(&self, variables: &[RamVariable]) -> Result<u8, RequestError> {
        if variables.is_empty() || variables.len() > MAX_RAM_VARS_PER_READ {
            return Err(RequestError::InvalidArgument);
        }
        let list = RamVarList::from_slice(variables).map_err(|_| RequestError::InvalidArgument)?;
        self.enqueue(Request::ReadRamVars(list))
    }

    pub fn read_setting(&self, setting: Setting) -> Result<u8, RequestError> {
        self.enqueue(Request::ReadSetting(setting))
    }

    pub fn write_ram_var_raw(
        &self,
        variable: RamVariable,
        value: u16,
        eeprom: bool,
    ) -> Result<u8, RequestError> {
        self.enqueue(Request::WriteViaId {
            target: Target::RamVar(variable),
            value,
            storage: StorageType::from_eeprom(eeprom),
        })
    }

    pub fn write_setting_raw(
        &self,
        setting: Setting,
        value: u16,
        eeprom: bool,
    ) -> Result<u8, RequestError> {
        self.enqueue(Request::WriteViaId {
            target: Target::Setting(setting),
            value,
            storage: StorageType::from_eeprom(eeprom),
        })
    }

    /// Converts `value` with the RAM variable's scale and offset, then writes it.
    pub fn write_ram_var_value(
        &self,
        variable: RamVariable,
        value: f32,
        eeprom: bool,
    ) -> Result<u8, RequestError> {
        let raw = self.ram_var_info(variable).value_to_raw(value)?;
        self.write_ram_var_raw(variable, raw, eeprom)
    }

    /// Converts `value` with the setting's scale and offset, refusing values
    /// outside the setting's range.
    pub fn write_setting_value(
        &self,
        setting: Setting,
        value: f32,
        eeprom: bool,
    ) -> Result<u8, RequestError> {
        let raw = self.setting_info(setting).to_raw(value)?;
        self.write_setting_raw(setting, raw, eeprom)
    }

    /// Address + data write, answered with a RAM write acknowledgement.
    pub fn write_ram_var(&self, variable: RamVariable, value: u16) -> Result<u8, RequestError> {
        self.enqueue_two_phase_write(Target::RamVar(variable), value)
    }

    /// Address + data write, answered with a setting write acknowledgement.
    pub fn write_setting(&self, setting: Setting, value: u16) -> Result<u8, RequestError> {
        self.enqueue_two_phase_write(Target::Setting(setting), value)
    }

    /// Refreshes the scale and offset of `variable` from the device.
    pub fn read_ram_var_info(&self, variable: RamVariable) -> Result<u8, RequestError> {
        self.enqueue(Request::ReadInfo(Target::RamVar(variable)))
    }

    /// Refreshes scale, offset and limits of `setting` from the device.
    pub fn read_setting_info(&self, setting: Setting) -> Result<u8, RequestError> {
        self.enqueue(Request::ReadInfo(Target::Setting(setting)))
    }

    /// Queues a switch frame. A newer state replaces one still waiting.
    pub fn set_switch_state(&self, state: SwitchState) {
        self.shared.fifo.lock().add_or_update(
            RequestRecord::new(SWITCH_STATE_ID, Request::SwitchState(state)),
            true,
            Instant::now(),
        );
    }

    pub fn read_software_version(&self) -> Result<u8, RequestError> {
        self.enqueue(Request::SoftwareVersion)
    }

    pub fn read_device_state(&self) -> Result<u8, RequestError> {
        self.enqueue(Request::DeviceState(DeviceStateCommand::Inquire))
    }

    pub fn set_device_state(&self, command: DeviceStateCommand) -> Result<u8, RequestError> {
        self.enqueue(Request::DeviceState(command))
    }

    pub fn ram_var_info(&self, variable: RamVariable) -> RamVarInfo {
        self.shared.info.read().ram_var(variable)
    }

    pub fn setting_info(&self, setting: Setting) -> SettingInfo {
        self.shared.info.read().setting(setting)
    }

    pub fn new_master_multi_led_available(&self) -> bool {
        self.shared.status.new_master_multi_led_available()
    }

    pub fn master_multi_led(&self) -> MasterMultiLed {
        self.shared.status.master_multi_led()
    }

    pub fn new_multi_plus_status_available(&self) -> bool {
        self.shared.status.new_multi_plus_status_available()
    }

    pub fn multi_plus_status(&self) -> MultiPlusStatus {
        self.shared.status.multi_plus_status()
    }

    pub fn new_dc_info_available(&self) -> bool {
        self.shared.status.new_dc_info_available()
    }

    pub fn dc_info(&self) -> DcInfo {
        self.shared.status.dc_info()
    }

    pub fn new_ac_info_available(&self) -> Option<PhaseInfo> {
        self.shared.status.new_ac_info_available()
    }

    pub fn ac_info(&self, phase: PhaseInfo) -> Option<AcPhaseInfo> {
        self.shared.status.ac_info(phase)
    }

    /// Housekeeping for the application context: resends or drops overdue
    /// requests, decodes answered ones and drains the receive log.
    pub fn maintain(&mut self) {
        self.log_requests();

        let config = &self.shared.config;
        let abandoned = self.shared.fifo.lock().garbage_collect(
            Instant::now(),
            config.response_timeout(),
            config.max_resend,
        );
        for record in abandoned {
            warn!("Request {:02X} timed out, dropped", record.id);
            self.abandon(&record);
        }

        loop {
            let correlation = self
                .shared
                .fifo
                .lock()
                .correlate(Instant::now(), self.shared.config.max_resend);
            match correlation {
                None => break,
                Some(Correlation::Completed(record)) => {
                    for response in response::decode(&record, &self.shared.info) {
                        if let Some(cb) = self.on_response.as_mut() {
                            cb(&response);
                        }
                    }
                }
                Some(Correlation::Resend { id, resend_count }) => {
                    warn!(
                        "Unexpected response id: {:02X} resend count: {}",
                        id, resend_count
                    );
                }
                Some(Correlation::Abandoned(record)) => {
                    warn!(
                        "Unexpected response id: {:02X} {:02X?}, request dropped",
                        record.id, record.response
                    );
                    self.abandon(&record);
                }
            }
        }

        self.shared.status.log_changes();

        loop {
            let frame = self.shared.receive_log.lock().pop();
            match (frame, self.on_receive.as_mut()) {
                (Some(frame), Some(cb)) => cb(&frame),
                (Some(_), None) => {}
                (None, _) => break,
            }
        }
    }

    fn log_requests(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let request = self.shared.fifo.lock().take_unlogged();
        if let Some((id, payload)) = request {
            debug!("Req: id {:02X} {:02X?}", id, payload);
        }
    }

    fn abandon(&mut self, record: &RequestRecord) {
        if let Some(cb) = self.on_abandon.as_mut() {
            cb(record.id, record.request.command());
        }
    }
}
