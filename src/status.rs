//! Snapshots decoded from frames the device broadcasts on its own.
//!
//! The worker keeps its own working copies in [`StatusDecoder`]. Only when a
//! decoded value differs from the working copy is it published to the shared
//! [`StatusBoard`], where the application reads it and thereby clears the
//! "new data" flag.

use crate::convert::InfoTables;
use crate::definitions::{PhaseInfo, PhaseState, RamVariable};
use crate::frame::le_u16;
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;

const LOW_BATTERY: u8 = 0x02;
const MAX_AC_PHASES: usize = 8;

/// One byte of LED flags from the master multi LED frame.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedData(pub u8);

impl LedData {
    pub const MAINS_ON: u8 = 1 << 0;
    pub const ABSORPTION: u8 = 1 << 1;
    pub const BULK: u8 = 1 << 2;
    pub const FLOAT: u8 = 1 << 3;
    pub const INVERTER_ON: u8 = 1 << 4;
    pub const OVERLOAD: u8 = 1 << 5;
    pub const LOW_BATTERY: u8 = 1 << 6;
    pub const TEMPERATURE: u8 = 1 << 7;

    fn bit(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn mains_on(&self) -> bool {
        self.bit(Self::MAINS_ON)
    }
    pub fn absorption(&self) -> bool {
        self.bit(Self::ABSORPTION)
    }
    pub fn bulk(&self) -> bool {
        self.bit(Self::BULK)
    }
    pub fn float(&self) -> bool {
        self.bit(Self::FLOAT)
    }
    pub fn inverter_on(&self) -> bool {
        self.bit(Self::INVERTER_ON)
    }
    pub fn overload(&self) -> bool {
        self.bit(Self::OVERLOAD)
    }
    pub fn low_battery(&self) -> bool {
        self.bit(Self::LOW_BATTERY)
    }
    pub fn temperature(&self) -> bool {
        self.bit(Self::TEMPERATURE)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct MasterMultiLed {
    pub led_on: LedData,
    // on && blink = blinking, !on && blink = blinking inverted
    pub led_blink: LedData,
    pub low_battery: bool,
    pub ac_input_configuration: u8,
    pub minimum_input_current_limit_a: f32,
    pub maximum_input_current_limit_a: f32,
    pub actual_input_current_limit_a: f32,
    pub switch_register: u8,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct MultiPlusStatus {
    pub temp: f32,
    pub dc_current_a: f32,
    pub battery_ah: u16,
    pub dc_level_allows_inverting: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct AcPhaseInfo {
    pub phase: PhaseInfo,
    pub state: PhaseState,
    pub main_voltage: f32,
    pub main_current: f32,
    pub inverter_voltage: f32,
    pub inverter_current: f32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct DcInfo {
    pub voltage: f32,
    pub current_inverting: f32,
    pub current_charging: f32,
}

/// A changed snapshot on its way from the decoder to the board.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub enum StatusUpdate {
    MasterMultiLed(MasterMultiLed),
    MultiPlusStatus(MultiPlusStatus),
    AcPhase(AcPhaseInfo),
    Dc(DcInfo),
}

/// A published value plus its edge-triggered "new data" flag.
#[derive(Debug, Copy, Clone, Default)]
struct Tracked<T> {
    value: T,
    new_data: bool,
    logged: bool,
}

impl<T: Copy> Tracked<T> {
    fn set(&mut self, value: T) {
        self.value = value;
        self.new_data = true;
        self.logged = false;
    }

    fn take(&mut self) -> T {
        self.new_data = false;
        self.value
    }
}

#[derive(Debug, Default)]
struct Snapshots {
    master_multi_led: Tracked<MasterMultiLed>,
    multi_plus_status: Tracked<MultiPlusStatus>,
    dc_info: Tracked<DcInfo>,
    ac_info: heapless::Vec<Tracked<AcPhaseInfo>, MAX_AC_PHASES>,
}

/// Status snapshots shared between the worker and the application.
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<Snapshots>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, update: StatusUpdate) {
        let mut snapshots = self.inner.lock();
        match update {
            StatusUpdate::MasterMultiLed(led) => snapshots.master_multi_led.set(led),
            StatusUpdate::MultiPlusStatus(status) => snapshots.multi_plus_status.set(status),
            StatusUpdate::Dc(dc) => snapshots.dc_info.set(dc),
            StatusUpdate::AcPhase(info) => {
                match snapshots
                    .ac_info
                    .iter_mut()
                    .find(|tracked| tracked.value.phase == info.phase)
                {
                    Some(tracked) => tracked.set(info),
                    None => {
                        let tracked = Tracked {
                            value: info,
                            new_data: true,
                            logged: false,
                        };
                        if snapshots.ac_info.push(tracked).is_err() {
                            debug!("No room for AC phase {:?}", info.phase);
                        }
                    }
                }
            }
        }
    }

    pub fn new_master_multi_led_available(&self) -> bool {
        self.inner.lock().master_multi_led.new_data
    }

    pub fn master_multi_led(&self) -> MasterMultiLed {
        self.inner.lock().master_multi_led.take()
    }

    pub fn new_multi_plus_status_available(&self) -> bool {
        self.inner.lock().multi_plus_status.new_data
    }

    pub fn multi_plus_status(&self) -> MultiPlusStatus {
        self.inner.lock().multi_plus_status.take()
    }

    pub fn new_dc_info_available(&self) -> bool {
        self.inner.lock().dc_info.new_data
    }

    pub fn dc_info(&self) -> DcInfo {
        self.inner.lock().dc_info.take()
    }

    /// First phase holding unread data.
    pub fn new_ac_info_available(&self) -> Option<PhaseInfo> {
        self.inner
            .lock()
            .ac_info
            .iter()
            .find(|tracked| tracked.new_data)
            .map(|tracked| tracked.value.phase)
    }

    pub fn ac_info(&self, phase: PhaseInfo) -> Option<AcPhaseInfo> {
        self.inner
            .lock()
            .ac_info
            .iter_mut()
            .find(|tracked| tracked.value.phase == phase)
            .map(|tracked| tracked.take())
    }

    /// Logs each changed snapshot once.
    pub fn log_changes(&self) {
        let mut snapshots = self.inner.lock();
        if snapshots.master_multi_led.new_data && !snapshots.master_multi_led.logged {
            snapshots.master_multi_led.logged = true;
            debug!("new MasterMultiLed data {:?}", snapshots.master_multi_led.value);
        }
        if snapshots.multi_plus_status.new_data && !snapshots.multi_plus_status.logged {
            snapshots.multi_plus_status.logged = true;
            debug!("new MultiPlusStatus data {:?}", snapshots.multi_plus_status.value);
        }
        if snapshots.dc_info.new_data && !snapshots.dc_info.logged {
            snapshots.dc_info.logged = true;
            debug!("new DcInfo data {:?}", snapshots.dc_info.value);
        }
        for tracked in snapshots.ac_info.iter_mut() {
            if tracked.new_data && !tracked.logged {
                tracked.logged = true;
                debug!("new AcInfo data {:?}", tracked.value);
            }
        }
    }
}

/// Result of looking at a broadcast frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    /// Not a status frame this decoder understands.
    Unknown,
    /// A status frame, carrying the snapshots that changed.
    Known(heapless::Vec<StatusUpdate, 2>),
    /// A per-phase info frame.
    AcPhaseInformation(Option<StatusUpdate>),
}

/// Change-detecting decoder, owned by the worker.
#[derive(Debug, Default)]
pub struct StatusDecoder {
    master_multi_led: MasterMultiLed,
    multi_plus_status: MultiPlusStatus,
    ac_info: heapless::Vec<AcPhaseInfo, MAX_AC_PHASES>,
    dc_info: Option<DcInfo>,
}

impl StatusDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a destuffed data frame by its sub-type byte at offset 4.
    pub fn decode(&mut self, frame: &[u8], tables: &InfoTables) -> Broadcast {
        match frame.get(4) {
            Some(0x41) => self.decode_master_multi_led(frame),
            Some(0x70) => self.decode_battery_condition(frame),
            Some(0x80) => self.decode_charger_inverter_condition(frame),
            Some(0x20) if frame.len() >= 20 => {
                Broadcast::AcPhaseInformation(self.decode_info_frame(frame, tables))
            }
            Some(0xE4) if frame.len() == 21 => Broadcast::AcPhaseInformation(None),
            _ => Broadcast::Unknown,
        }
    }

    // 83 83 FE nr 41 10 <on> <blink> <bat> <acin> <min> <max> <actual> <switch> cs FF
    fn decode_master_multi_led(&mut self, frame: &[u8]) -> Broadcast {
        if frame.len() != 19 || frame[5] != 0x10 {
            return Broadcast::Unknown;
        }
        let led = MasterMultiLed {
            led_on: LedData(frame[6]),
            led_blink: LedData(frame[7]),
            low_battery: frame[8] == LOW_BATTERY,
            ac_input_configuration: frame[9],
            minimum_input_current_limit_a: u16_at(frame, 10) as f32 / 10.0,
            maximum_input_current_limit_a: u16_at(frame, 12) as f32 / 10.0,
            actual_input_current_limit_a: u16_at(frame, 14) as f32 / 10.0,
            switch_register: frame[16],
        };

        let mut updates = heapless::Vec::new();
        if led != self.master_multi_led {
            self.master_multi_led = led;
            let _ = updates.push(StatusUpdate::MasterMultiLed(led));
        }
        Broadcast::Known(updates)
    }

    fn decode_battery_condition(&mut self, frame: &[u8]) -> Broadcast {
        if frame.len() != 15 || frame[5..10] != [0x81, 0x64, 0x14, 0xBC, 0x02] || frame[12] != 0x00
        {
            return Broadcast::Unknown;
        }
        let battery_ah = u16_at(frame, 10);

        let mut updates = heapless::Vec::new();
        if battery_ah != self.multi_plus_status.battery_ah {
            self.multi_plus_status.battery_ah = battery_ah;
            let _ = updates.push(StatusUpdate::MultiPlusStatus(self.multi_plus_status));
        }
        Broadcast::Known(updates)
    }

    fn decode_charger_inverter_condition(&mut self, frame: &[u8]) -> Broadcast {
        if frame.len() != 19
            || frame[5] != 0x80
            || (frame[6] & 0xFE) != 0x12
            || frame[8] != 0x80
            || (frame[11] & 0x10) != 0x10
            || frame[12] != 0x00
        {
            return Broadcast::Unknown;
        }
        let mut updates = heapless::Vec::new();

        let low_battery = frame[7] == LOW_BATTERY;
        if low_battery != self.master_multi_led.low_battery {
            self.master_multi_led.low_battery = low_battery;
            let _ = updates.push(StatusUpdate::MasterMultiLed(self.master_multi_led));
        }

        let mut status = self.multi_plus_status;
        status.dc_level_allows_inverting = frame[6] & 0x01 != 0;
        status.dc_current_a = u16_at(frame, 9) as f32 / 10.0;
        // temperature only travels in frames tagged 0x3_
        if frame[11] & 0xF0 == 0x30 {
            status.temp = frame[15] as f32 / 10.0;
        }
        if status != self.multi_plus_status {
            self.multi_plus_status = status;
            let _ = updates.push(StatusUpdate::MultiPlusStatus(status));
        }
        Broadcast::Known(updates)
    }

    fn decode_info_frame(&mut self, frame: &[u8], tables: &InfoTables) -> Option<StatusUpdate> {
        let ubat = tables.ram_var(RamVariable::UBat);
        match PhaseInfo::from_code(frame[9])? {
            // 83 83 FE 72 20 40 A5 C4 01 0C 33 05 12 00 00 00 00 00 86 EB FF
            PhaseInfo::Dc => {
                let ibat = tables.ram_var(RamVariable::IBat);
                let info = DcInfo {
                    voltage: ubat.to_value_signed(i16_at(frame, 10)).ok()?,
                    current_inverting: ibat.to_value_signed(i24_at(frame, 12)).ok()?,
                    current_charging: ibat.to_value_signed(i24_at(frame, 15)).ok()?,
                };
                if self.dc_info == Some(info) {
                    return None;
                }
                self.dc_info = Some(info);
                Some(StatusUpdate::Dc(info))
            }
            // 83 83 FE 1B 20 01 01 00 04 08 00 00 00 00 C6 59 1E 00 00 7D FF
            phase => {
                let current = tables.ram_var(RamVariable::IInverterRms);
                let info = AcPhaseInfo {
                    phase,
                    state: PhaseState::from_code(frame[8]),
                    main_voltage: ubat.to_value_signed(i16_at(frame, 10)).ok()?,
                    // frame[5] and frame[6] are the mains and inverter current factors
                    main_current: current.to_value_signed(i16_at(frame, 12)).ok()?
                        * frame[5] as f32,
                    inverter_voltage: ubat.to_value_signed(i16_at(frame, 14)).ok()?,
                    inverter_current: current.to_value_signed(i16_at(frame, 16)).ok()?
                        * frame[6] as f32,
                };
                match self.ac_info.iter_mut().find(|known| known.phase == phase) {
                    Some(known) if *known == info => return None,
                    Some(known) => *known = info,
                    None => {
                        let _ = self.ac_info.push(info);
                    }
                }
                Some(StatusUpdate::AcPhase(info))
            }
        }
    }
}

fn u16_at(frame: &[u8], at: usize) -> u16 {
    le_u16(frame, at).unwrap_or(0)
}

fn i16_at(frame: &[u8], at: usize) -> i32 {
    u16_at(frame, at) as i16 as i32
}

fn i24_at(frame: &[u8], at: usize) -> i32 {
    let raw = frame[at] as i32 | (frame[at + 1] as i32) << 8 | (frame[at + 2] as i32) << 16;
    // sign extend from 24 bits
    (raw << 8) >> 8
}
