use crate::command::{Request, Target};
use crate::convert::{InfoTables, RamVarInfo, SettingInfo};
use crate::definitions::{ResponseDataType, WinmonCommand};
use crate::fifo::RequestRecord;
use crate::frame::le_u16;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Serialize;

// 83 83 FE nr 00 id status ... cs FF
const STATUS_LEN: usize = 7;
const TRAILER_LEN: usize = 2;
const SOFTWARE_VERSION_LEN: usize = 19;
const DEVICE_STATE_LEN: usize = 11;
const SETTING_READ_LEN: usize = 11;
const SETTING_INFO_LEN: usize = 20;
const RAM_VAR_INFO_LEN: usize = 13;
const DEVICE_STATE_CHARGING: u8 = 9;

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub enum ResponseValue {
    Float(f32),
    Unsigned(u32),
    Signed(i32),
    /// Raw register, returned when no conversion metadata is available.
    Unavailable(u16),
    /// Write acknowledged by the device.
    Ack,
}

/// Decoded answer handed to the response callback.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct ResponseData {
    pub id: u8,
    pub command: WinmonCommand,
    pub target: Option<Target>,
    pub value: ResponseValue,
}

/// Decodes the response attached to a completed record.
///
/// Info answers update `tables` and produce no values. A length mismatch is
/// logged and yields nothing.
pub fn decode(record: &RequestRecord, tables: &RwLock<InfoTables>) -> Vec<ResponseData> {
    let frame = match record.response.as_deref() {
        Some(frame) => frame,
        None => return vec![],
    };
    debug!("Res: {:02X?}", frame);

    let response = |target, value| ResponseData {
        id: record.id,
        command: record.request.command(),
        target,
        value,
    };

    match &record.request {
        Request::SoftwareVersion => {
            if !expect_len(record, frame, SOFTWARE_VERSION_LEN) {
                return vec![];
            }
            let version = u32::from_le_bytes([frame[7], frame[8], frame[9], frame[10]]);
            vec![response(None, ResponseValue::Unsigned(version))]
        }
        Request::DeviceState(_) => {
            if !expect_len(record, frame, DEVICE_STATE_LEN) {
                return vec![];
            }
            // charging reports its sub state in the following byte
            let state = match frame[7] {
                DEVICE_STATE_CHARGING => frame[7] as u32 + frame[8] as u32,
                state => state as u32,
            };
            vec![response(None, ResponseValue::Unsigned(state))]
        }
        Request::ReadRamVars(variables) => {
            let len = STATUS_LEN + 2 * variables.len() + TRAILER_LEN;
            if !expect_len(record, frame, len) {
                return vec![];
            }
            let tables = tables.read();
            variables
                .iter()
                .enumerate()
                .filter_map(|(i, variable)| {
                    let raw = le_u16(frame, STATUS_LEN + 2 * i)?;
                    let value = ram_var_value(&tables.ram_var(*variable), raw);
                    Some(response(Some(Target::RamVar(*variable)), value))
                })
                .collect()
        }
        Request::ReadSetting(setting) => {
            if !expect_len(record, frame, SETTING_READ_LEN) {
                return vec![];
            }
            let raw = le_u16(frame, STATUS_LEN).unwrap_or_default();
            let value = setting_value(&tables.read().setting(*setting), raw);
            vec![response(Some(Target::Setting(*setting)), value)]
        }
        Request::WriteViaId { target, .. } | Request::WriteData { target, .. } => {
            vec![response(Some(*target), ResponseValue::Ack)]
        }
        Request::ReadInfo(Target::Setting(setting)) => {
            if expect_len(record, frame, SETTING_INFO_LEN) {
                let mut tables = tables.write();
                let info = &mut tables.settings[setting.index()];
                *info = SettingInfo {
                    scale: le_u16(frame, 7).unwrap_or_default() as i16,
                    offset: le_u16(frame, 9).unwrap_or_default() as i16,
                    default: le_u16(frame, 11).unwrap_or_default(),
                    minimum: le_u16(frame, 13).unwrap_or_default(),
                    maximum: le_u16(frame, 15).unwrap_or_default(),
                    access_level: frame[17],
                    available: true,
                    data_type: known_type(info.data_type),
                };
                debug!("SettingInfo {:?} {:?}", setting, info);
            }
            vec![]
        }
        Request::ReadInfo(Target::RamVar(variable)) => {
            if expect_len(record, frame, RAM_VAR_INFO_LEN) {
                let mut tables = tables.write();
                let info = &mut tables.ram_vars[variable.index()];
                *info = RamVarInfo {
                    scale: le_u16(frame, 7).unwrap_or_default() as i16,
                    offset: le_u16(frame, 9).unwrap_or_default() as i16,
                    available: true,
                    data_type: known_type(info.data_type),
                };
                debug!("RamVarInfo {:?} {:?}", variable, info);
            }
            vec![]
        }
        Request::WriteAddress(_) | Request::SwitchState(_) => vec![],
    }
}

fn expect_len(record: &RequestRecord, frame: &[u8], len: usize) -> bool {
    if frame.len() != len {
        warn!(
            "{:?} wrong size {} (expected {})",
            record.request.command(),
            frame.len(),
            len
        );
        return false;
    }
    true
}

// a freshly reported scale makes a variable without a declared type convertible
fn known_type(data_type: ResponseDataType) -> ResponseDataType {
    match data_type {
        ResponseDataType::None => ResponseDataType::FloatingPoint,
        data_type => data_type,
    }
}

fn ram_var_value(info: &RamVarInfo, raw: u16) -> ResponseValue {
    if !info.available {
        return ResponseValue::Unavailable(raw);
    }
    match info.data_type {
        ResponseDataType::FloatingPoint => match info.raw_to_value(raw) {
            Ok(value) => ResponseValue::Float(value),
            Err(_) => ResponseValue::Unavailable(raw),
        },
        ResponseDataType::UnsignedInteger => ResponseValue::Unsigned(raw as u32),
        ResponseDataType::SignedInteger => ResponseValue::Signed(raw as i16 as i32),
        ResponseDataType::None => ResponseValue::Unavailable(raw),
    }
}

fn setting_value(info: &SettingInfo, raw: u16) -> ResponseValue {
    if !info.available {
        return ResponseValue::Unavailable(raw);
    }
    match info.data_type {
        ResponseDataType::FloatingPoint => match info.to_value(raw) {
            Ok(value) => ResponseValue::Float(value),
            Err(_) => ResponseValue::Unavailable(raw),
        },
        ResponseDataType::UnsignedInteger => ResponseValue::Unsigned(raw as u32),
        ResponseDataType::SignedInteger => ResponseValue::Signed(raw as i16 as i32),
        ResponseDataType::None => ResponseValue::Unavailable(raw),
    }
}
