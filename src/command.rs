use crate::definitions::{
    response_code, DeviceStateCommand, RamVariable, Setting, StorageType, SwitchState,
    VariableType, WinmonCommand,
};
use crate::frame::{self, DATA_FRAME, MK3_ID_0, MK3_ID_1};
use serde::Serialize;

/// Up to six RAM variables can be read with one frame.
pub const MAX_RAM_VARS_PER_READ: usize = 6;

pub type RamVarList = heapless::Vec<RamVariable, MAX_RAM_VARS_PER_READ>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Target {
    RamVar(RamVariable),
    Setting(Setting),
}
impl Target {
    pub fn address(&self) -> u16 {
        match self {
            Target::RamVar(variable) => variable.as_code() as u16,
            Target::Setting(setting) => setting.as_code(),
        }
    }

    fn variable_type(&self) -> VariableType {
        match self {
            Target::RamVar(_) => VariableType::RamVar,
            Target::Setting(_) => VariableType::Setting,
        }
    }

    fn write_ack(&self) -> u8 {
        match self {
            Target::RamVar(_) => response_code::RAM_WRITE_OK,
            Target::Setting(_) => response_code::SETTING_WRITE_OK,
        }
    }
}

/// One command as queued in the request fifo.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ReadRamVars(RamVarList),
    ReadSetting(Setting),
    WriteViaId {
        target: Target,
        value: u16,
        storage: StorageType,
    },
    /// First half of a two-phase write, answered by nothing.
    WriteAddress(Target),
    /// Second half of a two-phase write.
    WriteData { target: Target, value: u16 },
    ReadInfo(Target),
    DeviceState(DeviceStateCommand),
    SoftwareVersion,
    SwitchState(SwitchState),
}

impl Request {
    pub fn command(&self) -> WinmonCommand {
        match self {
            Request::ReadRamVars(_) => WinmonCommand::ReadRamVar,
            Request::ReadSetting(_) => WinmonCommand::ReadSetting,
            Request::WriteViaId { .. } => WinmonCommand::WriteViaId,
            Request::WriteAddress(Target::RamVar(_)) => WinmonCommand::WriteRamVar,
            Request::WriteAddress(Target::Setting(_)) => WinmonCommand::WriteSetting,
            Request::WriteData { .. } => WinmonCommand::WriteData,
            Request::ReadInfo(Target::RamVar(_)) => WinmonCommand::GetRamVarInfo,
            Request::ReadInfo(Target::Setting(_)) => WinmonCommand::GetSettingInfo,
            Request::DeviceState(_) => WinmonCommand::GetSetDeviceState,
            Request::SoftwareVersion => WinmonCommand::SendSoftwareVersionPart0,
            Request::SwitchState(_) => WinmonCommand::SwitchState,
        }
    }

    /// The addressed RAM variable or setting; multi reads report their first variable.
    pub fn target(&self) -> Option<Target> {
        match self {
            Request::ReadRamVars(variables) => variables.first().map(|v| Target::RamVar(*v)),
            Request::ReadSetting(setting) => Some(Target::Setting(*setting)),
            Request::WriteViaId { target, .. }
            | Request::WriteAddress(target)
            | Request::WriteData { target, .. }
            | Request::ReadInfo(target) => Some(*target),
            Request::DeviceState(_) | Request::SoftwareVersion | Request::SwitchState(_) => None,
        }
    }

    /// Status byte of the answer, `None` for fire-and-forget frames.
    pub fn expected_response(&self) -> Option<u8> {
        match self {
            Request::ReadRamVars(_) => Some(response_code::RAM_READ_OK),
            Request::ReadSetting(_) => Some(response_code::SETTING_READ_OK),
            Request::WriteViaId { target, .. } | Request::WriteData { target, .. } => {
                Some(target.write_ack())
            }
            Request::ReadInfo(Target::RamVar(_)) => Some(response_code::RAM_VAR_INFO),
            Request::ReadInfo(Target::Setting(_)) => Some(response_code::SETTING_INFO),
            Request::DeviceState(_) => Some(response_code::DEVICE_STATE),
            Request::SoftwareVersion => Some(response_code::SOFTWARE_VERSION),
            Request::WriteAddress(_) | Request::SwitchState(_) => None,
        }
    }

    /// Whether `other` may replace this request in the fifo. Writes to one
    /// target coalesce whatever their value, switch frames always do.
    pub fn same_target(&self, other: &Request) -> bool {
        match (self, other) {
            (Request::WriteViaId { target: a, .. }, Request::WriteViaId { target: b, .. })
            | (Request::WriteData { target: a, .. }, Request::WriteData { target: b, .. }) => {
                a == b
            }
            (Request::SwitchState(_), Request::SwitchState(_)) => true,
            (a, b) => a == b,
        }
    }

    /// Frame body without header, stuffing or checksum.
    pub fn encode(&self, id: u8) -> Vec<u8> {
        if let Request::SwitchState(state) = self {
            return vec![WinmonCommand::SwitchState.to_code(), *state as u8, 0x00, 0x00, 0x00];
        }

        let mut body = vec![0x00, id, self.command().to_code()];
        match self {
            Request::ReadRamVars(variables) => {
                body.extend(variables.iter().map(|v| v.as_code()));
            }
            Request::ReadSetting(setting) => {
                body.extend_from_slice(&setting.as_code().to_le_bytes());
            }
            Request::WriteViaId {
                target,
                value,
                storage,
            } => {
                body.push(target.variable_type() as u8 | *storage as u8);
                body.push(target.address() as u8);
                body.extend_from_slice(&value.to_le_bytes());
            }
            Request::WriteAddress(target) | Request::ReadInfo(target) => {
                body.extend_from_slice(&target.address().to_le_bytes());
            }
            Request::WriteData { value, .. } => {
                body.extend_from_slice(&value.to_le_bytes());
            }
            Request::DeviceState(command) => {
                body.push(*command as u8);
                body.push(0x00);
            }
            Request::SoftwareVersion | Request::SwitchState(_) => {}
        }
        body
    }
}

/// Wraps a body into a transmittable frame answering the sync frame `frame_nr`.
pub fn build_frame(body: &[u8], frame_nr: u8) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(body.len() + 8);
    buffer.extend_from_slice(&[MK3_ID_0, MK3_ID_1, DATA_FRAME, frame::next_frame_nr(frame_nr)]);
    buffer.extend_from_slice(body);
    frame::stuff(&mut buffer);
    frame::append_checksum(&mut buffer);
    buffer
}
