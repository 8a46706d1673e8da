#![allow(clippy::upper_case_acronyms)]

use serde::Serialize;

/// Winmon command bytes carried after the transaction id of a data frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum WinmonCommand {
    SendSoftwareVersionPart0, //0x05
    GetSetDeviceState,        //0x0E
    ReadRamVar,               //0x30
    ReadSetting,              //0x31
    WriteRamVar,              //0x32
    WriteSetting,             //0x33
    WriteData,                //0x34
    GetSettingInfo,           //0x35
    GetRamVarInfo,            //0x36
    WriteViaId,               //0x37
    // not a winmon command, switch frames carry no transaction id
    SwitchState, //0x3F
}
impl WinmonCommand {
    pub fn to_code(&self) -> u8 {
        match self {
            WinmonCommand::SendSoftwareVersionPart0 => 0x05,
            WinmonCommand::GetSetDeviceState => 0x0E,
            WinmonCommand::ReadRamVar => 0x30,
            WinmonCommand::ReadSetting => 0x31,
            WinmonCommand::WriteRamVar => 0x32,
            WinmonCommand::WriteSetting => 0x33,
            WinmonCommand::WriteData => 0x34,
            WinmonCommand::GetSettingInfo => 0x35,
            WinmonCommand::GetRamVarInfo => 0x36,
            WinmonCommand::WriteViaId => 0x37,
            WinmonCommand::SwitchState => 0x3F,
        }
    }
}

/// Response status bytes (offset 6 of a response frame).
pub mod response_code {
    pub const SOFTWARE_VERSION: u8 = 0x82;
    pub const RAM_READ_OK: u8 = 0x85;
    pub const SETTING_READ_OK: u8 = 0x86;
    pub const RAM_WRITE_OK: u8 = 0x87;
    pub const SETTING_WRITE_OK: u8 = 0x88;
    pub const SETTING_INFO: u8 = 0x89;
    pub const RAM_VAR_INFO: u8 = 0x8E;
    pub const DEVICE_STATE: u8 = 0x94;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceStateCommand {
    Inquire = 0,
    ForceToEqualise = 1,
    ForceToAbsorption = 2,
    ForceToFloat = 3,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SwitchState {
    Sleep = 0x04,
    ChargerOnly = 0x05,
    // turns AC-in off
    InverterOnly = 0x06,
    // normal ON mode
    ChargerInverter = 0x07,
}

/// Low bit of the WriteViaID flag byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VariableType {
    RamVar = 0x00,
    Setting = 0x01,
}

/// EEPROM flag of the WriteViaID flag byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageType {
    Eeprom = 0x00,
    NoEeprom = 0x02,
}
impl StorageType {
    pub fn from_eeprom(eeprom: bool) -> Self {
        if eeprom {
            StorageType::Eeprom
        } else {
            StorageType::NoEeprom
        }
    }
}

/// How a read value is reported to the response callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ResponseDataType {
    None,
    FloatingPoint,
    UnsignedInteger,
    SignedInteger,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum RamVariable {
    UMainsRms,
    IMainsRms,
    UInverterRms,
    IInverterRms,
    UBat,
    IBat,
    // RMS value of ripple voltage
    UBatRms,
    // time base 0.1s
    InverterPeriodTime,
    // time base 0.1s
    MainsPeriodTime,
    SignedAcLoadCurrent,
    // no RamVarInfo available
    VirtualSwitchPosition,
    IgnoreAcInputState,
    MultiFunctionalRelayState,
    // battery monitor function
    ChargeState,
    // filtered
    InverterPower,
    InverterPower2,
    OutputPower,
    InverterPowerNf,
    InverterPower2Nf,
    OutputPowerNf,
}
impl RamVariable {
    pub const COUNT: usize = 20;

    pub fn as_code(&self) -> u8 {
        *self as u8
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Setting {
    Flags0,
    Flags1,
    UBatAbsorption,
    UBatFloat,
    IBatBulk,
    UInvSetpoint,
    IMainsLimit,
    RepeatedAbsorptionTime,
    RepeatedAbsorptionInterval,
    MaximumAbsorptionDuration,
    ChargeCharacteristic,
    UBatLowLimitForInverter,
    UBatLowHysteresisForInverter,
    // no SettingInfo available
    NumberOfSlavesConnected,
    // no SettingInfo available
    SpecialThreePhaseSetting,
}
impl Setting {
    pub const COUNT: usize = 15;

    pub fn as_code(&self) -> u16 {
        *self as u16
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Discriminant at offset 9 of a broadcast info frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum PhaseInfo {
    L4,
    L3,
    L2,
    SL1,
    SL2,
    SL3,
    SL4,
    Dc,
}
impl PhaseInfo {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x05 => PhaseInfo::L4,
            0x06 => PhaseInfo::L3,
            0x07 => PhaseInfo::L2,
            0x08 => PhaseInfo::SL1,
            0x09 => PhaseInfo::SL2,
            0x0A => PhaseInfo::SL3,
            0x0B => PhaseInfo::SL4,
            0x0C => PhaseInfo::Dc,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum PhaseState {
    Down,
    Startup,
    Off,
    Slave,
    InvertFull,
    InvertHalf,
    InvertAes,
    PowerAssist,
    Bypass,
    StateCharge,
    Unknown,
}
impl PhaseState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => PhaseState::Down,
            0x01 => PhaseState::Startup,
            0x02 => PhaseState::Off,
            0x03 => PhaseState::Slave,
            0x04 => PhaseState::InvertFull,
            0x05 => PhaseState::InvertHalf,
            0x06 => PhaseState::InvertAes,
            0x07 => PhaseState::PowerAssist,
            0x08 => PhaseState::Bypass,
            0x09 => PhaseState::StateCharge,
            _ => PhaseState::Unknown,
        }
    }
}
