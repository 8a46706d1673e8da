use crate::definitions::{RamVariable, ResponseDataType, Setting};
use crate::vebus::RequestError;
use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct RamVarInfo {
    pub scale: i16,
    pub offset: i16,
    pub available: bool,
    pub data_type: ResponseDataType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct SettingInfo {
    pub scale: i16,
    pub offset: i16,
    pub default: u16,
    pub minimum: u16,
    pub maximum: u16,
    pub access_level: u8,
    pub available: bool,
    pub data_type: ResponseDataType,
}

const fn ram(scale: i16, offset: i16) -> RamVarInfo {
    RamVarInfo {
        scale,
        offset,
        available: true,
        data_type: ResponseDataType::FloatingPoint,
    }
}

const RAM_UNAVAILABLE: RamVarInfo = RamVarInfo {
    scale: 0,
    offset: 0,
    available: false,
    data_type: ResponseDataType::None,
};

const fn setting(
    scale: i16,
    default: u16,
    minimum: u16,
    maximum: u16,
    access_level: u8,
    data_type: ResponseDataType,
) -> SettingInfo {
    SettingInfo {
        scale,
        offset: 0,
        default,
        minimum,
        maximum,
        access_level,
        available: true,
        data_type,
    }
}

const SETTING_UNAVAILABLE: SettingInfo = SettingInfo {
    scale: 0,
    offset: 0,
    default: 0,
    minimum: 0,
    maximum: 0,
    access_level: 0,
    available: false,
    data_type: ResponseDataType::None,
};

// Multiplus-II 12/3000
pub const DEFAULT_RAM_VAR_INFO: [RamVarInfo; RamVariable::COUNT] = [
    ram(32668, 0),
    ram(-32668, 0),
    ram(32668, 0),
    ram(32668, 0),
    ram(32668, 0),
    ram(-32758, 0),
    ram(32668, 0),
    ram(30815, 256),
    ram(31791, 0),
    ram(-32668, 0),
    RAM_UNAVAILABLE,
    ram(5, -32768),
    ram(6, -32768),
    ram(32568, 0),
    ram(-1, 0),
    ram(-1, 0),
    ram(-1, 0),
    ram(-1, 0),
    ram(-1, 0),
    ram(-1, 0),
];

// Multiplus-II 12/3000
//                 sc, default,   min,   max, access
pub const DEFAULT_SETTING_INFO: [SettingInfo; Setting::COUNT] = [
    setting(1, 35248, 0, 28668, 0, ResponseDataType::UnsignedInteger),
    setting(2, 19966, 0, 65535, 0, ResponseDataType::UnsignedInteger),
    setting(-100, 1440, 1200, 1600, 0, ResponseDataType::FloatingPoint),
    setting(-100, 1380, 1200, 1600, 0, ResponseDataType::FloatingPoint),
    setting(1, 120, 0, 120, 0, ResponseDataType::FloatingPoint),
    setting(1, 230, 210, 245, 0, ResponseDataType::FloatingPoint),
    setting(-10, 320, 10, 500, 0, ResponseDataType::FloatingPoint),
    setting(15, 4, 1, 96, 0, ResponseDataType::FloatingPoint),
    setting(360, 28, 1, 180, 0, ResponseDataType::FloatingPoint),
    setting(60, 8, 1, 24, 0, ResponseDataType::FloatingPoint),
    setting(1, 3, 1, 3, 0, ResponseDataType::FloatingPoint),
    setting(-100, 930, 930, 1300, 128, ResponseDataType::FloatingPoint),
    setting(-100, 160, 25, 600, 0, ResponseDataType::FloatingPoint),
    SETTING_UNAVAILABLE,
    SETTING_UNAVAILABLE,
];

/// Metadata for every known RAM variable and setting, indexed by their enums.
#[derive(Debug, Clone)]
pub struct InfoTables {
    pub ram_vars: [RamVarInfo; RamVariable::COUNT],
    pub settings: [SettingInfo; Setting::COUNT],
}

impl Default for InfoTables {
    fn default() -> Self {
        Self {
            ram_vars: DEFAULT_RAM_VAR_INFO,
            settings: DEFAULT_SETTING_INFO,
        }
    }
}

impl InfoTables {
    pub fn ram_var(&self, variable: RamVariable) -> RamVarInfo {
        self.ram_vars[variable.index()]
    }

    pub fn setting(&self, setting: Setting) -> SettingInfo {
        self.settings[setting.index()]
    }
}

impl RamVarInfo {
    /// Scales >= 0x4000 are stored folded as `0x8000 - divisor`.
    fn divisor(&self) -> Result<f32, RequestError> {
        if !self.available {
            return Err(RequestError::ConvertError);
        }
        let mut scale = (self.scale as i32).abs();
        if scale >= 0x4000 {
            scale = 0x8000 - scale;
        }
        if scale == 0 {
            return Err(RequestError::ConvertError);
        }
        Ok(scale as f32)
    }

    pub fn is_signed(&self) -> bool {
        self.scale < 0
    }

    pub fn to_value(&self, raw: u16) -> Result<f32, RequestError> {
        Ok(raw as f32 / self.divisor()? + self.offset as f32)
    }

    pub fn to_value_signed(&self, raw: i32) -> Result<f32, RequestError> {
        Ok(raw as f32 / self.divisor()? + self.offset as f32)
    }

    /// Converts a raw register to engineering units, honouring the sign of `scale`.
    pub fn raw_to_value(&self, raw: u16) -> Result<f32, RequestError> {
        if self.is_signed() {
            self.to_value_signed(raw as i16 as i32)
        } else {
            self.to_value(raw)
        }
    }

    /// Fails with `ConvertError` when the result does not fit a `u16`.
    pub fn to_raw(&self, value: f32) -> Result<u16, RequestError> {
        let raw = ((value - self.offset as f32) * self.divisor()?).round();
        if !(0.0..=u16::MAX as f32).contains(&raw) {
            return Err(RequestError::ConvertError);
        }
        Ok(raw as u16)
    }

    /// Fails with `ConvertError` when the result does not fit an `i16`.
    pub fn to_raw_signed(&self, value: f32) -> Result<i16, RequestError> {
        let raw = ((value - self.offset as f32) * self.divisor()?).round();
        if !(i16::MIN as f32..=i16::MAX as f32).contains(&raw) {
            return Err(RequestError::ConvertError);
        }
        Ok(raw as i16)
    }

    /// Raw register bits for `value`, two's complement when `scale` is negative.
    pub fn value_to_raw(&self, value: f32) -> Result<u16, RequestError> {
        if self.is_signed() {
            Ok(self.to_raw_signed(value)? as u16)
        } else {
            self.to_raw(value)
        }
    }
}

impl SettingInfo {
    fn factor(&self) -> Result<f32, RequestError> {
        if !self.available {
            return Err(RequestError::ConvertError);
        }
        match self.scale {
            0 => Err(RequestError::ConvertError),
            scale if scale > 0 => Ok(scale as f32),
            scale => Ok(1.0 / -(scale as f32)),
        }
    }

    pub fn to_value(&self, raw: u16) -> Result<f32, RequestError> {
        Ok(raw as f32 * self.factor()? + self.offset as f32)
    }

    /// Raw value for `value`, rejected when it falls outside `minimum..=maximum`.
    pub fn to_raw(&self, value: f32) -> Result<u16, RequestError> {
        let raw = ((value - self.offset as f32) / self.factor()?).round();
        if raw > self.maximum as f32 {
            return Err(RequestError::OutsideUpperRange);
        }
        if raw < self.minimum as f32 {
            return Err(RequestError::OutsideLowerRange);
        }
        Ok(raw as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn folded_ram_scale_divides() {
        let tables = InfoTables::default();
        let ubat = tables.ram_var(RamVariable::UBat);
        // 32668 folds back to a divisor of 100
        assert!(close(ubat.to_value(1331).unwrap(), 13.31));
        assert_eq!(ubat.to_raw(13.31).unwrap(), 1331);
    }

    #[test]
    fn ram_conversion_inverts() {
        let tables = InfoTables::default();
        for (variable, value) in [
            (RamVariable::UBat, 26.5f32),
            (RamVariable::IBat, -12.3),
            (RamVariable::IMainsRms, 4.2),
            (RamVariable::InverterPower, -250.0),
        ] {
            let info = tables.ram_var(variable);
            let raw = info.value_to_raw(value).unwrap();
            assert!(close(info.raw_to_value(raw).unwrap(), value), "{:?}", variable);
        }
    }

    #[test]
    fn ram_offset_is_applied_once() {
        let info = RamVarInfo {
            scale: 10,
            offset: 5,
            available: true,
            data_type: ResponseDataType::FloatingPoint,
        };
        assert!(close(info.to_value(100).unwrap(), 15.0));
        assert_eq!(info.to_raw(15.0).unwrap(), 100);
    }

    #[test]
    fn signed_raw_is_twos_complement() {
        let tables = InfoTables::default();
        let ibat = tables.ram_var(RamVariable::IBat);
        assert_eq!(ibat.value_to_raw(-1.0).unwrap(), 0xFFF6);
        assert!(close(ibat.raw_to_value(0xFFF6).unwrap(), -1.0));
    }

    #[test]
    fn raw_out_of_width_is_a_convert_error() {
        let tables = InfoTables::default();
        let ubat = tables.ram_var(RamVariable::UBat);
        assert_eq!(ubat.value_to_raw(-5.0), Err(RequestError::ConvertError));
        assert_eq!(ubat.value_to_raw(700.0), Err(RequestError::ConvertError));
        assert_eq!(ubat.value_to_raw(655.0).unwrap(), 65_500);

        let ibat = tables.ram_var(RamVariable::IBat);
        assert_eq!(ibat.value_to_raw(4000.0), Err(RequestError::ConvertError));
        assert_eq!(ibat.value_to_raw(-4000.0), Err(RequestError::ConvertError));
        assert_eq!(ibat.value_to_raw(f32::NAN), Err(RequestError::ConvertError));
    }

    #[test]
    fn unavailable_ram_var_is_a_convert_error() {
        let tables = InfoTables::default();
        let info = tables.ram_var(RamVariable::VirtualSwitchPosition);
        assert_eq!(info.to_value(1), Err(RequestError::ConvertError));
        assert_eq!(info.value_to_raw(1.0), Err(RequestError::ConvertError));
    }

    #[test]
    fn zero_divisor_is_a_convert_error() {
        let info = RamVarInfo {
            scale: i16::MIN,
            offset: 0,
            available: true,
            data_type: ResponseDataType::FloatingPoint,
        };
        assert_eq!(info.to_value(1), Err(RequestError::ConvertError));
    }

    #[test]
    fn setting_conversion_inverts() {
        let tables = InfoTables::default();
        for (setting, value) in [
            (Setting::UBatAbsorption, 14.4f32),
            (Setting::IMainsLimit, 16.0),
            (Setting::RepeatedAbsorptionTime, 60.0),
            (Setting::UInvSetpoint, 230.0),
        ] {
            let info = tables.setting(setting);
            let raw = info.to_raw(value).unwrap();
            assert!(close(info.to_value(raw).unwrap(), value), "{:?}", setting);
        }
    }

    #[test]
    fn setting_range_is_enforced() {
        let info = InfoTables::default().setting(Setting::UBatAbsorption);
        assert_eq!(info.to_raw(17.0), Err(RequestError::OutsideUpperRange));
        assert_eq!(info.to_raw(10.0), Err(RequestError::OutsideLowerRange));
        assert_eq!(info.to_raw(-3.0), Err(RequestError::OutsideLowerRange));
    }

    #[test]
    fn unavailable_setting_is_a_convert_error() {
        let info = InfoTables::default().setting(Setting::NumberOfSlavesConnected);
        assert_eq!(info.to_value(3), Err(RequestError::ConvertError));
        assert_eq!(info.to_raw(3.0), Err(RequestError::ConvertError));
    }
}
