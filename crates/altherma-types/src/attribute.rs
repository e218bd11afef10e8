//! The closed set of attributes published under `<prefix>/state/`.

use crate::ClimateControlMode;

/// One published device attribute.  The order of [`Attribute::ALL`] is the
/// order in which multi-topic publishes are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    DhwPower,
    DhwTemp,
    DhwTargetTemp,
    DhwTempHeating,
    DhwPowerful,
    IndoorTemp,
    OutdoorTemp,
    ClimateControlHeatingConfig,
    ClimateControlCoolingConfig,
    ClimateControlPower,
    ClimateControlMode,
    LeavingWaterTempCurrent,
    LeavingWaterTempOffset(ClimateControlMode),
    LeavingWaterTemp(ClimateControlMode),
}

impl Attribute {
    pub const ALL: [Attribute; 18] = [
        Attribute::DhwPower,
        Attribute::DhwTemp,
        Attribute::DhwTargetTemp,
        Attribute::DhwTempHeating,
        Attribute::DhwPowerful,
        Attribute::IndoorTemp,
        Attribute::OutdoorTemp,
        Attribute::ClimateControlHeatingConfig,
        Attribute::ClimateControlCoolingConfig,
        Attribute::ClimateControlPower,
        Attribute::ClimateControlMode,
        Attribute::LeavingWaterTempCurrent,
        Attribute::LeavingWaterTempOffset(ClimateControlMode::Heating),
        Attribute::LeavingWaterTempOffset(ClimateControlMode::Cooling),
        Attribute::LeavingWaterTempOffset(ClimateControlMode::Auto),
        Attribute::LeavingWaterTemp(ClimateControlMode::Heating),
        Attribute::LeavingWaterTemp(ClimateControlMode::Cooling),
        Attribute::LeavingWaterTemp(ClimateControlMode::Auto),
    ];

    /// Topic suffix under `<prefix>/state/`, also the key in single-topic
    /// JSON payloads.
    pub fn suffix(self) -> &'static str {
        use ClimateControlMode::{Auto, Cooling, Heating};
        match self {
            Attribute::DhwPower => "dhw_power",
            Attribute::DhwTemp => "dhw_temp",
            Attribute::DhwTargetTemp => "dhw_target_temp",
            Attribute::DhwTempHeating => "dhw_temp_heating",
            Attribute::DhwPowerful => "dhw_powerful",
            Attribute::IndoorTemp => "indoor_temp",
            Attribute::OutdoorTemp => "outdoor_temp",
            Attribute::ClimateControlHeatingConfig => "climate_control_heating_config",
            Attribute::ClimateControlCoolingConfig => "climate_control_cooling_config",
            Attribute::ClimateControlPower => "climate_control_power",
            Attribute::ClimateControlMode => "climate_control_mode",
            Attribute::LeavingWaterTempCurrent => "leaving_water_temp_current",
            Attribute::LeavingWaterTempOffset(Heating) => "leaving_water_temp_offset_heating",
            Attribute::LeavingWaterTempOffset(Cooling) => "leaving_water_temp_offset_cooling",
            Attribute::LeavingWaterTempOffset(Auto) => "leaving_water_temp_offset_auto",
            Attribute::LeavingWaterTemp(Heating) => "leaving_water_temp_heating",
            Attribute::LeavingWaterTemp(Cooling) => "leaving_water_temp_cooling",
            Attribute::LeavingWaterTemp(Auto) => "leaving_water_temp_auto",
        }
    }
}
