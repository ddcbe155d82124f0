//! Typed view of SDM devices and the thermostat commands we send.

use crate::nest::error::NestError;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// SDM device type of a thermostat
pub const THERMOSTAT_TYPE: &str = "sdm.devices.types.THERMOSTAT";

const ECO_ACTIVE: &str = "MANUAL_ECO";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Full resource name, `enterprises/{project}/devices/{id}`
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub traits: DeviceTraits,
    #[serde(default)]
    pub parent_relations: Vec<ParentRelation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRelation {
    pub parent: String,
    pub display_name: String,
}

/// The thermostat traits this client reads. Other traits are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceTraits {
    #[serde(rename = "sdm.devices.traits.Info")]
    pub info: Option<InfoTrait>,
    #[serde(rename = "sdm.devices.traits.Connectivity")]
    pub connectivity: Option<StatusTrait>,
    #[serde(rename = "sdm.devices.traits.Temperature")]
    pub temperature: Option<TemperatureTrait>,
    #[serde(rename = "sdm.devices.traits.Humidity")]
    pub humidity: Option<HumidityTrait>,
    #[serde(rename = "sdm.devices.traits.ThermostatMode")]
    pub mode: Option<ModeTrait>,
    #[serde(rename = "sdm.devices.traits.ThermostatEco")]
    pub eco: Option<ModeTrait>,
    #[serde(rename = "sdm.devices.traits.ThermostatHvac")]
    pub hvac: Option<StatusTrait>,
    #[serde(rename = "sdm.devices.traits.ThermostatTemperatureSetpoint")]
    pub setpoint: Option<SetpointTrait>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoTrait {
    #[serde(default)]
    pub custom_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusTrait {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureTrait {
    pub ambient_temperature_celsius: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumidityTrait {
    pub ambient_humidity_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeTrait {
    pub mode: String,
    #[serde(default)]
    pub available_modes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetpointTrait {
    pub heat_celsius: Option<f64>,
    pub cool_celsius: Option<f64>,
}

impl Device {
    pub fn is_thermostat(&self) -> bool {
        self.device_type == THERMOSTAT_TYPE
    }

    /// The trailing id of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Custom name, else the room it belongs to, else its id.
    pub fn display_name(&self) -> &str {
        self.traits
            .info
            .as_ref()
            .map(|i| i.custom_name.as_str())
            .filter(|n| !n.is_empty())
            .or_else(|| {
                self.parent_relations
                    .first()
                    .map(|p| p.display_name.as_str())
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or_else(|| self.id())
    }

    fn matches(&self, selector: &str) -> bool {
        self.name == selector
            || self.id() == selector
            || self.display_name().eq_ignore_ascii_case(selector)
    }

    /// Reject mode and eco commands naming a mode the device does not list.
    ///
    /// A trait without `availableModes` accepts anything.
    pub fn check_command(&self, command: &ThermostatCommand) -> Result<(), NestError> {
        let (offered, requested) = match command {
            ThermostatCommand::SetMode(mode) => (self.traits.mode.as_ref(), mode.as_str()),
            ThermostatCommand::SetEco(on) => (
                self.traits.eco.as_ref(),
                if *on { ECO_ACTIVE } else { "OFF" },
            ),
            _ => return Ok(()),
        };

        match offered {
            Some(t) if !t.available_modes.is_empty()
                && !t.available_modes.iter().any(|m| m == requested) =>
            {
                Err(NestError::ModeNotAvailable {
                    mode: requested.to_string(),
                    available: t.available_modes.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Pick the thermostat to operate on.
///
/// Without a selector the home must contain exactly one thermostat.
pub fn select_thermostat<'a>(
    devices: &'a [Device],
    selector: Option<&str>,
) -> Result<&'a Device, NestError> {
    let thermostats: Vec<&Device> = devices.iter().filter(|d| d.is_thermostat()).collect();

    if let Some(selector) = selector {
        return thermostats
            .into_iter()
            .find(|d| d.matches(selector))
            .ok_or_else(|| NestError::DeviceNotFound(selector.to_string()));
    }

    match thermostats.as_slice() {
        [] => Err(NestError::NoThermostat),
        [only] => Ok(*only),
        many => Err(NestError::AmbiguousDevice(
            many.iter().map(|d| d.display_name().to_string()).collect(),
        )),
    }
}

/// Thermostat operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatMode {
    Heat,
    Cool,
    HeatCool,
    Off,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ThermostatMode::Heat => "HEAT",
            ThermostatMode::Cool => "COOL",
            ThermostatMode::HeatCool => "HEATCOOL",
            ThermostatMode::Off => "OFF",
        }
    }

    pub fn parse(mode: &str) -> Option<Self> {
        match mode.to_ascii_uppercase().as_str() {
            "HEAT" => Some(ThermostatMode::Heat),
            "COOL" => Some(ThermostatMode::Cool),
            "HEATCOOL" => Some(ThermostatMode::HeatCool),
            "OFF" => Some(ThermostatMode::Off),
            _ => None,
        }
    }
}

/// Live operating state of one thermostat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatStats {
    pub device_name: String,
    pub display_name: String,
    pub connectivity: Option<String>,
    pub ambient_temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub mode: Option<String>,
    pub eco_mode: Option<String>,
    pub hvac_status: Option<String>,
    pub heat_celsius: Option<f64>,
    pub cool_celsius: Option<f64>,
    /// The setpoint currently steering the thermostat, if any.
    pub target_temperature_celsius: Option<f64>,
}

impl ThermostatStats {
    pub fn from_device(device: &Device) -> Self {
        let traits = &device.traits;
        let mode = traits.mode.as_ref().map(|m| m.mode.clone());
        let eco_mode = traits.eco.as_ref().map(|m| m.mode.clone());
        let setpoint = traits.setpoint.clone().unwrap_or_default();

        let eco_active = eco_mode.as_deref() == Some(ECO_ACTIVE);
        let target = if eco_active {
            None
        } else {
            match mode.as_deref().and_then(ThermostatMode::parse) {
                Some(ThermostatMode::Heat) | Some(ThermostatMode::HeatCool) => setpoint.heat_celsius,
                Some(ThermostatMode::Cool) => setpoint.cool_celsius,
                Some(ThermostatMode::Off) | None => None,
            }
        };

        Self {
            device_name: device.name.clone(),
            display_name: device.display_name().to_string(),
            connectivity: traits.connectivity.as_ref().map(|c| c.status.clone()),
            ambient_temperature_celsius: traits
                .temperature
                .as_ref()
                .map(|t| t.ambient_temperature_celsius),
            humidity_percent: traits.humidity.as_ref().map(|h| h.ambient_humidity_percent),
            mode,
            eco_mode,
            hvac_status: traits.hvac.as_ref().map(|h| h.status.clone()),
            heat_celsius: setpoint.heat_celsius,
            cool_celsius: setpoint.cool_celsius,
            target_temperature_celsius: target,
        }
    }

    pub fn eco_active(&self) -> bool {
        self.eco_mode.as_deref() == Some(ECO_ACTIVE)
    }
}

/// Commands accepted by `devices.executeCommand`.
#[derive(Debug, Clone, PartialEq)]
pub enum ThermostatCommand {
    SetHeat { heat_celsius: f64 },
    SetCool { cool_celsius: f64 },
    SetRange { heat_celsius: f64, cool_celsius: f64 },
    SetMode(ThermostatMode),
    SetEco(bool),
}

impl ThermostatCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ThermostatCommand::SetHeat { .. } => {
                "sdm.devices.commands.ThermostatTemperatureSetpoint.SetHeat"
            }
            ThermostatCommand::SetCool { .. } => {
                "sdm.devices.commands.ThermostatTemperatureSetpoint.SetCool"
            }
            ThermostatCommand::SetRange { .. } => {
                "sdm.devices.commands.ThermostatTemperatureSetpoint.SetRange"
            }
            ThermostatCommand::SetMode(_) => "sdm.devices.commands.ThermostatMode.SetMode",
            ThermostatCommand::SetEco(_) => "sdm.devices.commands.ThermostatEco.SetMode",
        }
    }

    /// Request body for `executeCommand`.
    pub fn to_request(&self) -> serde_json::Value {
        let params = match self {
            ThermostatCommand::SetHeat { heat_celsius } => json!({ "heatCelsius": heat_celsius }),
            ThermostatCommand::SetCool { cool_celsius } => json!({ "coolCelsius": cool_celsius }),
            ThermostatCommand::SetRange {
                heat_celsius,
                cool_celsius,
            } => json!({ "heatCelsius": heat_celsius, "coolCelsius": cool_celsius }),
            ThermostatCommand::SetMode(mode) => json!({ "mode": mode.as_str() }),
            ThermostatCommand::SetEco(on) => {
                json!({ "mode": if *on { ECO_ACTIVE } else { "OFF" } })
            }
        };
        json!({ "command": self.name(), "params": params })
    }
}

/// Choose the setpoint command matching the thermostat's current mode.
///
/// `cool` is only used (and required) in HEATCOOL mode, where `target` is the
/// heat setpoint.
pub fn setpoint_command(
    stats: &ThermostatStats,
    target: f64,
    cool: Option<f64>,
) -> Result<ThermostatCommand, NestError> {
    if !target.is_finite() || cool.is_some_and(|c| !c.is_finite()) {
        return Err(NestError::InvalidSetpoint("temperature must be a number".to_string()));
    }
    if stats.eco_active() {
        return Err(NestError::UnsupportedMode {
            mode: ECO_ACTIVE.to_string(),
        });
    }

    let mode = stats.mode.clone().unwrap_or_else(|| "UNKNOWN".to_string());
    match ThermostatMode::parse(&mode) {
        Some(ThermostatMode::Heat) => Ok(ThermostatCommand::SetHeat {
            heat_celsius: target,
        }),
        Some(ThermostatMode::Cool) => Ok(ThermostatCommand::SetCool {
            cool_celsius: target,
        }),
        Some(ThermostatMode::HeatCool) => {
            let cool = cool.ok_or_else(|| {
                NestError::InvalidSetpoint(
                    "HEATCOOL mode needs both a heat and a cool setpoint (--cool)".to_string(),
                )
            })?;
            if target >= cool {
                return Err(NestError::InvalidSetpoint(format!(
                    "heat setpoint {target} must be below cool setpoint {cool}"
                )));
            }
            Ok(ThermostatCommand::SetRange {
                heat_celsius: target,
                cool_celsius: cool,
            })
        }
        Some(ThermostatMode::Off) | None => Err(NestError::UnsupportedMode { mode }),
    }
}
