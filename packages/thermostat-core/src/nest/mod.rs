//! Smart Device Management API module.
//!
//! Provides the HTTP client and the typed thermostat model.

mod client;
mod device;
mod error;

pub use client::NestClient;
pub use device::{
    select_thermostat, setpoint_command, Device, DeviceTraits, ParentRelation, ThermostatCommand,
    ThermostatMode, ThermostatStats, THERMOSTAT_TYPE,
};
pub use error::NestError;
