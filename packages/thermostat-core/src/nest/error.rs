/// Errors raised while talking to the Smart Device Management API.
#[derive(Debug, thiserror::Error)]
pub enum NestError {
    #[error("could not reach the SDM API: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("SDM API request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("SDM API returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("no thermostat found in this Device Access project")]
    NoThermostat,

    #[error("several thermostats found, pick one with --device: {}", .0.join(", "))]
    AmbiguousDevice(Vec<String>),

    #[error("no thermostat matches '{0}'")]
    DeviceNotFound(String),

    #[error("cannot change the setpoint while the thermostat is in {mode} mode")]
    UnsupportedMode { mode: String },

    #[error("mode {mode} is not offered by this thermostat (available: {})", .available.join(", "))]
    ModeNotAvailable { mode: String, available: Vec<String> },

    #[error("invalid setpoint: {0}")]
    InvalidSetpoint(String),
}
