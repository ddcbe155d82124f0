//! nest-thermostat - read, control and record a Nest thermostat from the terminal
//!
//! This binary can:
//! - Authorize against Google's Smart Device Management API
//! - Show the current thermostat state and change setpoint, mode and eco
//! - Record readings to SQLite or PostgreSQL, once or on an interval

mod prompt;
mod session;
mod watch;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use session::{with_login_hint, Session};
use thermostat_core::auth::TokenState;
use thermostat_core::config::{generate_example_config, load_config, process_env};
use thermostat_core::nest::{
    setpoint_command, Device, ThermostatCommand, ThermostatMode, ThermostatStats,
};

#[derive(Parser)]
#[command(name = "nest-thermostat")]
#[command(version)]
#[command(about = "Read, control and record a Nest thermostat")]
#[command(long_about = "
nest-thermostat talks to a Nest thermostat through Google's Smart Device
Management API and keeps a local history of its readings.

Quick start:
  1. Write client credentials:  nest-thermostat config
  2. Authorize:                 nest-thermostat login
  3. Show the thermostat:       nest-thermostat stats
  4. Record every 15 minutes:   nest-thermostat watch --interval 15
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Heat,
    Cool,
    Heatcool,
    Off,
}

impl From<ModeArg> for ThermostatMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Heat => ThermostatMode::Heat,
            ModeArg::Cool => ThermostatMode::Cool,
            ModeArg::Heatcool => ThermostatMode::HeatCool,
            ModeArg::Off => ThermostatMode::Off,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authorize access to the thermostat
    Login {
        /// Run the consent flow even if a usable token exists
        #[arg(long)]
        force: bool,
    },

    /// Show the authorization state without touching the network
    Status,

    /// Remove the cached access token
    Logout {
        /// Also forget the stored refresh token
        #[arg(long)]
        forget: bool,
    },

    /// List devices in the Device Access project
    Devices,

    /// Show the current thermostat state
    Stats {
        /// Thermostat name, id or display name
        #[arg(short, long)]
        device: Option<String>,

        /// Also record the reading in the local database
        #[arg(short, long)]
        save: bool,
    },

    /// Change the target temperature (Celsius)
    SetTemp {
        /// Target temperature; the heat setpoint in HEATCOOL mode
        #[arg(allow_negative_numbers = true)]
        celsius: f64,

        /// Cool setpoint, required in HEATCOOL mode
        #[arg(long)]
        cool: Option<f64>,

        #[arg(short, long)]
        device: Option<String>,
    },

    /// Change the thermostat mode
    Mode {
        mode: ModeArg,

        #[arg(short, long)]
        device: Option<String>,
    },

    /// Turn manual eco mode on or off
    Eco {
        state: Toggle,

        #[arg(short, long)]
        device: Option<String>,
    },

    /// Show recorded readings, newest first, or a time range oldest first
    History {
        #[arg(short, long)]
        device: Option<String>,

        /// Number of readings to show
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Start of the range (RFC 3339 or YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,

        /// End of the range, exclusive (RFC 3339 or YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,
    },

    /// Record a reading every few minutes until interrupted
    Watch {
        /// Interval in minutes (1 to 1440)
        #[arg(short, long, default_value = "15", value_parser = clap::value_parser!(u64).range(1..=1440))]
        interval: u64,

        #[arg(short, long)]
        device: Option<String>,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays clean
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("nest_thermostat={},thermostat_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Login { force } => cmd_login(&cli, *force).await,
        Commands::Status => cmd_status(&cli),
        Commands::Logout { forget } => cmd_logout(&cli, *forget),
        Commands::Devices => cmd_devices(&cli).await,
        Commands::Stats { device, save } => cmd_stats(&cli, device.as_deref(), *save).await,
        Commands::SetTemp {
            celsius,
            cool,
            device,
        } => cmd_set_temp(&cli, *celsius, *cool, device.as_deref()).await,
        Commands::Mode { mode, device } => {
            let command = ThermostatCommand::SetMode((*mode).into());
            cmd_execute(&cli, command, device.as_deref()).await
        }
        Commands::Eco { state, device } => {
            let command = ThermostatCommand::SetEco(matches!(state, Toggle::On));
            cmd_execute(&cli, command, device.as_deref()).await
        }
        Commands::History {
            device,
            limit,
            since,
            until,
        } => cmd_history(&cli, device.as_deref(), *limit, *since, *until).await,
        Commands::Watch { interval, device } => {
            watch::run_watch(Session::open()?, *interval, device.clone()).await
        }
        Commands::Config => cmd_config(&cli),
    }
}

async fn cmd_login(cli: &Cli, force: bool) -> Result<()> {
    let mut session = Session::open()?;

    if !force {
        if let TokenState::HasValidAccessToken(record) = session.auth.state() {
            match cli.format {
                OutputFormat::Text => {
                    println!("Already authorized (token valid until {}).", fmt_expiry(record.expires_at()));
                    println!("Use 'nest-thermostat login --force' to authorize again.");
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "status": "already_authorized",
                        "expires_at": record.expires_at(),
                    }));
                }
            }
            return Ok(());
        }
    }

    if force {
        session.auth.reauthorize().await.map_err(with_login_hint)?;
    } else {
        session.token().await?;
    }

    let expires_at = session.auth.state().record().and_then(|r| r.expires_at());
    match cli.format {
        OutputFormat::Text => {
            println!();
            println!("Authorized. Access token valid until {}.", fmt_expiry(expires_at));
            println!("Token cached in {}", session.auth.store().path().display());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "authorized",
                "expires_at": expires_at,
                "token_file": session.auth.store().path(),
            }));
        }
    }

    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let session = Session::open()?;
    let state = session.auth.state();
    let record = state.record();
    let credentials = session.auth.credentials();
    let client_configured = credentials.require_authorization().is_ok();

    match cli.format {
        OutputFormat::Text => {
            let status = match state {
                TokenState::Unauthenticated => "Not authorized",
                TokenState::HasRefreshTokenOnly { .. } => "Refresh token only (no cached access token)",
                TokenState::HasValidAccessToken(_) => "Authorized",
                TokenState::HasExpiredAccessToken(_) => "Access token expired (will refresh)",
            };
            println!("Status:      {}", status);
            if let Some(record) = record {
                println!("Obtained at: {}", record.obtained_at.to_rfc3339());
                println!("Expires at:  {}", fmt_expiry(record.expires_at()));
            }
            println!("Project:     {}", or_dash(&credentials.project_id));
            println!("Token file:  {}", session.auth.store().path().display());
            if !client_configured {
                println!();
                println!("Client credentials are incomplete. Run 'nest-thermostat config' for an example.");
            } else if matches!(state, TokenState::Unauthenticated) {
                println!();
                println!("Run 'nest-thermostat login' to authorize.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "state": state.name(),
                "obtained_at": record.map(|r| r.obtained_at),
                "expires_at": record.and_then(|r| r.expires_at()),
                "project_id": credentials.project_id,
                "client_configured": client_configured,
                "token_file": session.auth.store().path(),
            }));
        }
    }

    Ok(())
}

fn cmd_logout(cli: &Cli, forget: bool) -> Result<()> {
    let mut session = Session::open()?;
    session
        .auth
        .logout(forget)
        .context("Failed to remove stored credentials")?;

    match cli.format {
        OutputFormat::Text => {
            println!("Removed cached access token.");
            if forget {
                println!("Removed refresh token; the next login runs the consent flow.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "logged_out",
                "refresh_token_forgotten": forget,
                "state": session.auth.state().name(),
            }));
        }
    }

    Ok(())
}

async fn cmd_devices(cli: &Cli) -> Result<()> {
    let mut session = Session::open()?;
    let token = session.token().await?;
    let devices = session.nest.list_devices(&token).await?;

    match cli.format {
        OutputFormat::Text => {
            println!("Found {} devices:", devices.len());
            println!();
            for device in &devices {
                println!("  {:20} {}", device.display_name(), device.id());
                println!("  {:20} {}", "", device.device_type);
            }
        }
        OutputFormat::Json => {
            let devices: Vec<_> = devices
                .iter()
                .map(|d| serde_json::json!({
                    "name": d.name,
                    "id": d.id(),
                    "type": d.device_type,
                    "display_name": d.display_name(),
                    "thermostat": d.is_thermostat(),
                }))
                .collect();
            println!("{}", serde_json::json!({ "devices": devices }));
        }
    }

    Ok(())
}

async fn cmd_stats(cli: &Cli, device: Option<&str>, save: bool) -> Result<()> {
    let mut session = Session::open()?;
    let thermostat = session.thermostat(device).await?;
    let stats = ThermostatStats::from_device(&thermostat);

    let saved_id = if save {
        let db = session.readings().await?;
        let id = db.save(&stats, Utc::now()).await?;
        db.close().await;
        Some(id)
    } else {
        None
    };

    match cli.format {
        OutputFormat::Text => {
            print_stats(&stats);
            if saved_id.is_some() {
                println!();
                println!("Reading saved.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "stats": stats,
                "saved": saved_id.is_some(),
            }));
        }
    }

    Ok(())
}

fn print_stats(stats: &ThermostatStats) {
    println!("{}", stats.display_name);
    println!("  Connectivity: {}", stats.connectivity.as_deref().unwrap_or("-"));
    println!("  Temperature:  {} C", fmt_temp(stats.ambient_temperature_celsius));
    println!(
        "  Humidity:     {}",
        stats.humidity_percent.map_or_else(|| "-".to_string(), |h| format!("{:.0}%", h))
    );
    println!("  Mode:         {}", stats.mode.as_deref().unwrap_or("-"));
    if stats.eco_active() {
        println!("  Eco:          on");
    }
    println!("  HVAC:         {}", stats.hvac_status.as_deref().unwrap_or("-"));
    println!("  Target:       {} C", fmt_temp(stats.target_temperature_celsius));
    if stats.heat_celsius.is_some() && stats.cool_celsius.is_some() {
        println!(
            "  Range:        {} - {} C",
            fmt_temp(stats.heat_celsius),
            fmt_temp(stats.cool_celsius)
        );
    }
}

async fn cmd_set_temp(cli: &Cli, celsius: f64, cool: Option<f64>, device: Option<&str>) -> Result<()> {
    let mut session = Session::open()?;
    let thermostat = session.thermostat(device).await?;
    let stats = ThermostatStats::from_device(&thermostat);
    let command = setpoint_command(&stats, celsius, cool)?;

    send_command(cli, &mut session, &thermostat, &command).await
}

async fn cmd_execute(cli: &Cli, command: ThermostatCommand, device: Option<&str>) -> Result<()> {
    let mut session = Session::open()?;
    let thermostat = session.thermostat(device).await?;
    thermostat.check_command(&command)?;

    send_command(cli, &mut session, &thermostat, &command).await
}

/// Execute `command`, then read the device back to show its new state.
async fn send_command(
    cli: &Cli,
    session: &mut Session,
    thermostat: &Device,
    command: &ThermostatCommand,
) -> Result<()> {
    let token = session.token().await?;
    session
        .nest
        .execute_command(&token, &thermostat.name, command)
        .await?;

    let updated = session.nest.get_device(&token, &thermostat.name).await?;
    let after = ThermostatStats::from_device(&updated);
    report_command(cli, &after, command);
    Ok(())
}

fn report_command(cli: &Cli, after: &ThermostatStats, command: &ThermostatCommand) {
    match cli.format {
        OutputFormat::Text => {
            let what = match command {
                ThermostatCommand::SetHeat { heat_celsius } => format!("heat setpoint {:.1} C", heat_celsius),
                ThermostatCommand::SetCool { cool_celsius } => format!("cool setpoint {:.1} C", cool_celsius),
                ThermostatCommand::SetRange { heat_celsius, cool_celsius } => {
                    format!("range {:.1} - {:.1} C", heat_celsius, cool_celsius)
                }
                ThermostatCommand::SetMode(mode) => format!("mode {}", mode.as_str()),
                ThermostatCommand::SetEco(on) => format!("eco {}", if *on { "on" } else { "off" }),
            };
            println!("{}: set {}", after.display_name, what);
            println!(
                "Now: mode {}, target {} C",
                after.mode.as_deref().unwrap_or("-"),
                fmt_temp(after.target_temperature_celsius)
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "ok",
                "device": after.display_name,
                "request": command.to_request(),
                "stats": after,
            }));
        }
    }
}

async fn cmd_history(
    cli: &Cli,
    device: Option<&str>,
    limit: u32,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<()> {
    let session = Session::open()?;
    let db = session.readings().await?;

    let readings = if since.is_some() || until.is_some() {
        let device = device
            .or(session.config.default_device.as_deref())
            .ok_or_else(|| anyhow!("--since/--until need --device (or default_device in config.toml)"))?;
        let from = since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let to = until.unwrap_or_else(|| Utc::now() + TimeDelta::days(1));
        db.between(device, from, to).await?
    } else {
        db.recent(device, limit).await?
    };
    db.close().await;

    match cli.format {
        OutputFormat::Text => {
            if readings.is_empty() {
                println!("No readings recorded yet. Try 'nest-thermostat stats --save'.");
                return Ok(());
            }
            println!(
                "{:25} {:16} {:>7} {:>6} {:>9} {:8}",
                "Recorded at", "Device", "Temp", "Hum", "Target", "Mode"
            );
            for r in &readings {
                println!(
                    "{:25} {:16} {:>7} {:>6} {:>9} {:8}",
                    r.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    r.display_name.as_deref().unwrap_or_else(|| r.name.rsplit('/').next().unwrap_or(&r.name)),
                    fmt_temp(r.temperature),
                    r.humidity.map_or_else(|| "-".to_string(), |h| format!("{:.0}%", h)),
                    fmt_temp(r.target_temperature),
                    r.mode.as_deref().unwrap_or("-"),
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "readings": readings }));
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = load_config(&process_env)?;

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config directory: {}", config.paths.dir().display());
            println!("Config file:      {}", config.paths.config_file().display());
            println!("Secrets file:     {}", config.paths.secrets_file().display());
            println!("Token file:       {}", config.paths.token_file().display());
            println!("SDM API:          {} (from {})", config.api_url, config.api_source);
            println!("Token endpoint:   {}", config.token_url);
            println!("Database:         {} (from {})", config.database_url, config.database_source);
            if let Some(device) = &config.default_device {
                println!("Default device:   {}", device);
            }
            println!();
            println!("Environment variables:");
            println!("  NEST_THERMOSTAT_HOME         - Override the config directory");
            println!("  NEST_THERMOSTAT_API_URL      - Override the SDM API endpoint");
            println!("  NEST_THERMOSTAT_TOKEN_URL    - Override the OAuth token endpoint");
            println!("  NEST_THERMOSTAT_DATABASE_URL - Override the readings database");
            println!("  NEST_CLIENT_ID, NEST_CLIENT_SECRET, NEST_REDIRECT_URI,");
            println!("  NEST_PROJECT_ID, NEST_REFRESH_TOKEN - Override secrets.toml");
            println!();
            println!("Example files:");
            println!();
            println!("{}", generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_dir": config.paths.dir(),
                "config_file": config.paths.config_file(),
                "secrets_file": config.paths.secrets_file(),
                "token_file": config.paths.token_file(),
                "api_url": config.api_url,
                "api_source": config.api_source.to_string(),
                "token_url": config.token_url,
                "database_url": config.database_url,
                "database_source": config.database_source.to_string(),
                "default_device": config.default_device,
            }));
        }
    }

    Ok(())
}

/// Accept RFC 3339 or a bare date (midnight UTC).
fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

fn fmt_temp(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |t| format!("{:.1}", t))
}

fn fmt_expiry(expires_at: Option<chrono::DateTime<Utc>>) -> String {
    expires_at.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_temp_with_range() {
        let cli = Cli::parse_from(["nest-thermostat", "set-temp", "19.5", "--cool", "24", "-d", "Hallway"]);
        match cli.command {
            Commands::SetTemp { celsius, cool, device } => {
                assert_eq!(celsius, 19.5);
                assert_eq!(cool, Some(24.0));
                assert_eq!(device.as_deref(), Some("Hallway"));
            }
            _ => panic!("expected set-temp"),
        }
    }

    #[test]
    fn test_parse_mode_and_global_format() {
        let cli = Cli::parse_from(["nest-thermostat", "mode", "heatcool", "--format", "json"]);
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Mode { mode, .. } => {
                assert_eq!(ThermostatMode::from(mode), ThermostatMode::HeatCool);
            }
            _ => panic!("expected mode"),
        }
    }

    #[test]
    fn test_watch_interval_is_bounded() {
        let cli = Cli::parse_from(["nest-thermostat", "watch", "--interval", "1440"]);
        assert!(matches!(cli.command, Commands::Watch { interval: 1440, .. }));

        for bad in ["0", "1441", "1844674407370955161"] {
            assert!(
                Cli::try_parse_from(["nest-thermostat", "watch", "--interval", bad]).is_err(),
                "interval {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_history_range_arguments() {
        let cli = Cli::parse_from([
            "nest-thermostat",
            "history",
            "--since",
            "2024-01-15",
            "--until",
            "2024-01-16T06:30:00+01:00",
        ]);
        match cli.command {
            Commands::History { since, until, .. } => {
                assert_eq!(since.unwrap().to_rfc3339(), "2024-01-15T00:00:00+00:00");
                assert_eq!(until.unwrap().to_rfc3339(), "2024-01-16T05:30:00+00:00");
            }
            _ => panic!("expected history"),
        }
        assert!(Cli::try_parse_from(["nest-thermostat", "history", "--since", "yesterday"]).is_err());
    }

    #[test]
    fn test_fmt_helpers() {
        assert_eq!(fmt_temp(Some(20.04)), "20.0");
        assert_eq!(fmt_temp(None), "-");
        assert_eq!(fmt_expiry(None), "unknown");
        assert_eq!(or_dash(""), "-");
    }
}
