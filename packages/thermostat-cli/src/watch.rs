//! Foreground polling mode that records thermostat readings
//!
//! Every tick fetches the current stats, logs them and saves them to the
//! readings database. Stops on Ctrl+C or SIGTERM.

use crate::session::Session;
use anyhow::Result;
use chrono::Utc;
use thermostat_core::auth::AuthError;
use thermostat_core::nest::ThermostatStats;
use thermostat_core::readings::ReadingsDb;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Poll the thermostat every `interval_minutes` until interrupted.
pub async fn run_watch(
    mut session: Session,
    interval_minutes: u64,
    device: Option<String>,
) -> Result<()> {
    // Authorize up front, while a terminal is surely attached.
    session.token().await?;
    let db = session.readings().await?;

    tracing::info!(
        "Recording readings every {} minutes to {}",
        interval_minutes,
        session.config.database_url
    );

    let mut ticker = interval(Duration::from_secs(interval_minutes.clamp(1, 1440) * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match record_reading(&mut session, &db, device.as_deref()).await {
                    Ok(stats) => tracing::info!(
                        "{}: {} C, humidity {}%, mode {}",
                        stats.display_name,
                        fmt_opt(stats.ambient_temperature_celsius),
                        fmt_opt(stats.humidity_percent),
                        stats.mode.as_deref().unwrap_or("-"),
                    ),
                    Err(e) if requires_login(&e) => {
                        tracing::error!("Stopping: {:#}", e);
                        eprintln!("Run 'nest-thermostat login --force' to authorize again.");
                        break;
                    }
                    // Might be a temporary network issue
                    Err(e) => tracing::error!("Reading failed: {:#}", e),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, stopping");
                break;
            }
        }
    }

    db.close().await;
    tracing::info!("Watch stopped");
    Ok(())
}

async fn record_reading(
    session: &mut Session,
    db: &ReadingsDb,
    device: Option<&str>,
) -> Result<ThermostatStats> {
    let thermostat = session.thermostat(device).await?;
    let stats = ThermostatStats::from_device(&thermostat);
    db.save(&stats, Utc::now()).await?;
    Ok(stats)
}

/// Errors after which polling cannot recover without the user.
fn requires_login(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<AuthError>(),
        Some(
            AuthError::RequestFailed { .. }
                | AuthError::ConfigMissing(_)
                | AuthError::MissingRefreshToken
                | AuthError::EmptyAuthorizationCode
                | AuthError::Prompt(_)
        )
    )
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM");
            }
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::with_login_hint;

    #[test]
    fn test_rejected_refresh_stops_watch() {
        let err = with_login_hint(AuthError::RequestFailed {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.to_string(),
        });
        assert!(requires_login(&err));
    }

    #[test]
    fn test_api_errors_keep_watching() {
        let err = anyhow::Error::new(thermostat_core::NestError::RequestFailed {
            status: 503,
            body: "unavailable".to_string(),
        });
        assert!(!requires_login(&err));
        assert!(!requires_login(&anyhow::anyhow!("timeout")));
    }

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(Some(21.456)), "21.5");
        assert_eq!(fmt_opt(None), "-");
    }
}
