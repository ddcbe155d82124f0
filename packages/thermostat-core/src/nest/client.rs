use crate::nest::device::{Device, ThermostatCommand};
use crate::nest::error::NestError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
}

/// Client for the Smart Device Management REST API.
///
/// Every call takes the bearer token explicitly; obtaining one is the
/// [`Authenticator`](crate::auth::Authenticator)'s job.
#[derive(Debug, Clone)]
pub struct NestClient {
    http: reqwest::Client,
    api_url: String,
    project_id: String,
}

impl NestClient {
    pub fn new(
        api_url: impl Into<String>,
        project_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NestError::Transport)?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        })
    }

    /// List every device in the project.
    pub async fn list_devices(&self, token: &str) -> Result<Vec<Device>, NestError> {
        let url = format!("{}/enterprises/{}/devices", self.api_url, self.project_id);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(NestError::Transport)?;
        let body = check_status(resp).await?;

        let list: DeviceList = serde_json::from_str(&body)
            .map_err(|e| NestError::MalformedResponse(format!("device list: {}", e)))?;
        tracing::debug!("Found {} devices", list.devices.len());
        Ok(list.devices)
    }

    /// Fetch one device by its full resource name.
    pub async fn get_device(&self, token: &str, name: &str) -> Result<Device, NestError> {
        let url = format!("{}/{}", self.api_url, name);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(NestError::Transport)?;
        let body = check_status(resp).await?;

        serde_json::from_str(&body)
            .map_err(|e| NestError::MalformedResponse(format!("device {}: {}", name, e)))
    }

    /// Run a command against a device.
    pub async fn execute_command(
        &self,
        token: &str,
        device_name: &str,
        command: &ThermostatCommand,
    ) -> Result<(), NestError> {
        let url = format!("{}/{}:executeCommand", self.api_url, device_name);

        tracing::info!("Sending {} to {}", command.name(), device_name);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&command.to_request())
            .send()
            .await
            .map_err(NestError::Transport)?;
        check_status(resp).await?;

        Ok(())
    }
}

/// Return the body of a successful response, or the status and body as an error.
async fn check_status(resp: reqwest::Response) -> Result<String, NestError> {
    let status = resp.status();
    let body = resp.text().await.map_err(NestError::Transport)?;

    if !status.is_success() {
        tracing::error!("SDM request failed: {} - {}", status, body);
        return Err(NestError::RequestFailed {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nest::device::THERMOSTAT_TYPE;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> NestClient {
        NestClient::new(server.url(), "proj", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_devices() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/enterprises/proj/devices")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"devices":[{"name":"enterprises/proj/devices/t1","type":"sdm.devices.types.THERMOSTAT","traits":{},"parentRelations":[{"parent":"p","displayName":"Hallway"}]}]}"#,
            )
            .create_async()
            .await;

        let devices = client(&server).list_devices("tok").await.unwrap();

        mock.assert_async().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, THERMOSTAT_TYPE);
        assert_eq!(devices[0].display_name(), "Hallway");
    }

    #[tokio::test]
    async fn test_list_devices_empty_project() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/enterprises/proj/devices")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        assert!(client(&server).list_devices("tok").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_devices_rejects_malformed_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/enterprises/proj/devices")
            .with_status(200)
            .with_body(r#"{"devices":[{"type":"x"}]}"#)
            .create_async()
            .await;

        assert!(matches!(
            client(&server).list_devices("tok").await,
            Err(NestError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_is_request_failed() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/enterprises/proj/devices")
            .with_status(401)
            .with_body("Request had invalid authentication credentials.")
            .create_async()
            .await;

        match client(&server).list_devices("stale").await {
            Err(NestError::RequestFailed { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid authentication"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_device() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/enterprises/proj/devices/t1")
            .with_status(200)
            .with_body(
                r#"{"name":"enterprises/proj/devices/t1","type":"sdm.devices.types.THERMOSTAT","traits":{"sdm.devices.traits.Temperature":{"ambientTemperatureCelsius":21.5}}}"#,
            )
            .create_async()
            .await;

        let device = client(&server)
            .get_device("tok", "enterprises/proj/devices/t1")
            .await
            .unwrap();
        assert_eq!(
            device.traits.temperature.map(|t| t.ambient_temperature_celsius),
            Some(21.5)
        );
    }

    #[tokio::test]
    async fn test_execute_command_posts_command_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/enterprises/proj/devices/t1:executeCommand")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Json(serde_json::json!({
                "command": "sdm.devices.commands.ThermostatTemperatureSetpoint.SetHeat",
                "params": { "heatCelsius": 21.0 }
            })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        client(&server)
            .execute_command(
                "tok",
                "enterprises/proj/devices/t1",
                &ThermostatCommand::SetHeat { heat_celsius: 21.0 },
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }
}
