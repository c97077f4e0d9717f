use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::DeviceTransport;
use crate::error::{EngineError, Result};

/// Sends commands as `GET {base}/cmd?c=<command>`.
#[derive(Clone, Debug)]
pub struct HttpDeviceTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpDeviceTransport {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::DeviceUnreachable(format!("http client: {e}")))?;
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("cmd")
            .map_err(|e| EngineError::InvalidPayload(format!("device url {base_url}: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn command_url(&self, command: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().clear().append_pair("c", command);
        url
    }
}

#[async_trait]
impl DeviceTransport for HttpDeviceTransport {
    async fn send(&self, command: &str) -> Result<String> {
        let response = self
            .client
            .get(self.command_url(command))
            .send()
            .await
            .map_err(|e| EngineError::DeviceUnreachable(format!("{command}: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::CommandRejected {
                command: command.to_string(),
                reason: format!("{status}: {body}"),
            });
        }
        Ok(body)
    }
}
