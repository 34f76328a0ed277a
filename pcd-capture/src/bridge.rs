use std::time::Duration;

use pcd_core::{FrameMessage, PointCloudFrame, StreamStatus};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;

use crate::error::{CaptureError, Result};
use crate::source::FrameSource;

/// Frames pulled over HTTP from a remote bridge that owns the sensor.
pub struct BridgeSource {
    base_url: String,
    client: Client,
    last_remote: Option<u64>,
    sequence: u64,
}

impl BridgeSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_remote: None,
            sequence: 0,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn unreachable(&self, err: reqwest::Error) -> CaptureError {
        if err.is_connect() || err.is_timeout() {
            CaptureError::BridgeUnreachable {
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        } else {
            CaptureError::Http(err)
        }
    }

    fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        Err(CaptureError::SensorNotReady(format!("{status}: {detail}")))
    }

    fn post(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .send()
            .map_err(|e| self.unreachable(e))?;
        Self::check(response)?;
        Ok(())
    }

    pub fn remote_status(&self) -> Result<StreamStatus> {
        let response = self
            .client
            .get(self.url("/status"))
            .send()
            .map_err(|e| self.unreachable(e))?;
        Ok(Self::check(response)?.json()?)
    }
}

impl FrameSource for BridgeSource {
    fn describe(&self) -> String {
        format!("bridge {}", self.base_url)
    }

    fn connect(&mut self) -> Result<()> {
        self.post("/initialize")?;
        self.post("/start")?;
        log::info!("bridge {} is streaming", self.base_url);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.post("/stop") {
            log::debug!("bridge stop failed: {}", e);
        }
    }

    fn reset_session(&mut self) {
        self.last_remote = None;
        self.sequence = 0;
    }

    /// A frame request is bounded by `timeout`; a slow bridge yields no
    /// frame for this interval and is caught by the next status probe.
    fn poll(&mut self, timeout: Duration) -> Result<Option<PointCloudFrame>> {
        let response = match self.client.get(self.url("/frame")).timeout(timeout).send() {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                log::debug!("no frame from {} within {:?}", self.base_url, timeout);
                return Ok(None);
            }
            Err(e) => return Err(self.unreachable(e)),
        };
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let message: FrameMessage = Self::check(response)?
            .json()
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        if self.last_remote == Some(message.frame_number) {
            return Ok(None);
        }
        self.last_remote = Some(message.frame_number);

        let frame = PointCloudFrame::try_from(message)?.renumbered(self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn probe(&mut self) -> Result<()> {
        let status = self.remote_status()?;
        if !status.streaming {
            log::warn!("bridge stopped streaming ({}), restarting", status.message);
            self.post("/start")?;
        }
        Ok(())
    }
}
