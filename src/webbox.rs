use crate::error::QueryError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Channel id ("meta" in WebBox terms) to its raw string value.
pub type ChannelMap = HashMap<String, String>;

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub key: String,
    pub name: String,
}

/// Request/response access to a data gateway that knows several devices.
#[async_trait]
pub trait GatewayQuery: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, QueryError>;
    async fn get_channels(&self, key: &str) -> Result<ChannelMap, QueryError>;
}

/// Client for the SMA Sunny WebBox JSON-RPC interface.
pub struct WebboxClient {
    endpoint_url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl WebboxClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint_url: format!("{}/rpc", base_url.trim_end_matches('/')),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        proc_name: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T, QueryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let mut request = json!({
            "version": "1.0",
            "proc": proc_name,
            "id": id,
            "format": "JSON",
        });
        if let Some(params) = params {
            request["params"] = params;
        }

        let body = self
            .client
            .post(&self.endpoint_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(format!("RPC={request}"))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let response: RpcResponse<T> = serde_json::from_str(&body)
            .map_err(|e| QueryError::Malformed(format!("{proc_name} response: {e}")))?;

        if let Some(error) = response.error {
            return Err(QueryError::Rpc {
                proc_name: proc_name.to_string(),
                message: error.to_string(),
            });
        }
        response
            .result
            .ok_or_else(|| QueryError::Malformed(format!("{proc_name} response has no result")))
    }
}

#[async_trait]
impl GatewayQuery for WebboxClient {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, QueryError> {
        let result: DevicesResult = self.call("GetDevices", None).await?;
        Ok(result.devices)
    }

    async fn get_channels(&self, key: &str) -> Result<ChannelMap, QueryError> {
        let result: ProcessDataResult = self
            .call(
                "GetProcessData",
                Some(json!({ "devices": [{ "key": key }] })),
            )
            .await?;
        let device = result
            .devices
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::Malformed(format!("no process data for device {key}")))?;
        Ok(device
            .channels
            .into_iter()
            .map(|channel| {
                let value = channel_text(channel.value);
                (channel.meta, value)
            })
            .collect())
    }
}

/// Null or non-string channel values read as empty, which later parse as zero.
fn channel_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DevicesResult {
    #[serde(default)]
    devices: Vec<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessDataResult {
    #[serde(default)]
    devices: Vec<ProcessDevice>,
}

#[derive(Debug, Deserialize)]
struct ProcessDevice {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    meta: String,
    #[serde(default)]
    value: serde_json::Value,
}
