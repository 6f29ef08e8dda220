use crate::error::QueryError;
use crate::measurement::{parse_channel_value, Measurement};
use crate::snapshot::SourceId;
use crate::webbox::{ChannelMap, GatewayQuery};
use std::sync::Arc;
use tracing::{info, warn};

/// The two string inputs behind the gateway device.
pub const CHANNEL_GROUPS: [&str; 2] = ["A", "B"];

/// Low frequency path reading the gateway-attached strings.
#[derive(Clone)]
pub struct GatewayPath {
    query: Arc<dyn GatewayQuery>,
    device_key: String,
    sources: [SourceId; 2],
}

impl GatewayPath {
    pub fn new(query: Arc<dyn GatewayQuery>, device_key: String, sources: [SourceId; 2]) -> Self {
        Self {
            query,
            device_key,
            sources,
        }
    }

    /// Finds the first device whose name contains `pattern`. `None` means the
    /// gateway path stays disabled for the life of the process.
    pub async fn resolve(
        query: Arc<dyn GatewayQuery>,
        pattern: &str,
        sources: [SourceId; 2],
    ) -> Option<Self> {
        let devices = match query.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Could not list gateway devices, gateway strings disabled: {e}");
                return None;
            }
        };
        match devices.into_iter().find(|d| d.name.contains(pattern)) {
            Some(device) => {
                info!(device = %device.name, key = %device.key, "Found gateway string inverter");
                Some(Self::new(query, device.key, sources))
            }
            None => {
                warn!("No string inverter matching '{pattern}' found, gateway strings disabled");
                None
            }
        }
    }

    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    pub fn sources(&self) -> &[SourceId; 2] {
        &self.sources
    }

    pub async fn fetch(&self) -> Result<(Measurement, Measurement), QueryError> {
        let channels = self.query.get_channels(&self.device_key).await?;
        Ok((
            channel_group(&channels, CHANNEL_GROUPS[0]),
            channel_group(&channels, CHANNEL_GROUPS[1]),
        ))
    }
}

/// Builds a measurement from `<group>.Ms.Amp/Vol/Watt`, missing channels
/// reading as zero.
pub fn channel_group(channels: &ChannelMap, group: &str) -> Measurement {
    let value = |suffix: &str| {
        channels
            .get(&format!("{group}.Ms.{suffix}"))
            .map_or(0.0, |v| parse_channel_value(v))
    };
    Measurement::new(value("Amp"), value("Vol"), value("Watt"))
}
