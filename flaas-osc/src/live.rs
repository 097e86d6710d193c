//! Typed AbletonOSC object-model calls
//!
//! Every reply from the remote script echoes its addressing arguments first
//! (track id, then device id, then parameter id) followed by the payload. The
//! client strips those prefixes here so callers only see typed values.

use crate::error::Result;
use crate::reply::OscReply;
use crate::transport::OscTransport;
use async_trait::async_trait;
use rosc::OscType;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Device position on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Track index (-1 style master addressing is left to the caller)
    pub track: i32,
    /// Device index within the track's chain
    pub device: i32,
}

impl DeviceRef {
    pub fn new(track: i32, device: i32) -> Self {
        Self { track, device }
    }

    fn args(&self) -> Vec<OscType> {
        vec![OscType::Int(self.track), OscType::Int(self.device)]
    }
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track {} device {}", self.track, self.device)
    }
}

/// Device names on one track, in chain order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceList {
    pub track: i32,
    pub names: Vec<String>,
}

/// Identity of a single device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: DeviceRef,
    pub name: String,
    pub class_name: String,
    pub num_parameters: usize,
}

/// Parameter metadata for a whole device, one entry per parameter index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    pub device: DeviceRef,
    pub names: Vec<String>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
    pub quantized: Vec<bool>,
}

impl ParameterTable {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Current value of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub device: DeviceRef,
    pub index: usize,
    pub value: f64,
}

/// Live object-model operations used by the mastering loop
#[async_trait]
pub trait LiveControl: Send + Sync {
    /// Round-trip `/live/test`
    async fn ping(&self) -> Result<()>;

    /// Names of every device on `track`
    async fn device_names(&self, track: i32) -> Result<DeviceList>;

    /// Name, class name and parameter count of one device
    async fn device_info(&self, device: DeviceRef) -> Result<DeviceInfo>;

    /// Names and ranges of every parameter on a device
    async fn parameter_table(&self, device: DeviceRef) -> Result<ParameterTable>;

    /// Current native values of every parameter on a device
    async fn parameter_values(&self, device: DeviceRef) -> Result<Vec<f64>>;

    /// Current native value of one parameter
    async fn parameter_value(&self, device: DeviceRef, index: usize) -> Result<ParameterValue>;

    /// Write one parameter (native units, absolute)
    async fn set_parameter_value(&self, device: DeviceRef, index: usize, value: f64) -> Result<()>;

    /// Mixer volume of a track, native 0..1 units
    async fn track_volume(&self, track: i32) -> Result<f64>;
}

/// [`LiveControl`] over any [`OscTransport`]
pub struct LiveClient<T: OscTransport> {
    transport: T,
}

impl<T: OscTransport> LiveClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn device_request(&self, address: &str, device: DeviceRef) -> Result<OscReply> {
        self.transport.request(address, device.args()).await
    }
}

#[async_trait]
impl<T: OscTransport> LiveControl for LiveClient<T> {
    async fn ping(&self) -> Result<()> {
        self.transport.request("/live/test", vec![]).await?;
        Ok(())
    }

    async fn device_names(&self, track: i32) -> Result<DeviceList> {
        let reply = self
            .transport
            .request("/live/track/get/devices/name", vec![OscType::Int(track)])
            .await?;
        Ok(DeviceList {
            track,
            names: reply.strings_from(1),
        })
    }

    async fn device_info(&self, device: DeviceRef) -> Result<DeviceInfo> {
        let name = self.device_request("/live/device/get/name", device).await?;
        let class_name = self.device_request("/live/device/get/class_name", device).await?;
        let count = self.device_request("/live/device/get/num_parameters", device).await?;

        let num_parameters = count.int(2)?;
        Ok(DeviceInfo {
            device,
            name: name.string(2)?,
            class_name: class_name.string(2)?,
            num_parameters: usize::try_from(num_parameters).unwrap_or(0),
        })
    }

    async fn parameter_table(&self, device: DeviceRef) -> Result<ParameterTable> {
        let names = self.device_request("/live/device/get/parameters/name", device).await?;
        let mins = self.device_request("/live/device/get/parameters/min", device).await?;
        let maxs = self.device_request("/live/device/get/parameters/max", device).await?;
        let quantized = self
            .device_request("/live/device/get/parameters/is_quantized", device)
            .await?;

        let table = ParameterTable {
            device,
            names: names.strings_from(2),
            mins: mins.floats_from(2)?,
            maxs: maxs.floats_from(2)?,
            quantized: quantized.bools_from(2)?,
        };
        debug!(device = %device, parameters = table.len(), "Read parameter table");
        Ok(table)
    }

    async fn parameter_values(&self, device: DeviceRef) -> Result<Vec<f64>> {
        let reply = self.device_request("/live/device/get/parameters/value", device).await?;
        reply.floats_from(2)
    }

    async fn parameter_value(&self, device: DeviceRef, index: usize) -> Result<ParameterValue> {
        let mut args = device.args();
        args.push(OscType::Int(index as i32));
        let reply = self
            .transport
            .request("/live/device/get/parameter/value", args)
            .await?;
        Ok(ParameterValue {
            device,
            index,
            value: reply.float(3)?,
        })
    }

    async fn set_parameter_value(&self, device: DeviceRef, index: usize, value: f64) -> Result<()> {
        let mut args = device.args();
        args.push(OscType::Int(index as i32));
        args.push(OscType::Float(value as f32));
        debug!(device = %device, index, value, "Set parameter");
        self.transport
            .send("/live/device/set/parameter/value", args)
            .await
    }

    async fn track_volume(&self, track: i32) -> Result<f64> {
        let reply = self
            .transport
            .request("/live/track/get/volume", vec![OscType::Int(track)])
            .await?;
        reply.last_float()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OscError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers requests from a fixed table and records sends
    #[derive(Default)]
    struct ScriptedTransport {
        replies: HashMap<String, Vec<OscType>>,
        sent: Mutex<Vec<(String, Vec<OscType>)>>,
    }

    impl ScriptedTransport {
        fn with(mut self, address: &str, args: Vec<OscType>) -> Self {
            self.replies.insert(address.to_string(), args);
            self
        }
    }

    #[async_trait]
    impl OscTransport for ScriptedTransport {
        async fn request(&self, address: &str, _args: Vec<OscType>) -> Result<OscReply> {
            match self.replies.get(address) {
                Some(args) => Ok(OscReply::new(address, args.clone())),
                None => Err(OscError::Timeout {
                    address: address.to_string(),
                    reply_port: 0,
                    waited_ms: 0,
                    attempts: 1,
                }),
            }
        }

        async fn send(&self, address: &str, args: Vec<OscType>) -> Result<()> {
            self.sent.lock().unwrap().push((address.to_string(), args));
            Ok(())
        }
    }

    fn s(v: &str) -> OscType {
        OscType::String(v.to_string())
    }

    #[tokio::test]
    async fn test_device_names_strip_track_prefix() {
        let transport = ScriptedTransport::default().with(
            "/live/track/get/devices/name",
            vec![OscType::Int(0), s("Glue Compressor"), s("Limiter")],
        );
        let client = LiveClient::new(transport);
        let list = client.device_names(0).await.unwrap();
        assert_eq!(list.names, vec!["Glue Compressor", "Limiter"]);
    }

    #[tokio::test]
    async fn test_parameter_table_strips_device_prefix() {
        let prefix = || vec![OscType::Int(0), OscType::Int(1)];
        let with_prefix = |tail: Vec<OscType>| {
            let mut v = prefix();
            v.extend(tail);
            v
        };
        let transport = ScriptedTransport::default()
            .with(
                "/live/device/get/parameters/name",
                with_prefix(vec![s("Device On"), s("Gain")]),
            )
            .with(
                "/live/device/get/parameters/min",
                with_prefix(vec![OscType::Float(0.0), OscType::Float(-24.0)]),
            )
            .with(
                "/live/device/get/parameters/max",
                with_prefix(vec![OscType::Float(1.0), OscType::Float(24.0)]),
            )
            .with(
                "/live/device/get/parameters/is_quantized",
                with_prefix(vec![OscType::Bool(true), OscType::Bool(false)]),
            );
        let client = LiveClient::new(transport);
        let table = client.parameter_table(DeviceRef::new(0, 1)).await.unwrap();
        assert_eq!(table.names, vec!["Device On", "Gain"]);
        assert_eq!(table.mins, vec![0.0, -24.0]);
        assert_eq!(table.maxs, vec![1.0, 24.0]);
        assert_eq!(table.quantized, vec![true, false]);
    }

    #[tokio::test]
    async fn test_parameter_value_reads_fourth_argument() {
        let transport = ScriptedTransport::default().with(
            "/live/device/get/parameter/value",
            vec![OscType::Int(0), OscType::Int(1), OscType::Int(3), OscType::Float(-6.5)],
        );
        let client = LiveClient::new(transport);
        let value = client.parameter_value(DeviceRef::new(0, 1), 3).await.unwrap();
        assert_eq!(value.value, -6.5);
        assert_eq!(value.index, 3);
    }

    #[tokio::test]
    async fn test_set_parameter_is_fire_and_forget() {
        let client = LiveClient::new(ScriptedTransport::default());
        client
            .set_parameter_value(DeviceRef::new(2, 0), 5, 0.25)
            .await
            .unwrap();
        let sent = client.transport().sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "/live/device/set/parameter/value");
        assert_eq!(
            sent[0].1,
            vec![OscType::Int(2), OscType::Int(0), OscType::Int(5), OscType::Float(0.25)]
        );
    }

    #[tokio::test]
    async fn test_track_volume_uses_last_argument() {
        let transport = ScriptedTransport::default().with(
            "/live/track/get/volume",
            vec![OscType::Int(0), OscType::Float(0.85)],
        );
        let client = LiveClient::new(transport);
        let volume = client.track_volume(0).await.unwrap();
        assert!((volume - 0.85).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_reply_propagates_timeout() {
        let client = LiveClient::new(ScriptedTransport::default());
        let err = client.ping().await.unwrap_err();
        assert!(err.is_timeout());
    }
}
