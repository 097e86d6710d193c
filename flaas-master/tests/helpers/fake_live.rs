//! In-memory Live session
//!
//! Devices sit on one track and report their parameter ranges, but values
//! travel over the wire normalized to `[0, 1]` like they do with AbletonOSC.
//! Every raw write is logged before clamping so tests can assert on exactly
//! what the controller sent.

use async_trait::async_trait;
use flaas_osc::{
    DeviceInfo, DeviceList, DeviceRef, LiveControl, OscError, ParameterTable, ParameterValue, Result,
};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct FakeParameter {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub quantized: bool,
    pub initial: f64,
}

impl FakeParameter {
    fn normalize(&self, value: f64) -> f64 {
        if self.max <= self.min {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    fn denormalize(&self, normalized: f64) -> f64 {
        self.min + normalized * (self.max - self.min)
    }
}

#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub name: String,
    pub class_name: String,
    pub parameters: Vec<FakeParameter>,
}

impl FakeDevice {
    /// Device with a "Device On" switch at index 0
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class_name: name.replace(' ', ""),
            parameters: vec![FakeParameter {
                name: "Device On".into(),
                min: 0.0,
                max: 1.0,
                quantized: true,
                initial: 1.0,
            }],
        }
    }

    pub fn param(mut self, name: &str, min: f64, max: f64, initial: f64) -> Self {
        self.parameters.push(FakeParameter {
            name: name.to_string(),
            min,
            max,
            quantized: false,
            initial,
        });
        self
    }

    pub fn glue() -> Self {
        Self::new("Glue Compressor")
            .param("Threshold", -40.0, 0.0, 0.0)
            .param("Ratio", 0.0, 2.0, 0.0)
            .param("Attack", 0.0, 6.0, 0.0)
            .param("Makeup", 0.0, 20.0, 0.0)
    }

    pub fn saturator() -> Self {
        Self::new("Saturator").param("Drive", 0.0, 36.0, 0.0)
    }

    pub fn limiter() -> Self {
        Self::new("Limiter")
            .param("Gain", 0.0, 24.0, 0.0)
            .param("Ceiling", -20.0, 0.0, 0.0)
    }

    pub fn utility() -> Self {
        Self::new("Utility").param("Gain", -35.0, 35.0, 0.0)
    }
}

pub struct FakeLive {
    track: i32,
    devices: Vec<FakeDevice>,
    /// Master fader, `None` when it cannot be read
    volume: Option<f64>,
    /// Devices that log writes but never change
    read_only: Vec<String>,
    values: Mutex<HashMap<(i32, usize), f64>>,
    writes: Mutex<Vec<(DeviceRef, usize, f64)>>,
}

impl FakeLive {
    pub fn new(track: i32, devices: Vec<FakeDevice>) -> Self {
        let mut values = HashMap::new();
        for (d, device) in devices.iter().enumerate() {
            for (p, param) in device.parameters.iter().enumerate() {
                values.insert((d as i32, p), param.normalize(param.initial));
            }
        }
        Self {
            track,
            devices,
            volume: Some(0.85),
            read_only: Vec::new(),
            values: Mutex::new(values),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Glue Compressor, Saturator, Limiter on the master track
    pub fn stock() -> Self {
        Self::new(
            flaas_master::MASTER_TRACK_ID,
            vec![FakeDevice::glue(), FakeDevice::saturator(), FakeDevice::limiter()],
        )
    }

    pub fn with_volume(mut self, volume: Option<f64>) -> Self {
        self.volume = volume;
        self
    }

    /// Writes to `device` are logged and otherwise ignored
    pub fn with_read_only(mut self, device: &str) -> Self {
        self.read_only.push(device.to_string());
        self
    }

    fn locate(&self, device: &str, parameter: &str) -> (usize, usize) {
        let d = self.devices.iter().position(|x| x.name == device).unwrap();
        let p = self.devices[d]
            .parameters
            .iter()
            .position(|x| x.name == parameter)
            .unwrap();
        (d, p)
    }

    /// Current value of a parameter in its display range
    pub fn value(&self, device: &str, parameter: &str) -> f64 {
        let (d, p) = self.locate(device, parameter);
        let normalized = self.values.lock().unwrap()[&(d as i32, p)];
        self.devices[d].parameters[p].denormalize(normalized)
    }

    /// Current normalized value of a parameter
    pub fn normalized(&self, device: &str, parameter: &str) -> f64 {
        let (d, p) = self.locate(device, parameter);
        self.values.lock().unwrap()[&(d as i32, p)]
    }

    /// Set a parameter from a display-range value
    pub fn set(&self, device: &str, parameter: &str, value: f64) {
        let (d, p) = self.locate(device, parameter);
        let normalized = self.devices[d].parameters[p].normalize(value);
        self.values.lock().unwrap().insert((d as i32, p), normalized);
    }

    /// Every value received by a set call, as sent
    pub fn writes(&self) -> Vec<(DeviceRef, usize, f64)> {
        self.writes.lock().unwrap().clone()
    }

    fn device(&self, device: DeviceRef) -> Result<&FakeDevice> {
        if device.track != self.track {
            return Err(unexpected("/live/device", format!("no track {}", device.track)));
        }
        self.devices
            .get(device.device as usize)
            .ok_or_else(|| unexpected("/live/device", format!("no device {}", device)))
    }
}

fn unexpected(address: &str, detail: String) -> OscError {
    OscError::UnexpectedReply {
        address: address.to_string(),
        detail,
    }
}

#[async_trait]
impl LiveControl for FakeLive {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn device_names(&self, track: i32) -> Result<DeviceList> {
        let names = if track == self.track {
            self.devices.iter().map(|d| d.name.clone()).collect()
        } else {
            Vec::new()
        };
        Ok(DeviceList { track, names })
    }

    async fn device_info(&self, device: DeviceRef) -> Result<DeviceInfo> {
        let fake = self.device(device)?;
        Ok(DeviceInfo {
            device,
            name: fake.name.clone(),
            class_name: fake.class_name.clone(),
            num_parameters: fake.parameters.len(),
        })
    }

    async fn parameter_table(&self, device: DeviceRef) -> Result<ParameterTable> {
        let fake = self.device(device)?;
        Ok(ParameterTable {
            device,
            names: fake.parameters.iter().map(|p| p.name.clone()).collect(),
            mins: fake.parameters.iter().map(|p| p.min).collect(),
            maxs: fake.parameters.iter().map(|p| p.max).collect(),
            quantized: fake.parameters.iter().map(|p| p.quantized).collect(),
        })
    }

    async fn parameter_values(&self, device: DeviceRef) -> Result<Vec<f64>> {
        let count = self.device(device)?.parameters.len();
        let values = self.values.lock().unwrap();
        Ok((0..count).map(|p| values[&(device.device, p)]).collect())
    }

    async fn parameter_value(&self, device: DeviceRef, index: usize) -> Result<ParameterValue> {
        self.device(device)?;
        let value = self
            .values
            .lock()
            .unwrap()
            .get(&(device.device, index))
            .copied()
            .ok_or_else(|| unexpected("/live/device/get/parameter/value", format!("no parameter {}", index)))?;
        Ok(ParameterValue { device, index, value })
    }

    async fn set_parameter_value(&self, device: DeviceRef, index: usize, value: f64) -> Result<()> {
        let fake = self.device(device)?;
        if index >= fake.parameters.len() {
            return Err(unexpected("/live/device/set/parameter/value", format!("no parameter {}", index)));
        }
        self.writes.lock().unwrap().push((device, index, value));
        if self.read_only.contains(&fake.name) {
            return Ok(());
        }
        // Live clamps out-of-range writes
        self.values
            .lock()
            .unwrap()
            .insert((device.device, index), value.clamp(0.0, 1.0));
        Ok(())
    }

    async fn track_volume(&self, track: i32) -> Result<f64> {
        match self.volume {
            Some(volume) if track == self.track => Ok(volume),
            _ => Err(OscError::Timeout {
                address: "/live/track/get/volume".into(),
                reply_port: 11001,
                waited_ms: 6000,
                attempts: 3,
            }),
        }
    }
}
