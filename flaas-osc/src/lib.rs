//! # flaas OSC client
//!
//! Remote control of Ableton Live through the AbletonOSC remote script.
//!
//! **Layers:**
//! - [`transport`]: request/response and fire-and-forget OSC over UDP
//! - [`reply`]: typed access to reply arguments, decoded once at the boundary
//! - [`live`]: the Live object model calls used by mastering (devices,
//!   parameters, track volume) behind the [`LiveControl`] trait

pub mod error;
pub mod live;
pub mod reply;
pub mod transport;

pub use error::{OscError, Result};
pub use live::{
    DeviceInfo, DeviceList, DeviceRef, LiveClient, LiveControl, ParameterTable, ParameterValue,
};
pub use reply::OscReply;
pub use rosc::OscType;
pub use transport::{OscConfig, OscTransport, UdpTransport};
