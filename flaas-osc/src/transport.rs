//! OSC over UDP
//!
//! AbletonOSC listens on one port and answers on another. A request binds the
//! reply port for the duration of the call, sends from that socket, and waits
//! for a message whose address matches the request. Unrelated traffic arriving
//! on the reply port is ignored.

use crate::error::{OscError, Result};
use crate::reply::OscReply;
use async_trait::async_trait;
use rosc::{OscMessage, OscPacket, OscType};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Largest datagram accepted from the remote end
const MAX_DATAGRAM: usize = 65_536;

/// Connection settings for the OSC endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OscConfig {
    /// Host running the DAW
    pub host: String,
    /// Port the remote script listens on
    pub send_port: u16,
    /// Local port replies are sent to (0 = ephemeral)
    pub reply_port: u16,
    /// Wait per attempt
    pub timeout_ms: u64,
    /// Additional attempts after the first
    pub retries: u32,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            send_port: 11000,
            reply_port: 11001,
            timeout_ms: 2000,
            retries: 2,
        }
    }
}

impl OscConfig {
    fn remote(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.send_port)
            .parse()
            .map_err(|e| OscError::Encode {
                address: format!("{}:{}", self.host, self.send_port),
                detail: format!("invalid remote address: {}", e),
            })
    }
}

/// Request/response and fire-and-forget OSC calls
#[async_trait]
pub trait OscTransport: Send + Sync {
    /// Send `address` with `args` and wait for a reply on the same address
    async fn request(&self, address: &str, args: Vec<OscType>) -> Result<OscReply>;

    /// Send without waiting for a reply
    async fn send(&self, address: &str, args: Vec<OscType>) -> Result<()>;
}

/// Tokio UDP implementation of [`OscTransport`]
#[derive(Debug, Clone)]
pub struct UdpTransport {
    config: OscConfig,
}

impl UdpTransport {
    pub fn new(config: OscConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OscConfig {
        &self.config
    }

    async fn wait_for_reply(
        &self,
        socket: &UdpSocket,
        address: &str,
        wait: Duration,
    ) -> Result<Option<OscReply>> {
        let deadline = Instant::now() + wait;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };
            let (len, from) = received;

            let packet = match rosc::decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => packet,
                Err(e) => {
                    warn!(from = %from, error = ?e, "Ignoring undecodable OSC datagram");
                    continue;
                }
            };

            for message in flatten(packet) {
                if message.addr == address {
                    return Ok(Some(OscReply::new(message.addr, message.args)));
                }
                debug!(expected = address, got = %message.addr, "Ignoring unrelated OSC reply");
            }
        }
    }
}

#[async_trait]
impl OscTransport for UdpTransport {
    async fn request(&self, address: &str, args: Vec<OscType>) -> Result<OscReply> {
        let remote = self.config.remote()?;
        let payload = encode(address, args)?;

        let socket = UdpSocket::bind(("0.0.0.0", self.config.reply_port)).await?;
        let local_port = socket.local_addr()?.port();
        let wait = Duration::from_millis(self.config.timeout_ms);
        let attempts = self.config.retries + 1;

        for attempt in 1..=attempts {
            debug!(address, attempt, reply_port = local_port, "OSC request");
            socket.send_to(&payload, remote).await?;

            if let Some(reply) = self.wait_for_reply(&socket, address, wait).await? {
                return Ok(reply);
            }
            if attempt < attempts {
                warn!(address, attempt, "No OSC reply, retrying");
            }
        }

        Err(OscError::Timeout {
            address: address.to_string(),
            reply_port: local_port,
            waited_ms: self.config.timeout_ms * u64::from(attempts),
            attempts,
        })
    }

    async fn send(&self, address: &str, args: Vec<OscType>) -> Result<()> {
        let remote = self.config.remote()?;
        let payload = encode(address, args)?;

        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.send_to(&payload, remote).await?;
        debug!(address, "OSC send");
        Ok(())
    }
}

fn encode(address: &str, args: Vec<OscType>) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args,
    });
    rosc::encoder::encode(&packet).map_err(|e| OscError::Encode {
        address: address.to_string(),
        detail: format!("{:?}", e),
    })
}

fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(message) => vec![message],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}
