//! LAN discovery announcer
//!
//! Sends the same small JSON datagram to the discovery group on a fixed
//! interval. Viewers listen on the group and connect to the announced port.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::constants::FALLBACK_NAME;
use crate::error::NetworkError;
use crate::protocol::DiscoveryPayload;

/// Name to announce: the configured identifier, else the host name
pub fn announce_name(identifier: &str) -> String {
    if !identifier.is_empty() {
        return identifier.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// Create the sending socket, configured for multicast and broadcast
fn create_socket(target: SocketAddr, ttl: u32) -> io::Result<std::net::UdpSocket> {
    let (domain, bind): (Domain, SocketAddr) = match target.ip() {
        IpAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
        IpAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    match target.ip() {
        IpAddr::V4(_) => {
            socket.set_broadcast(true)?;
            socket.set_multicast_ttl_v4(ttl)?;
            socket.set_multicast_loop_v4(true)?;
        }
        IpAddr::V6(_) => {
            socket.set_multicast_hops_v6(ttl)?;
            socket.set_multicast_loop_v6(true)?;
        }
    }
    socket.bind(&bind.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Periodic discovery broadcaster
pub struct Announcer {
    socket: UdpSocket,
    target: SocketAddr,
    payload: Bytes,
    interval: Duration,
}

impl Announcer {
    /// Must be called within a tokio runtime
    pub fn new(config: &DiscoveryConfig, payload: &DiscoveryPayload) -> Result<Self, NetworkError> {
        let target = config.target();
        let socket = create_socket(target, config.ttl)
            .and_then(UdpSocket::from_std)
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

        Ok(Self {
            socket,
            target,
            payload: payload.to_bytes(),
            interval: config.interval(),
        })
    }

    /// Announce until `cancel` fires. The socket is released on return.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            "Announcing {} to {} every {:?}",
            String::from_utf8_lossy(&self.payload),
            self.target,
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.socket.send_to(&self.payload, self.target).await {
                Ok(_) => {
                    if failures > 0 {
                        tracing::info!("Discovery announcements recovered after {} failures", failures);
                        failures = 0;
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        tracing::warn!("Discovery announcement to {} failed: {}", self.target, e);
                    } else {
                        tracing::debug!("Discovery announcement failed ({}): {}", failures, e);
                    }
                }
            }
        }

        tracing::info!("Discovery announcer stopped");
    }
}
