//! UDP sockets
//!
//! Sockets are built with socket2 so the server can ask for a dual-stack
//! wildcard bind, address reuse and a large receive buffer before handing
//! the socket to tokio.

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;

use crate::error::NetworkError;
use crate::pipeline::capture::{PacketSink, SendCompletion};

/// Create a non-blocking UDP socket bound to `addr`
///
/// An IPv6 wildcard address is bound dual-stack so IPv4 senders reach it too.
pub fn bind_socket(
    addr: SocketAddr,
    recv_buffer: Option<usize>,
) -> Result<std::net::UdpSocket, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let socket =
        Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

    if addr.is_ipv6() {
        socket.set_only_v6(false).map_err(bind_err)?;
    }
    socket.set_reuse_address(true).map_err(bind_err)?;

    if let Some(size) = recv_buffer {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("Could not set receive buffer to {} bytes: {}", size, e);
        }
    }

    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// Bind the server socket on every interface
///
/// Prefers `[::]:port` dual-stack and falls back to `0.0.0.0:port` on hosts
/// without IPv6. Must be called inside a tokio runtime.
pub fn bind_server(port: u16, recv_buffer: usize) -> Result<UdpSocket, NetworkError> {
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    let socket = match bind_socket(v6, Some(recv_buffer)) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!("Dual-stack bind failed ({}), falling back to IPv4", e);
            bind_socket(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), Some(recv_buffer))?
        }
    };

    UdpSocket::from_std(socket).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Resolve `host:port` and open a socket able to reach it
pub async fn connect_client(host: &str, port: u16) -> Result<(UdpSocket, SocketAddr), NetworkError> {
    let target = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NetworkError::ResolveFailed(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| NetworkError::ResolveFailed(format!("{}: no addresses", host)))?;

    let local = match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::from_std(bind_socket(local, None)?)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok((socket, target))
}

/// Sends each packet from its own tokio task
///
/// The completion, and with it the encoded slot, is released when the
/// datagram has been handed to the kernel.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    runtime: Handle,
}

impl UdpSink {
    pub fn new(socket: UdpSocket, target: SocketAddr, runtime: Handle) -> Self {
        Self {
            socket: Arc::new(socket),
            target,
            runtime,
        }
    }
}

impl PacketSink for UdpSink {
    fn send(&self, packet: Bytes, completion: SendCompletion) {
        let socket = self.socket.clone();
        let target = self.target;

        self.runtime.spawn(async move {
            let result = match socket.send_to(&packet, target).await {
                Ok(sent) if sent == packet.len() => Ok(()),
                Ok(sent) => Err(NetworkError::SendFailed(format!(
                    "short send: {} of {} bytes",
                    sent,
                    packet.len()
                ))),
                Err(e) => Err(NetworkError::SendFailed(e.to_string())),
            };
            completion.complete(result);
        });
    }
}
