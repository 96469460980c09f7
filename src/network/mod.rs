//! Network subsystem for UDP audio transport

pub mod udp;

pub use udp::{bind_server, bind_socket, connect_client, UdpSink};
