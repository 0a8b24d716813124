// packages/pipeline/src/writers/socket.rs
//! Non-blocking socket writer
//!
//! The socket is created at `init` from the configured family, type and
//! protocol names, connected at `open` and then switched to non-blocking
//! mode. Every event is one best-effort send of its JSON document.

use crate::model::Event;
use crate::utils::errors::{LoggerError, Result};
use crate::writers::{EventFormatter, EventWriter, WriterKey, WriterKind};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{
    connect, send, shutdown, socket, AddressFamily, MsgFlags, Shutdown, SockFlag, SockProtocol,
    SockType, SockaddrIn, SockaddrIn6, UnixAddr,
};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::{debug, error};

/// Socket writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConfig {
    /// Address family: `AF_INET`, `AF_INET6` or `AF_UNIX`
    pub domain: String,

    /// Socket type: `SOCK_STREAM` or `SOCK_DGRAM`
    #[serde(alias = "socket_type", alias = "sockettype")]
    pub socket_type: String,

    /// Protocol: `SOL_TCP`/`IPPROTO_TCP`, `SOL_UDP`/`IPPROTO_UDP`, or `0`
    #[serde(default)]
    pub protocol: String,

    /// Host name, IP address, or socket path for `AF_UNIX`
    pub address: String,

    /// Port, ignored for `AF_UNIX`
    #[serde(default)]
    pub port: u16,
}

/// Resolved socket identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketParams {
    family: AddressFamily,
    ty: SockType,
    protocol: Option<SockProtocol>,
}

impl SocketParams {
    fn resolve(config: &SocketConfig) -> Result<Self> {
        let family = match config.domain.to_ascii_uppercase().as_str() {
            "AF_INET" => AddressFamily::Inet,
            "AF_INET6" => AddressFamily::Inet6,
            "AF_UNIX" | "AF_LOCAL" => AddressFamily::Unix,
            other => {
                return Err(LoggerError::Configuration(format!("unknown socket domain: {}", other)))
            }
        };

        let ty = match config.socket_type.to_ascii_uppercase().as_str() {
            "SOCK_STREAM" => SockType::Stream,
            "SOCK_DGRAM" => SockType::Datagram,
            other => {
                return Err(LoggerError::Configuration(format!("unknown socket type: {}", other)))
            }
        };

        let protocol = match config.protocol.to_ascii_uppercase().as_str() {
            "" | "0" => None,
            "SOL_TCP" | "IPPROTO_TCP" => Some(SockProtocol::Tcp),
            "SOL_UDP" | "IPPROTO_UDP" => Some(SockProtocol::Udp),
            other => {
                return Err(LoggerError::Configuration(format!("unknown socket protocol: {}", other)))
            }
        };

        Ok(Self { family, ty, protocol })
    }
}

/// Sends each event as one JSON document over a socket
pub struct SocketWriter {
    config: SocketConfig,
    key: WriterKey,
    socket: Option<OwnedFd>,
    params: Option<SocketParams>,
}

impl SocketWriter {
    /// Create a new socket writer. The socket itself is created at `init`.
    pub fn new(config: SocketConfig) -> Result<Self> {
        let key = WriterKey::new(WriterKind::Socket, &config)?;

        Ok(Self {
            config,
            key,
            socket: None,
            params: None,
        })
    }

    /// Destination as `address:port`
    pub fn destination(&self) -> String {
        format!("{}:{}", self.config.address, self.config.port)
    }

    fn connect_to(&self, fd: &OwnedFd, params: SocketParams) -> Result<()> {
        let raw = fd.as_raw_fd();

        let outcome = match params.family {
            AddressFamily::Unix => {
                let addr = UnixAddr::new(self.config.address.as_str()).map_err(|e| {
                    LoggerError::Configuration(format!("invalid socket path {}: {}", self.config.address, e))
                })?;
                connect(raw, &addr)
            }
            family => {
                let target = self.resolve_address(family)?;
                match target {
                    SocketAddr::V4(v4) => connect(raw, &SockaddrIn::from(v4)),
                    SocketAddr::V6(v6) => connect(raw, &SockaddrIn6::from(v6)),
                }
            }
        };

        outcome.map_err(|e| {
            LoggerError::Connection(format!("connect to {} failed: {}", self.destination(), e))
        })
    }

    fn resolve_address(&self, family: AddressFamily) -> Result<SocketAddr> {
        let candidates = (self.config.address.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| LoggerError::Connection(format!("cannot resolve {}: {}", self.destination(), e)))?;

        candidates
            .into_iter()
            .find(|addr| match family {
                AddressFamily::Inet6 => addr.is_ipv6(),
                _ => addr.is_ipv4(),
            })
            .ok_or_else(|| {
                LoggerError::Connection(format!("no {:?} address for {}", family, self.destination()))
            })
    }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// A peer that went away must surface as EPIPE, not SIGPIPE
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

impl EventFormatter for SocketWriter {
    type Output = Vec<u8>;

    fn format(&self, event: &Event) -> Result<Vec<u8>> {
        serde_json::to_vec(event).map_err(|e| LoggerError::Serialization(e.to_string()))
    }
}

impl EventWriter for SocketWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Socket
    }

    fn key(&self) -> &WriterKey {
        &self.key
    }

    fn init(&mut self) -> Result<()> {
        let params = SocketParams::resolve(&self.config)?;

        let fd = socket(params.family, params.ty, SockFlag::empty(), params.protocol).map_err(|e| {
            error!("Could not initialize socket writer: {}", e);
            LoggerError::Configuration(format!("socket creation failed: {}", e))
        })?;

        self.params = Some(params);
        self.socket = Some(fd);

        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let (Some(fd), Some(params)) = (self.socket.as_ref(), self.params) else {
            return Err(LoggerError::Connection("socket writer not initialized".to_string()));
        };

        if let Err(e) = self.connect_to(fd, params) {
            error!("{}", e);
            return Err(e);
        }

        set_nonblocking(fd).map_err(|e| {
            LoggerError::Connection(format!("cannot make socket non-blocking: {}", e))
        })?;

        debug!("Socket writer connected to {}", self.destination());

        Ok(())
    }

    fn write(&mut self, event: &Event) -> Result<()> {
        let message = self.format(event)?;

        let Some(fd) = self.socket.as_ref() else {
            return Err(LoggerError::Write(format!(
                "socket to {} is closed",
                self.destination()
            )));
        };

        match send(fd.as_raw_fd(), &message, send_flags()) {
            Ok(sent) if sent == message.len() => Ok(()),
            Ok(sent) => Err(LoggerError::Write(format!(
                "short send to {} ({} of {} bytes): {}",
                self.destination(),
                sent,
                message.len(),
                String::from_utf8_lossy(&message)
            ))),
            Err(e) => Err(LoggerError::Write(format!(
                "could not write message {} to socket {}: {}",
                String::from_utf8_lossy(&message),
                self.destination(),
                e
            ))),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(fd) = self.socket.take() {
            // Unconnected or datagram sockets report ENOTCONN here
            if let Err(e) = shutdown(fd.as_raw_fd(), Shutdown::Both) {
                debug!("Socket shutdown for {}: {}", self.destination(), e);
            }
            drop(fd);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PageContext, ParamMap};
    use chrono::Utc;
    use std::io::Read;
    use std::net::{TcpListener, UdpSocket};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(socket_type: &str, protocol: &str, port: u16) -> SocketConfig {
        SocketConfig {
            domain: "AF_INET".to_string(),
            socket_type: socket_type.to_string(),
            protocol: protocol.to_string(),
            address: "127.0.0.1".to_string(),
            port,
        }
    }

    fn event() -> Event {
        let page = Arc::new(PageContext::new("/api", Utc::now()));
        Event::new(page, "Foo", "bar").with_params(ParamMap::new().with("x", 1i64))
    }

    #[test]
    fn test_resolve_params() {
        let params = SocketParams::resolve(&config("SOCK_STREAM", "SOL_TCP", 1)).unwrap();
        assert_eq!(params.family, AddressFamily::Inet);
        assert_eq!(params.ty, SockType::Stream);
        assert_eq!(params.protocol, Some(SockProtocol::Tcp));

        let params = SocketParams::resolve(&config("sock_dgram", "", 1)).unwrap();
        assert_eq!(params.ty, SockType::Datagram);
        assert_eq!(params.protocol, None);
    }

    #[test]
    fn test_unknown_identifiers_rejected() {
        let mut bad = config("SOCK_STREAM", "SOL_TCP", 1);
        bad.domain = "AF_APPLETALK".to_string();
        assert!(matches!(SocketParams::resolve(&bad), Err(LoggerError::Configuration(_))));

        let bad = config("SOCK_RAW", "SOL_TCP", 1);
        assert!(matches!(SocketParams::resolve(&bad), Err(LoggerError::Configuration(_))));
    }

    #[test]
    fn test_format_is_event_json() {
        let writer = SocketWriter::new(config("SOCK_DGRAM", "SOL_UDP", 1)).unwrap();
        let bytes = writer.format(&event()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["class"], "Foo");
        assert_eq!(json["action"], "bar");
        assert_eq!(json["params"]["x"], 1);
        assert_eq!(json["page"]["uri"], "/api");
    }

    #[test]
    fn test_udp_send() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut writer = SocketWriter::new(config("SOCK_DGRAM", "SOL_UDP", port)).unwrap();
        writer.init().unwrap();
        writer.open().unwrap();
        writer.write(&event()).unwrap();

        let mut buf = [0u8; 65536];
        let len = receiver.recv(&mut buf).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(json["action"], "bar");

        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_tcp_send() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut writer = SocketWriter::new(config("SOCK_STREAM", "SOL_TCP", port)).unwrap();
        writer.init().unwrap();
        writer.open().unwrap();

        let (mut stream, _) = listener.accept().unwrap();
        writer.write(&event()).unwrap();
        writer.close().unwrap();

        let mut received = String::new();
        stream.read_to_string(&mut received).unwrap();
        assert!(received.contains("\"action\":\"bar\""));
    }

    #[test]
    fn test_write_to_departed_peer_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut writer = SocketWriter::new(config("SOCK_STREAM", "SOL_TCP", port)).unwrap();
        writer.init().unwrap();
        writer.open().unwrap();

        let (stream, _) = listener.accept().unwrap();
        drop(stream);
        drop(listener);

        // The first send after the peer closes may still be accepted locally
        let mut failure = None;
        for _ in 0..100 {
            if let Err(e) = writer.write(&event()) {
                failure = Some(e);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(matches!(failure, Some(LoggerError::Write(_))));
        writer.close().unwrap();
    }

    #[test]
    fn test_connect_refused_reported() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut writer = SocketWriter::new(config("SOCK_STREAM", "SOL_TCP", port)).unwrap();
        writer.init().unwrap();

        assert!(matches!(writer.open(), Err(LoggerError::Connection(_))));
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut writer = SocketWriter::new(config("SOCK_DGRAM", "SOL_UDP", 9)).unwrap();
        writer.init().unwrap();
        writer.close().unwrap();

        assert!(matches!(writer.write(&event()), Err(LoggerError::Write(_))));
    }
}
