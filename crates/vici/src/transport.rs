//! Connection to the IKE daemon's control socket.

use crate::builder::Request;
use crate::wire::{DEFAULT_SOCKET_PATH, Packet, PacketType};
use bytes::Bytes;
use common::{Error, Result};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Request/response and event registration primitives.
///
/// Implementations deliver only command responses and event bodies; packet
/// framing stays behind this trait.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Issue a command and return the raw response body.
    fn request(&mut self, request: &Request) -> Result<Vec<u8>>;

    /// Issue a command and collect the bodies of every `event` packet that
    /// arrives before the response.
    fn request_streamed(
        &mut self,
        request: &Request,
        event: &str,
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>)>;

    fn register_event(&mut self, event: &str) -> Result<()>;

    fn unregister_event(&mut self, event: &str) -> Result<()>;
}

/// Blocking transport over a UNIX stream socket.
///
/// Any I/O failure, and any receive failure that leaves the stream out of
/// step with the daemon, drops the connection; later calls fail with
/// `NotReady` until a new transport is connected.
pub struct UnixTransport {
    stream: Option<UnixStream>,
    path: PathBuf,
}

impl UnixTransport {
    /// Connect to the daemon's default socket.
    pub fn connect_default() -> Result<Self> {
        Self::connect(DEFAULT_SOCKET_PATH)
    }

    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path)
            .map_err(|e| Error::not_ready(format!("connect {}: {}", path.display(), e)))?;

        debug!("Connected to {}", path.display());
        Ok(Self {
            stream: Some(stream),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut UnixStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::not_ready(format!("{} connection lost", self.path.display())))
    }

    /// Run `op` on the stream, dropping the connection on I/O failure.
    fn with_stream<T>(&mut self, op: impl FnOnce(&mut UnixStream) -> Result<T>) -> Result<T> {
        let result = op(self.stream()?);
        if let Err(Error::Io(e)) = &result {
            warn!("Connection to {} failed: {}", self.path.display(), e);
            self.stream = None;
        }
        result
    }

    fn send(&mut self, packet: Packet) -> Result<()> {
        self.with_stream(|stream| packet.write_to(stream))
    }

    /// Read the next packet. After a failed read the stream position is
    /// unknown, so the connection is dropped whatever the error.
    fn receive(&mut self) -> Result<Packet> {
        let result = Packet::read_from(self.stream()?);
        if let Err(e) = &result {
            self.disconnect(e);
        }
        result
    }

    fn disconnect(&mut self, reason: &Error) {
        warn!("Dropping connection to {}: {}", self.path.display(), reason);
        self.stream = None;
    }

    fn exchange(&mut self, request: &Request, event: Option<&str>) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
        self.send(Packet::new(
            PacketType::CmdRequest,
            Some(request.command()),
            Bytes::copy_from_slice(request.body()),
        ))?;

        let mut events = Vec::new();
        loop {
            let packet = self.receive()?;
            match packet.kind {
                PacketType::CmdResponse => return Ok((packet.body.to_vec(), events)),
                PacketType::CmdUnknown => {
                    return Err(Error::unsupported(format!(
                        "unknown command '{}'",
                        request.command()
                    )));
                }
                PacketType::Event if packet.name.as_deref() == event && event.is_some() => {
                    events.push(packet.body.to_vec());
                }
                PacketType::Event => trace!(name = ?packet.name, "Skipping unrelated event"),
                other => {
                    // The response is still in flight
                    let err = Error::parse(format!(
                        "unexpected {:?} while waiting for '{}' response",
                        other,
                        request.command()
                    ));
                    self.disconnect(&err);
                    return Err(err);
                }
            }
        }
    }

    fn event_control(&mut self, kind: PacketType, event: &str) -> Result<()> {
        self.send(Packet::new(kind, Some(event), Bytes::new()))?;

        loop {
            let packet = self.receive()?;
            match packet.kind {
                PacketType::EventConfirm => return Ok(()),
                PacketType::EventUnknown => {
                    return Err(Error::not_found(format!("unknown event '{}'", event)));
                }
                PacketType::Event => trace!(name = ?packet.name, "Skipping event"),
                other => {
                    let err = Error::parse(format!(
                        "unexpected {:?} while waiting for event confirmation",
                        other
                    ));
                    self.disconnect(&err);
                    return Err(err);
                }
            }
        }
    }
}

impl Transport for UnixTransport {
    fn request(&mut self, request: &Request) -> Result<Vec<u8>> {
        self.exchange(request, None).map(|(body, _)| body)
    }

    fn request_streamed(
        &mut self,
        request: &Request,
        event: &str,
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
        self.exchange(request, Some(event))
    }

    fn register_event(&mut self, event: &str) -> Result<()> {
        self.event_control(PacketType::EventRegister, event)
    }

    fn unregister_event(&mut self, event: &str) -> Result<()> {
        self.event_control(PacketType::EventUnregister, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MAX_FRAME_SIZE;
    use common::ErrorKind;
    use std::io::Write;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn socket_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vici-transport-{}-{}.sock", tag, std::process::id()))
    }

    #[test]
    fn test_connect_missing_socket_is_not_ready() {
        let err = UnixTransport::connect("/nonexistent/charon.vici").err().unwrap();
        assert_eq!(err.kind(), common::ErrorKind::NotReady);
    }

    #[test]
    fn test_broken_connection_becomes_not_ready() {
        let path = socket_path("broken");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            // Accept and hang up without answering
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut transport = UnixTransport::connect(&path).unwrap();
        server.join().unwrap();

        let request = Request::empty("version").unwrap();
        assert!(transport.request(&request).is_err());
        assert!(!transport.is_connected());

        let err = transport.request(&request).unwrap_err();
        assert_eq!(err.kind(), common::ErrorKind::NotReady);

        let _ = std::fs::remove_file(&path);
    }

    /// Serve one connection: read the request, then answer with `reply`.
    fn serve_once(tag: &str, reply: fn(&mut UnixStream)) -> (PathBuf, thread::JoinHandle<()>) {
        let path = socket_path(tag);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            Packet::read_from(&mut stream).unwrap();
            reply(&mut stream);
        });
        (path, server)
    }

    #[test]
    fn test_oversized_frame_drops_connection() {
        let (path, server) = serve_once("oversized", |stream| {
            let mut frame = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes().to_vec();
            frame.extend([0u8; 64]);
            stream.write_all(&frame).unwrap();
        });

        let mut transport = UnixTransport::connect(&path).unwrap();
        let request = Request::empty("version").unwrap();

        let err = transport.request(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSize);
        assert!(!transport.is_connected());

        // The leftover body is never read as a length prefix
        let err = transport.request(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);

        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unexpected_reply_drops_connection() {
        let (path, server) = serve_once("unexpected", |stream| {
            Packet::new(PacketType::EventConfirm, None, Bytes::new())
                .write_to(stream)
                .unwrap();
            // May race with the client hanging up
            let _ = Packet::new(PacketType::CmdResponse, None, Bytes::new()).write_to(stream);
        });

        let mut transport = UnixTransport::connect(&path).unwrap();
        let request = Request::empty("version").unwrap();

        let err = transport.request(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(!transport.is_connected());

        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
