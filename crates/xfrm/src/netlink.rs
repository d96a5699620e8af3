//! Netlink communication layer for XFRM.
//!
//! Every request opens its own `NETLINK_XFRM` socket, performs one
//! synchronous round trip and closes the socket again on drop.

use common::{Error, Result};
use netlink_packet_core::{NetlinkDeserializable, NetlinkHeader, NetlinkMessage, NetlinkPayload};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_XFRM};
use std::io;
use std::ops::ControlFlow;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

use crate::messages::XfrmMessage;
use crate::{Reply, XfrmChannel};

/// Largest request we are willing to serialize.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Default receive buffer; large enough for a full dump batch.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 32768;

/// Seconds since the UNIX epoch, truncated to the netlink sequence width.
fn epoch_sequence() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Encode `message` as a complete netlink frame.
pub fn encode_request(message: XfrmMessage, flags: u16, sequence: u32) -> Result<Vec<u8>> {
    let mut header = NetlinkHeader::default();
    header.flags = flags;
    header.sequence_number = sequence;

    let mut nlmsg = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(message));
    nlmsg.finalize();

    let len = nlmsg.buffer_len();
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::AllocFailed(format!(
            "message of {} bytes exceeds {} byte limit",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut buf = vec![0u8; len];
    nlmsg.serialize(&mut buf);
    Ok(buf)
}

/// Split a receive buffer into its netlink messages.
pub fn decode_batch<T>(mut bytes: &[u8]) -> Result<Vec<NetlinkMessage<T>>>
where
    T: NetlinkDeserializable + std::fmt::Debug,
{
    let mut messages = Vec::new();

    while !bytes.is_empty() {
        let message = NetlinkMessage::<T>::deserialize(bytes)
            .map_err(|e| Error::netlink(format!("Failed to parse netlink message: {}", e)))?;

        let len = nlmsg_align(message.header.length as usize);
        trace!("Received netlink message: {:?}", message);
        messages.push(message);

        if len == 0 || len >= bytes.len() {
            break;
        }
        bytes = &bytes[len..];
    }

    Ok(messages)
}

fn os_error(code: std::num::NonZeroI32) -> io::Error {
    io::Error::from_raw_os_error(-code.get())
}

/// One-shot netlink socket for XFRM operations.
pub struct NetlinkSocket {
    socket: Socket,
    sequence: u32,
    recv_buffer_size: usize,
}

impl NetlinkSocket {
    /// Open, bind and connect a socket to the kernel.
    pub fn open(recv_buffer_size: usize) -> Result<Self> {
        let mut socket = Socket::new(NETLINK_XFRM).map_err(Error::SocketOpenFailed)?;
        socket.bind_auto().map_err(Error::SocketBindFailed)?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(Error::SocketBindFailed)?;

        trace!("Opened XFRM netlink socket");
        Ok(Self {
            socket,
            sequence: epoch_sequence(),
            recv_buffer_size,
        })
    }

    /// Send one request.
    fn send(&mut self, message: XfrmMessage, flags: u16) -> Result<()> {
        trace!(seq = self.sequence, flags, "Sending {:?}", message);
        let buf = encode_request(message, flags, self.sequence)?;
        self.socket.send(&buf, 0).map_err(Error::SocketSendFailed)?;
        Ok(())
    }

    /// Receive one datagram worth of messages belonging to our request.
    fn receive(&mut self) -> Result<Vec<NetlinkMessage<XfrmMessage>>> {
        let mut buf = Vec::with_capacity(self.recv_buffer_size);
        let len = self
            .socket
            .recv(&mut buf, 0)
            .map_err(Error::SocketRecvFailed)?;

        let mut messages = decode_batch::<XfrmMessage>(&buf[..len.min(buf.len())])?;
        messages.retain(|m| {
            let ours = m.header.sequence_number == self.sequence;
            if !ours {
                trace!(seq = m.header.sequence_number, "Ignoring foreign message");
            }
            ours
        });
        Ok(messages)
    }

    /// Send a request and wait for the kernel's ack or error.
    pub fn request(&mut self, message: XfrmMessage, flags: u16) -> Result<Reply> {
        self.send(message, flags)?;

        loop {
            for message in self.receive()? {
                match message.payload {
                    NetlinkPayload::Error(err) => {
                        return Ok(match err.code {
                            None => Reply::Ack,
                            Some(code) => Reply::Error(os_error(code)),
                        });
                    }
                    other => trace!("Skipping non-ack reply: {:?}", other),
                }
            }
        }
    }

    /// Send a dump request and hand every record to `visit` until the dump
    /// ends or `visit` breaks.
    pub fn dump(
        &mut self,
        request: XfrmMessage,
        flags: u16,
        visit: &mut dyn FnMut(XfrmMessage) -> ControlFlow<()>,
    ) -> Result<()> {
        self.send(request, flags)?;

        loop {
            for message in self.receive()? {
                match message.payload {
                    NetlinkPayload::InnerMessage(record) => {
                        if visit(record).is_break() {
                            debug!("Dump stopped early by caller");
                            return Ok(());
                        }
                    }
                    NetlinkPayload::Done(_) => return Ok(()),
                    NetlinkPayload::Error(err) => match err.code {
                        Some(code) => return Err(Error::netlink(os_error(code))),
                        None => return Ok(()),
                    },
                    other => trace!("Skipping dump payload: {:?}", other),
                }
            }
        }
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        trace!("Closing XFRM netlink socket");
    }
}

/// Channel that talks to the running kernel, one socket per call.
#[derive(Debug, Clone)]
pub struct KernelChannel {
    recv_buffer_size: usize,
}

impl KernelChannel {
    pub fn new(recv_buffer_size: usize) -> Self {
        Self { recv_buffer_size }
    }
}

impl Default for KernelChannel {
    fn default() -> Self {
        Self::new(DEFAULT_RECV_BUFFER_SIZE)
    }
}

impl XfrmChannel for KernelChannel {
    fn execute(&mut self, message: XfrmMessage, flags: u16) -> Result<Reply> {
        NetlinkSocket::open(self.recv_buffer_size)?.request(message, flags)
    }

    fn dump(
        &mut self,
        request: XfrmMessage,
        visit: &mut dyn FnMut(XfrmMessage) -> ControlFlow<()>,
    ) -> Result<()> {
        NetlinkSocket::open(self.recv_buffer_size)?.dump(
            request,
            crate::commands::REQUEST_DUMP,
            visit,
        )
    }
}
