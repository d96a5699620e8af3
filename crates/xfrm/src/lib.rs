//! Management of Linux IPsec security associations and policies over
//! `NETLINK_XFRM`.
//!
//! This crate marshals [`SecurityAssociation`] and [`SecurityPolicy`] values
//! into kernel XFRM messages and parses the kernel's replies back into them.
//! Every call is synchronous and uses a fresh netlink socket.
//!
//! # Example
//!
//! ```no_run
//! use xfrm::{Algorithm, Mode, SecurityAssociation, XfrmManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = XfrmManager::new();
//!
//! let mut sa = SecurityAssociation::new(
//!     0x1234,
//!     "10.0.0.1".parse()?,
//!     "10.0.0.2".parse()?,
//! );
//! sa.mode = Mode::Tunnel;
//! sa.encryption = Some(Algorithm::new("cbc(aes)", "11112222333344445555666677778888"));
//! manager.add_sa(&sa)?;
//!
//! for sa in manager.list_sas()? {
//!     println!("SA: {}", sa);
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod hex;
pub mod messages;
mod netlink;
mod types;

pub use hex::{bytes_to_hex, hex_to_bytes};
pub use messages::{XfrmMessage, parse_attributes};
pub use netlink::{DEFAULT_RECV_BUFFER_SIZE, KernelChannel, MAX_MESSAGE_SIZE};
pub use types::{
    AddressFamily, Algorithm, IpsecProtocol, Lifetime, Mode, PolicyAction, PolicyDirection,
    SaStats, SecurityAssociation, SecurityPolicy, Template, TrafficSelector,
};

use commands::{CREATE_EXCLUSIVE, REQUEST_ACK};
use common::{Error, Result};
use messages::UserPolicyId;
use std::io;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

/// Outcome of a request the kernel answered.
#[derive(Debug)]
pub enum Reply {
    Ack,
    /// The kernel rejected the request with this OS error.
    Error(io::Error),
}

/// Transport for XFRM requests.
///
/// [`KernelChannel`] is the production implementation; tests substitute an
/// in-memory kernel.
pub trait XfrmChannel {
    /// Send a request and return the kernel's verdict.
    fn execute(&mut self, message: XfrmMessage, flags: u16) -> Result<Reply>;

    /// Send a dump request, feeding every returned record to `visit`.
    /// Returning `ControlFlow::Break` stops the dump.
    fn dump(
        &mut self,
        request: XfrmMessage,
        visit: &mut dyn FnMut(XfrmMessage) -> ControlFlow<()>,
    ) -> Result<()>;
}

/// XFRM Manager - main interface for SA and policy operations.
pub struct XfrmManager<C: XfrmChannel = KernelChannel> {
    channel: C,
}

impl XfrmManager<KernelChannel> {
    /// Create a manager that talks to the running kernel.
    ///
    /// No socket is opened until the first operation; each operation
    /// requires CAP_NET_ADMIN.
    pub fn new() -> Self {
        Self::with_channel(KernelChannel::default())
    }
}

impl Default for XfrmManager<KernelChannel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: XfrmChannel> XfrmManager<C> {
    pub fn with_channel(channel: C) -> Self {
        Self { channel }
    }

    /// Install a new SA. Fails if one with the same identity already exists.
    pub fn add_sa(&mut self, sa: &SecurityAssociation) -> Result<()> {
        debug!("Adding SA: {}", sa);
        let message = XfrmMessage::NewSa(sa.to_sa_message());

        match self.channel.execute(message, CREATE_EXCLUSIVE)? {
            Reply::Ack => {
                info!("Added SA {}", sa);
                Ok(())
            }
            Reply::Error(err) => Err(Error::add_failed(format!("{}: {}", sa, err))),
        }
    }

    /// Look up an SA by SPI.
    pub fn get_sa(&mut self, spi: u32) -> Result<SecurityAssociation> {
        let mut found = None;

        self.channel.dump(XfrmMessage::sa_dump(), &mut |record| {
            if let XfrmMessage::NewSa(msg) = record
                && msg.info.id.spi == spi
            {
                found = SecurityAssociation::from_sa_message(&msg);
                if found.is_some() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;

        found.ok_or_else(|| Error::not_found(format!("SA with SPI 0x{:08x}", spi)))
    }

    /// Remove an SA, keyed by destination, SPI and protocol.
    pub fn del_sa(&mut self, sa: &SecurityAssociation) -> Result<()> {
        debug!("Deleting SA: {}", sa);
        let message = XfrmMessage::DelSa(sa.to_sa_id());

        match self.channel.execute(message, REQUEST_ACK)? {
            Reply::Ack => {
                info!("Deleted SA {}", sa);
                Ok(())
            }
            Reply::Error(err) => Err(Error::delete_failed(format!("{}: {}", sa, err))),
        }
    }

    /// Replace the SA with the same SPI by deleting it and installing `sa`.
    ///
    /// SPIs are treated as unique; with several SAs sharing one, the first
    /// dumped is the one replaced. Not atomic: if the recreate fails the old
    /// SA is already gone.
    pub fn modify_sa(&mut self, sa: &SecurityAssociation) -> Result<()> {
        let existing = self.get_sa(sa.spi)?;

        self.del_sa(&existing)?;
        self.add_sa(sa).inspect_err(|e| {
            warn!("SA 0x{:08x} deleted but not recreated: {}", sa.spi, e);
        })
    }

    /// Every SA currently installed.
    pub fn list_sas(&mut self) -> Result<Vec<SecurityAssociation>> {
        let mut sas = Vec::new();

        self.channel.dump(XfrmMessage::sa_dump(), &mut |record| {
            if let XfrmMessage::NewSa(msg) = record {
                sas.extend(SecurityAssociation::from_sa_message(&msg));
            }
            ControlFlow::Continue(())
        })?;

        Ok(sas)
    }

    /// Install a new policy. Fails if one with the same key already exists.
    pub fn add_sp(&mut self, sp: &SecurityPolicy) -> Result<()> {
        debug!("Adding policy: {}", sp);
        let message = XfrmMessage::NewPolicy(sp.to_policy_message());

        match self.channel.execute(message, CREATE_EXCLUSIVE)? {
            Reply::Ack => {
                info!("Added policy {}", sp);
                Ok(())
            }
            Reply::Error(err) => Err(Error::add_failed(format!("{}: {}", sp, err))),
        }
    }

    /// Look up a policy by direction and selector.
    pub fn get_sp(
        &mut self,
        direction: PolicyDirection,
        selector: &TrafficSelector,
    ) -> Result<SecurityPolicy> {
        let mut found = None;

        self.channel.dump(XfrmMessage::policy_dump(), &mut |record| {
            if let XfrmMessage::NewPolicy(msg) = record
                && let Some(sp) = SecurityPolicy::from_policy_message(&msg)
                && sp.direction == direction
                && sp.selector == *selector
            {
                found = Some(sp);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })?;

        found.ok_or_else(|| Error::not_found(format!("policy dir {} {}", direction, selector)))
    }

    /// Remove the policy with this direction and selector.
    pub fn del_sp(&mut self, direction: PolicyDirection, selector: &TrafficSelector) -> Result<()> {
        debug!("Deleting policy dir {} {}", direction, selector);
        let message = XfrmMessage::DelPolicy(UserPolicyId::new(direction, selector));

        match self.channel.execute(message, REQUEST_ACK)? {
            Reply::Ack => {
                info!("Deleted policy dir {} {}", direction, selector);
                Ok(())
            }
            Reply::Error(err) => Err(Error::delete_failed(format!(
                "policy dir {} {}: {}",
                direction, selector, err
            ))),
        }
    }

    /// Update a policy in place with a single kernel request.
    pub fn modify_sp(&mut self, sp: &SecurityPolicy) -> Result<()> {
        debug!("Updating policy: {}", sp);
        let message = XfrmMessage::UpdPolicy(sp.to_policy_message());

        match self.channel.execute(message, REQUEST_ACK)? {
            Reply::Ack => {
                info!("Updated policy {}", sp);
                Ok(())
            }
            Reply::Error(err) => Err(Error::modify_failed(format!("{}: {}", sp, err))),
        }
    }

    /// Every policy currently installed.
    pub fn list_sps(&mut self) -> Result<Vec<SecurityPolicy>> {
        let mut sps = Vec::new();

        self.channel.dump(XfrmMessage::policy_dump(), &mut |record| {
            if let XfrmMessage::NewPolicy(msg) = record {
                sps.extend(SecurityPolicy::from_policy_message(&msg));
            }
            ControlFlow::Continue(())
        })?;

        Ok(sps)
    }

    /// Access the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}
