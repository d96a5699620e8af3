//! XFRM data types and structures.

use crate::commands::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family of an SA, policy or selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    pub fn number(&self) -> u16 {
        match self {
            AddressFamily::Inet => AF_INET,
            AddressFamily::Inet6 => AF_INET6,
        }
    }

    pub fn from_number(family: u16) -> Option<Self> {
        match family {
            AF_INET => Some(AddressFamily::Inet),
            AF_INET6 => Some(AddressFamily::Inet6),
            _ => None,
        }
    }

    /// The all-zeroes address of this family.
    pub fn unspecified(&self) -> IpAddr {
        match self {
            AddressFamily::Inet => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// IPsec protocol of an SA or template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpsecProtocol {
    /// Encapsulating Security Payload
    Esp,
    /// Authentication Header
    Ah,
    /// IP Payload Compression
    Comp,
    Other(u8),
}

impl IpsecProtocol {
    pub fn from_u8(value: u8) -> Self {
        match value {
            IPPROTO_ESP => IpsecProtocol::Esp,
            IPPROTO_AH => IpsecProtocol::Ah,
            IPPROTO_COMP => IpsecProtocol::Comp,
            other => IpsecProtocol::Other(other),
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            IpsecProtocol::Esp => IPPROTO_ESP,
            IpsecProtocol::Ah => IPPROTO_AH,
            IpsecProtocol::Comp => IPPROTO_COMP,
            IpsecProtocol::Other(n) => *n,
        }
    }
}

impl fmt::Display for IpsecProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpsecProtocol::Esp => write!(f, "esp"),
            IpsecProtocol::Ah => write!(f, "ah"),
            IpsecProtocol::Comp => write!(f, "comp"),
            IpsecProtocol::Other(n) => write!(f, "proto-{}", n),
        }
    }
}

/// Encapsulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Transport,
    Tunnel,
    Beet,
    Other(u8),
}

impl Mode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            XFRM_MODE_TRANSPORT => Mode::Transport,
            XFRM_MODE_TUNNEL => Mode::Tunnel,
            XFRM_MODE_BEET => Mode::Beet,
            other => Mode::Other(other),
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            Mode::Transport => XFRM_MODE_TRANSPORT,
            Mode::Tunnel => XFRM_MODE_TUNNEL,
            Mode::Beet => XFRM_MODE_BEET,
            Mode::Other(n) => *n,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Transport => write!(f, "transport"),
            Mode::Tunnel => write!(f, "tunnel"),
            Mode::Beet => write!(f, "beet"),
            Mode::Other(n) => write!(f, "mode-{}", n),
        }
    }
}

/// Direction a security policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDirection {
    In,
    Out,
    Forward,
}

impl PolicyDirection {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            XFRM_POLICY_IN => Some(PolicyDirection::In),
            XFRM_POLICY_OUT => Some(PolicyDirection::Out),
            XFRM_POLICY_FWD => Some(PolicyDirection::Forward),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            PolicyDirection::In => XFRM_POLICY_IN,
            PolicyDirection::Out => XFRM_POLICY_OUT,
            PolicyDirection::Forward => XFRM_POLICY_FWD,
        }
    }
}

impl fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyDirection::In => write!(f, "in"),
            PolicyDirection::Out => write!(f, "out"),
            PolicyDirection::Forward => write!(f, "fwd"),
        }
    }
}

/// What a matching policy does with traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    #[default]
    Allow,
    Block,
}

impl PolicyAction {
    pub fn from_u8(value: u8) -> Self {
        if value == XFRM_POLICY_BLOCK {
            PolicyAction::Block
        } else {
            PolicyAction::Allow
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            PolicyAction::Allow => XFRM_POLICY_ALLOW,
            PolicyAction::Block => XFRM_POLICY_BLOCK,
        }
    }
}

/// Traffic selector shared by SAs and policies.
///
/// A port of zero matches any port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrafficSelector {
    pub src: IpAddr,
    pub src_prefix_len: u8,
    pub dst: IpAddr,
    pub dst_prefix_len: u8,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_port: u16,
    /// IP protocol (0 = any)
    #[serde(default)]
    pub proto: u8,
    #[serde(default)]
    pub ifindex: i32,
}

impl TrafficSelector {
    /// Selector matching a single host pair.
    pub fn host_pair(src: IpAddr, dst: IpAddr) -> Self {
        let prefix = match src {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        Self {
            src,
            src_prefix_len: prefix,
            dst,
            dst_prefix_len: prefix,
            src_port: 0,
            dst_port: 0,
            proto: 0,
            ifindex: 0,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.dst)
    }
}

impl Default for TrafficSelector {
    fn default() -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            src: any,
            src_prefix_len: 0,
            dst: any,
            dst_prefix_len: 0,
            src_port: 0,
            dst_port: 0,
            proto: 0,
            ifindex: 0,
        }
    }
}

impl fmt::Display for TrafficSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}/{}",
            self.src, self.src_prefix_len, self.dst, self.dst_prefix_len
        )?;
        if self.proto != 0 {
            write!(f, " proto {}", self.proto)?;
        }
        if self.src_port != 0 {
            write!(f, " sport {}", self.src_port)?;
        }
        if self.dst_port != 0 {
            write!(f, " dport {}", self.dst_port)?;
        }
        Ok(())
    }
}

/// An encryption or authentication algorithm with its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithm {
    /// Kernel crypto API name, e.g. "cbc(aes)" or "hmac(sha1)"
    pub name: String,
    /// Key material as an even-length lowercase hex string
    pub key: String,
}

impl Algorithm {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// Current lifetime counters of an SA or policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Lifetime {
    pub bytes: u64,
    pub packets: u64,
    pub add_time: u64,
    pub use_time: u64,
}

/// Failure counters of an SA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaStats {
    pub replay_window: u32,
    pub replay: u32,
    pub integrity_failed: u32,
}

/// A kernel security association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssociation {
    pub spi: u32,
    pub protocol: IpsecProtocol,
    pub src: IpAddr,
    pub dst: IpAddr,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub reqid: u32,
    #[serde(default)]
    pub flags: u8,
    #[serde(default)]
    pub replay_window: u8,
    #[serde(default)]
    pub selector: TrafficSelector,
    #[serde(default)]
    pub encryption: Option<Algorithm>,
    #[serde(default)]
    pub authentication: Option<Algorithm>,
    #[serde(default, skip_serializing)]
    pub lifetime: Lifetime,
    #[serde(default, skip_serializing)]
    pub stats: SaStats,
}

impl SecurityAssociation {
    /// Create an ESP SA between two hosts with a host-pair selector.
    pub fn new(spi: u32, src: IpAddr, dst: IpAddr) -> Self {
        Self {
            spi,
            protocol: IpsecProtocol::Esp,
            src,
            dst,
            mode: Mode::Transport,
            reqid: 0,
            flags: 0,
            replay_window: 0,
            selector: TrafficSelector::host_pair(src, dst),
            encryption: None,
            authentication: None,
            lifetime: Lifetime::default(),
            stats: SaStats::default(),
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.dst)
    }
}

impl fmt::Display for SecurityAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} spi 0x{:08x} {}",
            self.protocol, self.src, self.dst, self.spi, self.mode
        )
    }
}

/// An IPsec template attached to a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Tunnel source (ignored by the kernel in transport mode)
    pub src: IpAddr,
    /// Tunnel destination
    pub dst: IpAddr,
    pub protocol: IpsecProtocol,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub reqid: u32,
    /// SPI to match, 0 for any
    #[serde(default)]
    pub spi: u32,
}

impl Template {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.dst)
    }
}

/// A kernel security policy, keyed by (direction, selector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub direction: PolicyDirection,
    pub selector: TrafficSelector,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub index: u32,
    pub templates: Vec<Template>,
    #[serde(default, skip_serializing)]
    pub lifetime: Lifetime,
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dir {} {} priority {}",
            self.direction, self.selector, self.priority
        )
    }
}
