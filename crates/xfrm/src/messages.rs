//! XFRM netlink message serialization and deserialization.
//!
//! Every fixed structure here mirrors the kernel ABI in
//! include/uapi/linux/xfrm.h byte for byte, including the implicit padding
//! the C compiler inserts. Host-order fields use native endianness; SPIs and
//! ports are carried in network byte order.

use crate::commands::*;
use crate::hex::{bytes_to_hex, decode_key};
use crate::types::{
    AddressFamily, Algorithm, IpsecProtocol, Lifetime, Mode, PolicyAction, PolicyDirection,
    SaStats, SecurityAssociation, SecurityPolicy, Template, TrafficSelector,
};
use netlink_packet_core::{DecodeError, NetlinkDeserializable, NetlinkHeader, NetlinkSerializable};
use netlink_packet_utils::nla::Nla;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::trace;

// Import Emitable from utils for attribute serialization
use netlink_packet_utils::Emitable as UtilsEmitable;

const NLA_HEADER_LEN: usize = 4;
const NLA_TYPE_MASK: u16 = 0x3fff;

fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes([buf[offset], buf[offset + 1]])
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

fn get_be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn get_be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn check_len(buf: &[u8], needed: usize, what: &'static str) -> Result<(), DecodeError> {
    if buf.len() < needed {
        trace!(needed, actual = buf.len(), "{}", what);
        return Err(DecodeError::from(what));
    }
    Ok(())
}

/// xfrm_address_t: 16 bytes holding either an IPv4 or an IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XfrmAddress(pub [u8; 16]);

impl XfrmAddress {
    pub const LEN: usize = 16;

    pub fn from_ip(addr: &IpAddr) -> Self {
        let mut bytes = [0u8; 16];
        match addr {
            IpAddr::V4(v4) => bytes[..4].copy_from_slice(&v4.octets()),
            IpAddr::V6(v6) => bytes.copy_from_slice(&v6.octets()),
        }
        Self(bytes)
    }

    /// Interpret the address for `family`; anything but AF_INET6 reads as IPv4.
    pub fn to_ip(&self, family: u16) -> IpAddr {
        if family == AF_INET6 {
            IpAddr::V6(Ipv6Addr::from(self.0))
        } else {
            IpAddr::V4(Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3]))
        }
    }

    fn emit(&self, buf: &mut [u8]) {
        buf[..Self::LEN].copy_from_slice(&self.0);
    }

    fn parse(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&buf[..Self::LEN]);
        Self(bytes)
    }
}

/// struct xfrm_selector (56 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserSelector {
    pub daddr: XfrmAddress,
    pub saddr: XfrmAddress,
    /// Network byte order on the wire
    pub dport: u16,
    pub dport_mask: u16,
    pub sport: u16,
    pub sport_mask: u16,
    pub family: u16,
    pub prefixlen_d: u8,
    pub prefixlen_s: u8,
    pub proto: u8,
    pub ifindex: i32,
    pub user: u32,
}

impl UserSelector {
    pub const LEN: usize = 56;

    fn emit(&self, buf: &mut [u8]) {
        self.daddr.emit(&mut buf[0..16]);
        self.saddr.emit(&mut buf[16..32]);
        buf[32..34].copy_from_slice(&self.dport.to_be_bytes());
        buf[34..36].copy_from_slice(&self.dport_mask.to_be_bytes());
        buf[36..38].copy_from_slice(&self.sport.to_be_bytes());
        buf[38..40].copy_from_slice(&self.sport_mask.to_be_bytes());
        put_u16(buf, 40, self.family);
        buf[42] = self.prefixlen_d;
        buf[43] = self.prefixlen_s;
        buf[44] = self.proto;
        buf[45..48].fill(0);
        buf[48..52].copy_from_slice(&self.ifindex.to_ne_bytes());
        put_u32(buf, 52, self.user);
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            daddr: XfrmAddress::parse(&buf[0..16]),
            saddr: XfrmAddress::parse(&buf[16..32]),
            dport: get_be16(buf, 32),
            dport_mask: get_be16(buf, 34),
            sport: get_be16(buf, 36),
            sport_mask: get_be16(buf, 38),
            family: get_u16(buf, 40),
            prefixlen_d: buf[42],
            prefixlen_s: buf[43],
            proto: buf[44],
            ifindex: get_u32(buf, 48) as i32,
            user: get_u32(buf, 52),
        }
    }
}

impl From<&TrafficSelector> for UserSelector {
    fn from(sel: &TrafficSelector) -> Self {
        let port_mask = |port: u16| if port != 0 { 0xffff } else { 0 };
        Self {
            daddr: XfrmAddress::from_ip(&sel.dst),
            saddr: XfrmAddress::from_ip(&sel.src),
            dport: sel.dst_port,
            dport_mask: port_mask(sel.dst_port),
            sport: sel.src_port,
            sport_mask: port_mask(sel.src_port),
            family: sel.family().number(),
            prefixlen_d: sel.dst_prefix_len,
            prefixlen_s: sel.src_prefix_len,
            proto: sel.proto,
            ifindex: sel.ifindex,
            user: 0,
        }
    }
}

impl From<&UserSelector> for TrafficSelector {
    fn from(sel: &UserSelector) -> Self {
        Self {
            src: sel.saddr.to_ip(sel.family),
            src_prefix_len: sel.prefixlen_s,
            dst: sel.daddr.to_ip(sel.family),
            dst_prefix_len: sel.prefixlen_d,
            src_port: sel.sport,
            dst_port: sel.dport,
            proto: sel.proto,
            ifindex: sel.ifindex,
        }
    }
}

/// struct xfrm_id (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserId {
    pub daddr: XfrmAddress,
    pub spi: u32,
    pub proto: u8,
}

impl UserId {
    pub const LEN: usize = 24;

    fn emit(&self, buf: &mut [u8]) {
        self.daddr.emit(&mut buf[0..16]);
        buf[16..20].copy_from_slice(&self.spi.to_be_bytes());
        buf[20] = self.proto;
        buf[21..24].fill(0);
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            daddr: XfrmAddress::parse(&buf[0..16]),
            spi: get_be32(buf, 16),
            proto: buf[20],
        }
    }
}

/// struct xfrm_lifetime_cfg (64 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifetimeCfg {
    pub soft_byte_limit: u64,
    pub hard_byte_limit: u64,
    pub soft_packet_limit: u64,
    pub hard_packet_limit: u64,
    pub soft_add_expires_seconds: u64,
    pub hard_add_expires_seconds: u64,
    pub soft_use_expires_seconds: u64,
    pub hard_use_expires_seconds: u64,
}

impl LifetimeCfg {
    pub const LEN: usize = 64;

    /// Unlimited byte/packet counters, no time-based expiry.
    pub fn unlimited() -> Self {
        Self {
            soft_byte_limit: XFRM_INF,
            hard_byte_limit: XFRM_INF,
            soft_packet_limit: XFRM_INF,
            hard_packet_limit: XFRM_INF,
            ..Default::default()
        }
    }

    fn emit(&self, buf: &mut [u8]) {
        let fields = [
            self.soft_byte_limit,
            self.hard_byte_limit,
            self.soft_packet_limit,
            self.hard_packet_limit,
            self.soft_add_expires_seconds,
            self.hard_add_expires_seconds,
            self.soft_use_expires_seconds,
            self.hard_use_expires_seconds,
        ];
        for (i, value) in fields.iter().enumerate() {
            put_u64(buf, i * 8, *value);
        }
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            soft_byte_limit: get_u64(buf, 0),
            hard_byte_limit: get_u64(buf, 8),
            soft_packet_limit: get_u64(buf, 16),
            hard_packet_limit: get_u64(buf, 24),
            soft_add_expires_seconds: get_u64(buf, 32),
            hard_add_expires_seconds: get_u64(buf, 40),
            soft_use_expires_seconds: get_u64(buf, 48),
            hard_use_expires_seconds: get_u64(buf, 56),
        }
    }
}

/// struct xfrm_lifetime_cur (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifetimeCur {
    pub bytes: u64,
    pub packets: u64,
    pub add_time: u64,
    pub use_time: u64,
}

impl LifetimeCur {
    pub const LEN: usize = 32;

    fn emit(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.bytes);
        put_u64(buf, 8, self.packets);
        put_u64(buf, 16, self.add_time);
        put_u64(buf, 24, self.use_time);
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            bytes: get_u64(buf, 0),
            packets: get_u64(buf, 8),
            add_time: get_u64(buf, 16),
            use_time: get_u64(buf, 24),
        }
    }
}

impl From<LifetimeCur> for Lifetime {
    fn from(cur: LifetimeCur) -> Self {
        Lifetime {
            bytes: cur.bytes,
            packets: cur.packets,
            add_time: cur.add_time,
            use_time: cur.use_time,
        }
    }
}

/// struct xfrm_usersa_info (224 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserSaInfo {
    pub sel: UserSelector,
    pub id: UserId,
    pub saddr: XfrmAddress,
    pub lft: LifetimeCfg,
    pub curlft: LifetimeCur,
    pub replay_window_stat: u32,
    pub replay: u32,
    pub integrity_failed: u32,
    pub seq: u32,
    pub reqid: u32,
    pub family: u16,
    pub mode: u8,
    pub replay_window: u8,
    pub flags: u8,
}

impl UserSaInfo {
    pub const LEN: usize = 224;

    fn emit(&self, buf: &mut [u8]) {
        buf[..Self::LEN].fill(0);
        self.sel.emit(&mut buf[0..56]);
        self.id.emit(&mut buf[56..80]);
        self.saddr.emit(&mut buf[80..96]);
        self.lft.emit(&mut buf[96..160]);
        self.curlft.emit(&mut buf[160..192]);
        put_u32(buf, 192, self.replay_window_stat);
        put_u32(buf, 196, self.replay);
        put_u32(buf, 200, self.integrity_failed);
        put_u32(buf, 204, self.seq);
        put_u32(buf, 208, self.reqid);
        put_u16(buf, 212, self.family);
        buf[214] = self.mode;
        buf[215] = self.replay_window;
        buf[216] = self.flags;
    }

    fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, Self::LEN, "xfrm_usersa_info truncated")?;
        Ok(Self {
            sel: UserSelector::parse(&buf[0..56]),
            id: UserId::parse(&buf[56..80]),
            saddr: XfrmAddress::parse(&buf[80..96]),
            lft: LifetimeCfg::parse(&buf[96..160]),
            curlft: LifetimeCur::parse(&buf[160..192]),
            replay_window_stat: get_u32(buf, 192),
            replay: get_u32(buf, 196),
            integrity_failed: get_u32(buf, 200),
            seq: get_u32(buf, 204),
            reqid: get_u32(buf, 208),
            family: get_u16(buf, 212),
            mode: buf[214],
            replay_window: buf[215],
            flags: buf[216],
        })
    }
}

/// struct xfrm_usersa_id (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserSaId {
    pub daddr: XfrmAddress,
    pub spi: u32,
    pub family: u16,
    pub proto: u8,
}

impl UserSaId {
    pub const LEN: usize = 24;

    fn emit(&self, buf: &mut [u8]) {
        buf[..Self::LEN].fill(0);
        self.daddr.emit(&mut buf[0..16]);
        buf[16..20].copy_from_slice(&self.spi.to_be_bytes());
        put_u16(buf, 20, self.family);
        buf[22] = self.proto;
    }

    fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, Self::LEN, "xfrm_usersa_id truncated")?;
        Ok(Self {
            daddr: XfrmAddress::parse(&buf[0..16]),
            spi: get_be32(buf, 16),
            family: get_u16(buf, 20),
            proto: buf[22],
        })
    }
}

/// struct xfrm_userpolicy_info (168 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserPolicyInfo {
    pub sel: UserSelector,
    pub lft: LifetimeCfg,
    pub curlft: LifetimeCur,
    pub priority: u32,
    pub index: u32,
    pub dir: u8,
    pub action: u8,
    pub flags: u8,
    pub share: u8,
}

impl UserPolicyInfo {
    pub const LEN: usize = 168;

    fn emit(&self, buf: &mut [u8]) {
        buf[..Self::LEN].fill(0);
        self.sel.emit(&mut buf[0..56]);
        self.lft.emit(&mut buf[56..120]);
        self.curlft.emit(&mut buf[120..152]);
        put_u32(buf, 152, self.priority);
        put_u32(buf, 156, self.index);
        buf[160] = self.dir;
        buf[161] = self.action;
        buf[162] = self.flags;
        buf[163] = self.share;
    }

    fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, Self::LEN, "xfrm_userpolicy_info truncated")?;
        Ok(Self {
            sel: UserSelector::parse(&buf[0..56]),
            lft: LifetimeCfg::parse(&buf[56..120]),
            curlft: LifetimeCur::parse(&buf[120..152]),
            priority: get_u32(buf, 152),
            index: get_u32(buf, 156),
            dir: buf[160],
            action: buf[161],
            flags: buf[162],
            share: buf[163],
        })
    }
}

/// struct xfrm_userpolicy_id (64 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserPolicyId {
    pub sel: UserSelector,
    pub index: u32,
    pub dir: u8,
}

impl UserPolicyId {
    pub const LEN: usize = 64;

    pub fn new(direction: PolicyDirection, selector: &TrafficSelector) -> Self {
        Self {
            sel: UserSelector::from(selector),
            index: 0,
            dir: direction.number(),
        }
    }

    fn emit(&self, buf: &mut [u8]) {
        buf[..Self::LEN].fill(0);
        self.sel.emit(&mut buf[0..56]);
        put_u32(buf, 56, self.index);
        buf[60] = self.dir;
    }

    fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, Self::LEN, "xfrm_userpolicy_id truncated")?;
        Ok(Self {
            sel: UserSelector::parse(&buf[0..56]),
            index: get_u32(buf, 56),
            dir: buf[60],
        })
    }
}

/// struct xfrm_user_tmpl (64 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserTemplate {
    pub id: UserId,
    pub family: u16,
    pub saddr: XfrmAddress,
    pub reqid: u32,
    pub mode: u8,
    pub share: u8,
    pub optional: u8,
    pub aalgos: u32,
    pub ealgos: u32,
    pub calgos: u32,
}

impl UserTemplate {
    pub const LEN: usize = 64;

    fn emit(&self, buf: &mut [u8]) {
        buf[..Self::LEN].fill(0);
        self.id.emit(&mut buf[0..24]);
        put_u16(buf, 24, self.family);
        self.saddr.emit(&mut buf[28..44]);
        put_u32(buf, 44, self.reqid);
        buf[48] = self.mode;
        buf[49] = self.share;
        buf[50] = self.optional;
        put_u32(buf, 52, self.aalgos);
        put_u32(buf, 56, self.ealgos);
        put_u32(buf, 60, self.calgos);
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            id: UserId::parse(&buf[0..24]),
            family: get_u16(buf, 24),
            saddr: XfrmAddress::parse(&buf[28..44]),
            reqid: get_u32(buf, 44),
            mode: buf[48],
            share: buf[49],
            optional: buf[50],
            aalgos: get_u32(buf, 52),
            ealgos: get_u32(buf, 56),
            calgos: get_u32(buf, 60),
        }
    }
}

impl From<&Template> for UserTemplate {
    fn from(tmpl: &Template) -> Self {
        Self {
            id: UserId {
                daddr: XfrmAddress::from_ip(&tmpl.dst),
                spi: tmpl.spi,
                proto: tmpl.protocol.number(),
            },
            family: tmpl.family().number(),
            saddr: XfrmAddress::from_ip(&tmpl.src),
            reqid: tmpl.reqid,
            mode: tmpl.mode.number(),
            share: 0,
            optional: 0,
            aalgos: ALGOS_ANY,
            ealgos: ALGOS_ANY,
            calgos: ALGOS_ANY,
        }
    }
}

impl From<&UserTemplate> for Template {
    fn from(tmpl: &UserTemplate) -> Self {
        Template {
            src: tmpl.saddr.to_ip(tmpl.family),
            dst: tmpl.id.daddr.to_ip(tmpl.family),
            protocol: IpsecProtocol::from_u8(tmpl.id.proto),
            mode: Mode::from_u8(tmpl.mode),
            reqid: tmpl.reqid,
            spi: tmpl.id.spi,
        }
    }
}

/// struct xfrm_algo: fixed-width name, key length in bits, raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmAlgo {
    pub name: String,
    pub key: Vec<u8>,
}

impl XfrmAlgo {
    const HEADER_LEN: usize = ALG_NAME_LEN + 4;

    fn value_len(&self) -> usize {
        Self::HEADER_LEN + self.key.len()
    }

    fn emit(&self, buf: &mut [u8]) {
        buf[..ALG_NAME_LEN].fill(0);
        // Keep the last byte as the NUL terminator.
        let name = self.name.as_bytes();
        let n = name.len().min(ALG_NAME_LEN - 1);
        buf[..n].copy_from_slice(&name[..n]);
        put_u32(buf, ALG_NAME_LEN, (self.key.len() * 8) as u32);
        buf[Self::HEADER_LEN..Self::HEADER_LEN + self.key.len()].copy_from_slice(&self.key);
    }

    fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, Self::HEADER_LEN, "xfrm_algo truncated")?;
        let name_field = &buf[..ALG_NAME_LEN];
        let name_end = name_field.iter().position(|b| *b == 0).unwrap_or(ALG_NAME_LEN);
        let name = String::from_utf8_lossy(&name_field[..name_end]).into_owned();

        let key_bits = get_u32(buf, ALG_NAME_LEN) as usize;
        let key_len = key_bits.div_ceil(8).min(buf.len() - Self::HEADER_LEN);
        let key = buf[Self::HEADER_LEN..Self::HEADER_LEN + key_len].to_vec();

        Ok(Self { name, key })
    }
}

impl From<&Algorithm> for XfrmAlgo {
    fn from(alg: &Algorithm) -> Self {
        Self {
            name: alg.name.clone(),
            key: decode_key(&alg.key),
        }
    }
}

impl From<&XfrmAlgo> for Algorithm {
    fn from(alg: &XfrmAlgo) -> Self {
        Algorithm {
            name: alg.name.clone(),
            key: bytes_to_hex(&alg.key),
        }
    }
}

/// XFRM netlink attributes carried after the fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XfrmAttr {
    AlgAuth(XfrmAlgo),
    AlgCrypt(XfrmAlgo),
    /// Contiguous array of templates in a single attribute
    Templates(Vec<UserTemplate>),
    Other(u16, Vec<u8>),
}

impl Nla for XfrmAttr {
    fn value_len(&self) -> usize {
        match self {
            Self::AlgAuth(alg) | Self::AlgCrypt(alg) => alg.value_len(),
            Self::Templates(tmpls) => tmpls.len() * UserTemplate::LEN,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::AlgAuth(_) => XfrmAttrKind::AlgAuth as u16,
            Self::AlgCrypt(_) => XfrmAttrKind::AlgCrypt as u16,
            Self::Templates(_) => XfrmAttrKind::Tmpl as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::AlgAuth(alg) | Self::AlgCrypt(alg) => alg.emit(buffer),
            Self::Templates(tmpls) => {
                for (i, tmpl) in tmpls.iter().enumerate() {
                    let offset = i * UserTemplate::LEN;
                    tmpl.emit(&mut buffer[offset..offset + UserTemplate::LEN]);
                }
            }
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

/// Attribute lookup table indexed by XFRMA_* type.
pub struct AttrTable<'a> {
    slots: [Option<&'a [u8]>; XFRMA_MAX + 1],
}

impl<'a> AttrTable<'a> {
    pub fn get(&self, kind: XfrmAttrKind) -> Option<&'a [u8]> {
        self.slots.get(kind as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walk a TLV attribute stream and index every recognised attribute by type.
///
/// Attribute types above [`XFRMA_MAX`] (and type 0) are skipped so newer
/// kernels stay readable. A malformed length ends the walk; whatever was
/// indexed before it is kept.
pub fn parse_attributes(payload: &[u8]) -> AttrTable<'_> {
    let mut slots = [None; XFRMA_MAX + 1];
    let mut offset = 0;

    while offset + NLA_HEADER_LEN <= payload.len() {
        let len = get_u16(payload, offset) as usize;
        let kind = (get_u16(payload, offset + 2) & NLA_TYPE_MASK) as usize;

        if len < NLA_HEADER_LEN || offset + len > payload.len() {
            trace!(offset, len, "Malformed attribute length, stopping walk");
            break;
        }

        if kind != 0 && kind <= XFRMA_MAX {
            slots[kind] = Some(&payload[offset + NLA_HEADER_LEN..offset + len]);
        } else {
            trace!(kind, "Skipping unknown attribute");
        }

        offset += nla_align(len);
    }

    AttrTable { slots }
}

fn decode_attrs(payload: &[u8]) -> Result<Vec<XfrmAttr>, DecodeError> {
    let table = parse_attributes(payload);
    let mut attrs = Vec::new();

    if let Some(value) = table.get(XfrmAttrKind::AlgCrypt) {
        attrs.push(XfrmAttr::AlgCrypt(XfrmAlgo::parse(value)?));
    }
    if let Some(value) = table.get(XfrmAttrKind::AlgAuth) {
        attrs.push(XfrmAttr::AlgAuth(XfrmAlgo::parse(value)?));
    }
    if let Some(value) = table.get(XfrmAttrKind::Tmpl) {
        let chunks = value.chunks_exact(UserTemplate::LEN);
        if !chunks.remainder().is_empty() {
            trace!(
                trailing = chunks.remainder().len(),
                "Ignoring partial template at end of attribute"
            );
        }
        let tmpls = chunks.map(UserTemplate::parse).collect();
        attrs.push(XfrmAttr::Templates(tmpls));
    }

    Ok(attrs)
}

fn attrs_len(attrs: &[XfrmAttr]) -> usize {
    attrs.iter().map(UtilsEmitable::buffer_len).sum()
}

fn emit_attrs(attrs: &[XfrmAttr], buffer: &mut [u8]) {
    let mut offset = 0;
    for attr in attrs {
        let len = UtilsEmitable::buffer_len(attr);
        UtilsEmitable::emit(attr, &mut buffer[offset..offset + len]);
        offset += len;
    }
}

/// An SA carried by NEWSA requests and dump replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaMessage {
    pub info: UserSaInfo,
    pub attrs: Vec<XfrmAttr>,
}

/// A policy carried by NEWPOLICY/UPDPOLICY requests and dump replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMessage {
    pub info: UserPolicyInfo,
    pub attrs: Vec<XfrmAttr>,
}

/// XFRM netlink message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XfrmMessage {
    NewSa(SaMessage),
    DelSa(UserSaId),
    /// Dump request; the header is all zeroes.
    GetSa(UserSaInfo),
    NewPolicy(PolicyMessage),
    UpdPolicy(PolicyMessage),
    DelPolicy(UserPolicyId),
    /// Dump request; the header is all zeroes.
    GetPolicy(UserPolicyId),
    Other(u16, Vec<u8>),
}

impl XfrmMessage {
    pub fn sa_dump() -> Self {
        XfrmMessage::GetSa(UserSaInfo::default())
    }

    pub fn policy_dump() -> Self {
        XfrmMessage::GetPolicy(UserPolicyId::default())
    }
}

impl NetlinkSerializable for XfrmMessage {
    fn message_type(&self) -> u16 {
        let cmd = match self {
            Self::NewSa(_) => XfrmCommand::NewSa,
            Self::DelSa(_) => XfrmCommand::DelSa,
            Self::GetSa(_) => XfrmCommand::GetSa,
            Self::NewPolicy(_) => XfrmCommand::NewPolicy,
            Self::UpdPolicy(_) => XfrmCommand::UpdPolicy,
            Self::DelPolicy(_) => XfrmCommand::DelPolicy,
            Self::GetPolicy(_) => XfrmCommand::GetPolicy,
            Self::Other(kind, _) => return *kind,
        };
        cmd.into()
    }

    fn buffer_len(&self) -> usize {
        match self {
            Self::NewSa(msg) => UserSaInfo::LEN + attrs_len(&msg.attrs),
            Self::DelSa(_) => UserSaId::LEN,
            Self::GetSa(_) => UserSaInfo::LEN,
            Self::NewPolicy(msg) | Self::UpdPolicy(msg) => {
                UserPolicyInfo::LEN + attrs_len(&msg.attrs)
            }
            Self::DelPolicy(_) | Self::GetPolicy(_) => UserPolicyId::LEN,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn serialize(&self, buffer: &mut [u8]) {
        match self {
            Self::NewSa(msg) => {
                msg.info.emit(buffer);
                emit_attrs(&msg.attrs, &mut buffer[UserSaInfo::LEN..]);
            }
            Self::DelSa(id) => id.emit(buffer),
            Self::GetSa(info) => info.emit(buffer),
            Self::NewPolicy(msg) | Self::UpdPolicy(msg) => {
                msg.info.emit(buffer);
                emit_attrs(&msg.attrs, &mut buffer[UserPolicyInfo::LEN..]);
            }
            Self::DelPolicy(id) | Self::GetPolicy(id) => id.emit(buffer),
            Self::Other(_, bytes) => buffer[..bytes.len()].copy_from_slice(bytes),
        }
    }
}

impl NetlinkDeserializable for XfrmMessage {
    type Error = DecodeError;

    fn deserialize(header: &NetlinkHeader, payload: &[u8]) -> Result<Self, Self::Error> {
        let Some(cmd) = XfrmCommand::from_u16(header.message_type) else {
            return Ok(Self::Other(header.message_type, payload.to_vec()));
        };

        Ok(match cmd {
            XfrmCommand::NewSa => Self::NewSa(SaMessage {
                info: UserSaInfo::parse(payload)?,
                attrs: decode_attrs(&payload[UserSaInfo::LEN..])?,
            }),
            XfrmCommand::DelSa => Self::DelSa(UserSaId::parse(payload)?),
            XfrmCommand::GetSa => Self::GetSa(UserSaInfo::parse(payload)?),
            XfrmCommand::NewPolicy | XfrmCommand::UpdPolicy => {
                let msg = PolicyMessage {
                    info: UserPolicyInfo::parse(payload)?,
                    attrs: decode_attrs(&payload[UserPolicyInfo::LEN..])?,
                };
                if cmd == XfrmCommand::NewPolicy {
                    Self::NewPolicy(msg)
                } else {
                    Self::UpdPolicy(msg)
                }
            }
            XfrmCommand::DelPolicy => Self::DelPolicy(UserPolicyId::parse(payload)?),
            XfrmCommand::GetPolicy => Self::GetPolicy(UserPolicyId::parse(payload)?),
            _ => Self::Other(header.message_type, payload.to_vec()),
        })
    }
}

// Helper functions for converting between high-level types and kernel records

impl SecurityAssociation {
    /// Build the NEWSA payload for this SA.
    pub fn to_sa_message(&self) -> SaMessage {
        let family = self.family().number();
        let info = UserSaInfo {
            sel: UserSelector::from(&self.selector),
            id: UserId {
                daddr: XfrmAddress::from_ip(&self.dst),
                spi: self.spi,
                proto: self.protocol.number(),
            },
            saddr: XfrmAddress::from_ip(&self.src),
            lft: LifetimeCfg::unlimited(),
            reqid: self.reqid,
            family,
            mode: self.mode.number(),
            replay_window: self.replay_window,
            flags: self.flags,
            ..Default::default()
        };

        let mut attrs = Vec::new();
        if let Some(alg) = &self.encryption {
            attrs.push(XfrmAttr::AlgCrypt(XfrmAlgo::from(alg)));
        }
        if let Some(alg) = &self.authentication {
            attrs.push(XfrmAttr::AlgAuth(XfrmAlgo::from(alg)));
        }

        SaMessage { info, attrs }
    }

    /// Key used to delete this SA.
    pub fn to_sa_id(&self) -> UserSaId {
        UserSaId {
            daddr: XfrmAddress::from_ip(&self.dst),
            spi: self.spi,
            family: self.family().number(),
            proto: self.protocol.number(),
        }
    }

    /// Rebuild an SA from a kernel record.
    ///
    /// Returns `None` when the record carries no usable address family.
    pub fn from_sa_message(msg: &SaMessage) -> Option<Self> {
        let info = &msg.info;
        AddressFamily::from_number(info.family)?;

        let mut encryption = None;
        let mut authentication = None;
        for attr in &msg.attrs {
            match attr {
                XfrmAttr::AlgCrypt(alg) => encryption = Some(Algorithm::from(alg)),
                XfrmAttr::AlgAuth(alg) => authentication = Some(Algorithm::from(alg)),
                _ => {}
            }
        }

        Some(SecurityAssociation {
            spi: info.id.spi,
            protocol: IpsecProtocol::from_u8(info.id.proto),
            src: info.saddr.to_ip(info.family),
            dst: info.id.daddr.to_ip(info.family),
            mode: Mode::from_u8(info.mode),
            reqid: info.reqid,
            flags: info.flags,
            replay_window: info.replay_window,
            selector: TrafficSelector::from(&info.sel),
            encryption,
            authentication,
            lifetime: info.curlft.into(),
            stats: SaStats {
                replay_window: info.replay_window_stat,
                replay: info.replay,
                integrity_failed: info.integrity_failed,
            },
        })
    }
}

impl SecurityPolicy {
    /// Build the NEWPOLICY/UPDPOLICY payload for this policy.
    pub fn to_policy_message(&self) -> PolicyMessage {
        let info = UserPolicyInfo {
            sel: UserSelector::from(&self.selector),
            lft: LifetimeCfg::unlimited(),
            curlft: LifetimeCur::default(),
            priority: self.priority,
            index: self.index,
            dir: self.direction.number(),
            action: self.action.number(),
            flags: 0,
            share: 0,
        };

        let mut attrs = Vec::new();
        if !self.templates.is_empty() {
            attrs.push(XfrmAttr::Templates(
                self.templates.iter().map(UserTemplate::from).collect(),
            ));
        }

        PolicyMessage { info, attrs }
    }

    /// Rebuild a policy from a kernel record.
    pub fn from_policy_message(msg: &PolicyMessage) -> Option<Self> {
        let info = &msg.info;
        let direction = PolicyDirection::from_u8(info.dir)?;

        let templates = msg
            .attrs
            .iter()
            .find_map(|attr| match attr {
                XfrmAttr::Templates(tmpls) => Some(tmpls.iter().map(Template::from).collect()),
                _ => None,
            })
            .unwrap_or_default();

        Some(SecurityPolicy {
            direction,
            selector: TrafficSelector::from(&info.sel),
            action: PolicyAction::from_u8(info.action),
            priority: info.priority,
            index: info.index,
            templates,
            lifetime: info.curlft.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Algorithm;

    fn header(cmd: XfrmCommand) -> NetlinkHeader {
        let mut header = NetlinkHeader::default();
        header.message_type = cmd.into();
        header
    }

    fn encode(msg: &XfrmMessage) -> Vec<u8> {
        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);
        buf
    }

    fn test_sa() -> SecurityAssociation {
        let mut sa = SecurityAssociation::new(
            0x1234,
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
        );
        sa.mode = Mode::Tunnel;
        sa.reqid = 7;
        sa.encryption = Some(Algorithm::new("aes", "11112222333344445555666677778888"));
        sa.authentication = Some(Algorithm::new("sha1", "11112222333344445555666677778888"));
        sa
    }

    #[test]
    fn test_struct_sizes_match_kernel_abi() {
        assert_eq!(UserSelector::LEN, 56);
        assert_eq!(UserSaInfo::LEN, 224);
        assert_eq!(UserSaId::LEN, 24);
        assert_eq!(UserPolicyInfo::LEN, 168);
        assert_eq!(UserPolicyId::LEN, 64);
        assert_eq!(UserTemplate::LEN, 64);
    }

    #[test]
    fn test_newsa_layout() {
        let msg = XfrmMessage::NewSa(test_sa().to_sa_message());
        let buf = encode(&msg);

        // 224-byte header, then two 4 + 68 + 16 byte algorithm attributes
        assert_eq!(buf.len(), 224 + 2 * 88);
        // SPI in network byte order inside xfrm_id
        assert_eq!(&buf[72..76], &[0x00, 0x00, 0x12, 0x34]);
        // ESP protocol
        assert_eq!(buf[76], IPPROTO_ESP);
        // family and tunnel mode
        assert_eq!(get_u16(&buf, 212), AF_INET);
        assert_eq!(buf[214], XFRM_MODE_TUNNEL);
        // unlimited hard byte limit
        assert_eq!(get_u64(&buf, 104), XFRM_INF);
        // first attribute: encryption
        assert_eq!(get_u16(&buf, 224), 88);
        assert_eq!(get_u16(&buf, 226), XfrmAttrKind::AlgCrypt as u16);
        assert_eq!(&buf[228..231], b"aes");
        assert_eq!(buf[231], 0);
        assert_eq!(get_u32(&buf, 228 + 64), 128);
    }

    #[test]
    fn test_sa_message_round_trip() {
        let sa = test_sa();
        let buf = encode(&XfrmMessage::NewSa(sa.to_sa_message()));

        let decoded = XfrmMessage::deserialize(&header(XfrmCommand::NewSa), &buf).unwrap();
        let XfrmMessage::NewSa(msg) = decoded else {
            panic!("expected NewSa, got {:?}", decoded);
        };
        let parsed = SecurityAssociation::from_sa_message(&msg).unwrap();

        assert_eq!(parsed.spi, 0x1234);
        assert_eq!(parsed.mode, Mode::Tunnel);
        assert_eq!(parsed.selector, sa.selector);
        assert_eq!(parsed.encryption, sa.encryption);
        assert_eq!(parsed.authentication, sa.authentication);
        assert_eq!(parsed, sa);
    }

    #[test]
    fn test_algorithm_name_truncated_to_field() {
        let alg = XfrmAlgo {
            name: "x".repeat(100),
            key: vec![1, 2],
        };
        let mut buf = vec![0xffu8; alg.value_len()];
        alg.emit(&mut buf);
        assert_eq!(buf[ALG_NAME_LEN - 1], 0);

        let parsed = XfrmAlgo::parse(&buf).unwrap();
        assert_eq!(parsed.name.len(), ALG_NAME_LEN - 1);
        assert_eq!(parsed.key, vec![1, 2]);
    }

    #[test]
    fn test_parse_attributes_skips_unknown_types() {
        let mut payload = Vec::new();
        // Unknown attribute type 200 with 4 bytes of data
        payload.extend_from_slice(&8u16.to_ne_bytes());
        payload.extend_from_slice(&200u16.to_ne_bytes());
        payload.extend_from_slice(&[1, 2, 3, 4]);
        // XFRMA_IF_ID
        payload.extend_from_slice(&8u16.to_ne_bytes());
        payload.extend_from_slice(&(XfrmAttrKind::IfId as u16).to_ne_bytes());
        payload.extend_from_slice(&42u32.to_ne_bytes());

        let table = parse_attributes(&payload);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(XfrmAttrKind::IfId), Some(&42u32.to_ne_bytes()[..]));
    }

    #[test]
    fn test_parse_attributes_stops_on_bad_length() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&8u16.to_ne_bytes());
        payload.extend_from_slice(&(XfrmAttrKind::Mark as u16).to_ne_bytes());
        payload.extend_from_slice(&[0; 4]);
        // Claims 200 bytes but only 4 remain
        payload.extend_from_slice(&200u16.to_ne_bytes());
        payload.extend_from_slice(&(XfrmAttrKind::IfId as u16).to_ne_bytes());

        let table = parse_attributes(&payload);
        assert!(table.get(XfrmAttrKind::Mark).is_some());
        assert!(table.get(XfrmAttrKind::IfId).is_none());
        assert!(parse_attributes(&[]).is_empty());
    }

    #[test]
    fn test_policy_templates_are_contiguous() {
        let src: IpAddr = "192.0.2.1".parse().unwrap();
        let dst: IpAddr = "192.0.2.2".parse().unwrap();
        let template = Template {
            src,
            dst,
            protocol: IpsecProtocol::Esp,
            mode: Mode::Tunnel,
            reqid: 1,
            spi: 0,
        };
        let policy = SecurityPolicy {
            direction: PolicyDirection::Out,
            selector: TrafficSelector::host_pair(src, dst),
            action: PolicyAction::Allow,
            priority: 100,
            index: 0,
            templates: vec![template, Template { reqid: 2, ..template }],
            lifetime: Lifetime::default(),
        };

        let buf = encode(&XfrmMessage::NewPolicy(policy.to_policy_message()));
        assert_eq!(buf.len(), 168 + 4 + 2 * 64);
        assert_eq!(get_u16(&buf, 168) as usize, 4 + 128);
        assert_eq!(get_u16(&buf, 170), XfrmAttrKind::Tmpl as u16);
        assert_eq!(buf[160], XFRM_POLICY_OUT);

        let decoded = XfrmMessage::deserialize(&header(XfrmCommand::NewPolicy), &buf).unwrap();
        let XfrmMessage::NewPolicy(msg) = decoded else {
            panic!("expected NewPolicy");
        };
        let parsed = SecurityPolicy::from_policy_message(&msg).unwrap();
        assert_eq!(parsed.templates.len(), 2);
        assert_eq!(parsed.templates[1].reqid, 2);
        assert_eq!(parsed, policy);
    }

    #[test]
    fn test_partial_trailing_template_ignored() {
        let data_len = UserTemplate::LEN + 10;
        let mut payload = Vec::new();
        payload.extend_from_slice(&((4 + data_len) as u16).to_ne_bytes());
        payload.extend_from_slice(&(XfrmAttrKind::Tmpl as u16).to_ne_bytes());
        payload.extend(vec![0u8; data_len]);
        // Pad to the 4-byte attribute boundary
        payload.extend([0u8; 2]);

        let attrs = decode_attrs(&payload).unwrap();
        assert_eq!(attrs.len(), 1);
        assert!(matches!(&attrs[0], XfrmAttr::Templates(tmpls) if tmpls.len() == 1));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let result = XfrmMessage::deserialize(&header(XfrmCommand::NewSa), &[0u8; 100]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_message_type_is_preserved() {
        let mut header = NetlinkHeader::default();
        header.message_type = 0x30;
        let msg = XfrmMessage::deserialize(&header, &[1, 2, 3]).unwrap();
        assert_eq!(msg, XfrmMessage::Other(0x30, vec![1, 2, 3]));
    }
}
