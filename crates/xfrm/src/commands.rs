//! XFRM netlink message types, flags and attribute definitions.
//!
//! Based on Linux kernel's include/uapi/linux/xfrm.h

/// XFRM netlink message types
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum XfrmCommand {
    /// Add a new security association
    NewSa = 0x10,
    /// Delete a security association
    DelSa = 0x11,
    /// Get (or dump) security associations
    GetSa = 0x12,
    /// Add a new security policy
    NewPolicy = 0x13,
    /// Delete a security policy
    DelPolicy = 0x14,
    /// Get (or dump) security policies
    GetPolicy = 0x15,
    /// Allocate an SPI
    AllocSpi = 0x16,
    /// Key manager acquire notification
    Acquire = 0x17,
    /// SA expiry notification
    Expire = 0x18,
    /// Update (or create) a security policy in place
    UpdPolicy = 0x19,
    /// Update a security association in place
    UpdSa = 0x1a,
    /// Policy expiry notification
    PolExpire = 0x1b,
    /// Flush security associations
    FlushSa = 0x1c,
    /// Flush security policies
    FlushPolicy = 0x1d,
}

impl XfrmCommand {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x10 => Self::NewSa,
            0x11 => Self::DelSa,
            0x12 => Self::GetSa,
            0x13 => Self::NewPolicy,
            0x14 => Self::DelPolicy,
            0x15 => Self::GetPolicy,
            0x16 => Self::AllocSpi,
            0x17 => Self::Acquire,
            0x18 => Self::Expire,
            0x19 => Self::UpdPolicy,
            0x1a => Self::UpdSa,
            0x1b => Self::PolExpire,
            0x1c => Self::FlushSa,
            0x1d => Self::FlushPolicy,
            _ => return None,
        })
    }
}

impl From<XfrmCommand> for u16 {
    fn from(cmd: XfrmCommand) -> u16 {
        cmd as u16
    }
}

/// XFRM netlink attributes (XFRMA_*)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum XfrmAttrKind {
    Unspec = 0,
    /// Authentication algorithm (struct xfrm_algo)
    AlgAuth = 1,
    /// Encryption algorithm (struct xfrm_algo)
    AlgCrypt = 2,
    /// Compression algorithm (struct xfrm_algo)
    AlgComp = 3,
    /// NAT-T encapsulation (struct xfrm_encap_tmpl)
    Encap = 4,
    /// Policy templates (array of struct xfrm_user_tmpl)
    Tmpl = 5,
    Sa = 6,
    Policy = 7,
    SecCtx = 8,
    LtimeVal = 9,
    ReplayVal = 10,
    ReplayThresh = 11,
    EtimerThresh = 12,
    /// Source address for delete/get by SA id
    SrcAddr = 13,
    CoAddr = 14,
    LastUsed = 15,
    PolicyType = 16,
    Migrate = 17,
    AlgAead = 18,
    KmAddress = 19,
    AlgAuthTrunc = 20,
    Mark = 21,
    TfcPad = 22,
    ReplayEsnVal = 23,
    SaExtraFlags = 24,
    Proto = 25,
    AddressFilter = 26,
    Pad = 27,
    OffloadDev = 28,
    SetMark = 29,
    SetMarkMask = 30,
    /// XFRM interface id
    IfId = 31,
}

/// Highest attribute type this codec knows about; anything above is skipped.
pub const XFRMA_MAX: usize = XfrmAttrKind::IfId as usize;

/// Netlink request flags
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_DUMP: u16 = 0x300;

/// Flags for a create request that must fail on duplicates.
pub const CREATE_EXCLUSIVE: u16 = NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL;

/// Flags for a plain acknowledged request.
pub const REQUEST_ACK: u16 = NLM_F_REQUEST | NLM_F_ACK;

/// Flags for a dump request.
pub const REQUEST_DUMP: u16 = NLM_F_REQUEST | NLM_F_DUMP;

/// Lifetime value meaning "no limit" (XFRM_INF)
pub const XFRM_INF: u64 = u64::MAX;

/// Size of the fixed algorithm name field (CRYPTO_MAX_ALG_NAME)
pub const ALG_NAME_LEN: usize = 64;

/// Largest key accepted for an algorithm attribute, in bytes
pub const MAX_KEY_BYTES: usize = 128;

/// Wildcard algorithm mask used in policy templates
pub const ALGOS_ANY: u32 = u32::MAX;

/// Address families
pub const AF_UNSPEC: u16 = 0;
pub const AF_INET: u16 = libc::AF_INET as u16;
pub const AF_INET6: u16 = libc::AF_INET6 as u16;

/// IPsec protocol numbers
pub const IPPROTO_ESP: u8 = 50;
pub const IPPROTO_AH: u8 = 51;
pub const IPPROTO_COMP: u8 = 108;

/// SA modes
pub const XFRM_MODE_TRANSPORT: u8 = 0;
pub const XFRM_MODE_TUNNEL: u8 = 1;
pub const XFRM_MODE_BEET: u8 = 4;

/// Policy directions
pub const XFRM_POLICY_IN: u8 = 0;
pub const XFRM_POLICY_OUT: u8 = 1;
pub const XFRM_POLICY_FWD: u8 = 2;

/// Policy actions
pub const XFRM_POLICY_ALLOW: u8 = 0;
pub const XFRM_POLICY_BLOCK: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values_match_kernel() {
        assert_eq!(u16::from(XfrmCommand::NewSa), 16);
        assert_eq!(u16::from(XfrmCommand::UpdPolicy), 25);
        assert_eq!(XfrmCommand::from_u16(0x12), Some(XfrmCommand::GetSa));
        assert_eq!(XfrmCommand::from_u16(0x99), None);
    }

    #[test]
    fn test_dump_flags() {
        assert_eq!(REQUEST_DUMP, 0x301);
        assert_eq!(CREATE_EXCLUSIVE, 0x605);
    }
}
