//! IKE connection, credential and statistics types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Event the daemon streams one IKE SA per packet on for `list-sas`
pub const LIST_SA_EVENT: &str = "list-sa";

/// Peer authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Psk,
    PubKey,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Psk => write!(f, "psk"),
            AuthMethod::PubKey => write!(f, "pubkey"),
        }
    }
}

/// One side of an IKE connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IkePeer {
    #[serde(default)]
    pub auth: AuthMethod,
    /// IKE identity; empty lets the daemon pick one
    #[serde(default)]
    pub id: String,
}

impl IkePeer {
    pub fn new(auth: AuthMethod, id: impl Into<String>) -> Self {
        Self {
            auth,
            id: id.into(),
        }
    }
}

/// Cipher suite of an IKE or child SA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub encryption: String,
    pub integrity: String,
    /// Diffie-Hellman group; empty to omit it
    #[serde(default)]
    pub dh_group: String,
}

impl Proposal {
    pub fn new(
        encryption: impl Into<String>,
        integrity: impl Into<String>,
        dh_group: impl Into<String>,
    ) -> Self {
        Self {
            encryption: encryption.into(),
            integrity: integrity.into(),
            dh_group: dh_group.into(),
        }
    }

    /// `integrity[-group]`: AH authenticates only, so the cipher is dropped.
    pub fn to_ah_string(&self) -> String {
        if self.dh_group.is_empty() {
            self.integrity.clone()
        } else {
            format!("{}-{}", self.integrity, self.dh_group)
        }
    }
}

/// Rendered as `cipher-integrity-group`, the daemon's proposal syntax.
impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.encryption, self.integrity)?;
        if !self.dh_group.is_empty() {
            write!(f, "-{}", self.dh_group)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildProtocol {
    #[default]
    Esp,
    Ah,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildMode {
    #[default]
    Tunnel,
    Transport,
}

impl fmt::Display for ChildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildMode::Tunnel => write!(f, "tunnel"),
            ChildMode::Transport => write!(f, "transport"),
        }
    }
}

/// What the daemon does with a child SA once its connection is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAction {
    #[default]
    None,
    Trap,
    Start,
}

impl fmt::Display for StartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAction::None => write!(f, "none"),
            StartAction::Trap => write!(f, "trap"),
            StartAction::Start => write!(f, "start"),
        }
    }
}

/// An IKE connection with a single child SA of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IkeConnection {
    pub name: String,
    /// IKE major version; 0 accepts both
    #[serde(default = "default_ike_version")]
    pub version: u8,
    pub local_addrs: Vec<String>,
    pub remote_addrs: Vec<String>,
    #[serde(default)]
    pub local: IkePeer,
    #[serde(default)]
    pub remote: IkePeer,
    pub proposal: Proposal,
    pub child_proposal: Proposal,
    #[serde(default)]
    pub protocol: ChildProtocol,
    #[serde(default)]
    pub mode: ChildMode,
    #[serde(default)]
    pub start_action: StartAction,
    /// IKE SA rekey interval
    #[serde(default, with = "humantime_serde")]
    pub rekey_time: Option<Duration>,
    /// Child SA rekey interval
    #[serde(default, with = "humantime_serde")]
    pub child_rekey_time: Option<Duration>,
    /// Child SA hard lifetime
    #[serde(default, with = "humantime_serde")]
    pub child_life_time: Option<Duration>,
}

fn default_ike_version() -> u8 {
    2
}

impl IkeConnection {
    pub fn new(name: impl Into<String>, proposal: Proposal, child_proposal: Proposal) -> Self {
        Self {
            name: name.into(),
            version: default_ike_version(),
            local_addrs: Vec::new(),
            remote_addrs: Vec::new(),
            local: IkePeer::default(),
            remote: IkePeer::default(),
            proposal,
            child_proposal,
            protocol: ChildProtocol::Esp,
            mode: ChildMode::Tunnel,
            start_action: StartAction::None,
            rekey_time: None,
            child_rekey_time: None,
            child_life_time: None,
        }
    }

    pub fn set_local_id(&mut self, id: impl Into<String>) {
        self.local.id = id.into();
    }

    pub fn set_remote_id(&mut self, id: impl Into<String>) {
        self.remote.id = id.into();
    }
}

/// Shared secret types understood by `load-shared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
    #[default]
    Ike,
    Eap,
    Xauth,
    Ntlm,
    Ppk,
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretType::Ike => write!(f, "IKE"),
            SecretType::Eap => write!(f, "EAP"),
            SecretType::Xauth => write!(f, "XAUTH"),
            SecretType::Ntlm => write!(f, "NTLM"),
            SecretType::Ppk => write!(f, "PPK"),
        }
    }
}

/// A shared secret and the identities it applies to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, rename = "type")]
    pub kind: SecretType,
    pub data: String,
    #[serde(default)]
    pub owners: Vec<String>,
}

// Keep secrets out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("data", &"<redacted>")
            .field("owners", &self.owners)
            .finish()
    }
}

/// IKE SA state as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IkeSaState {
    Created,
    Connecting,
    Established,
    Passive,
    Rekeying,
    Rekeyed,
    Deleting,
    Destroying,
    Unknown,
}

impl IkeSaState {
    pub fn from_vici(value: &str) -> Self {
        match value {
            "CREATED" => Self::Created,
            "CONNECTING" => Self::Connecting,
            "ESTABLISHED" => Self::Established,
            "PASSIVE" => Self::Passive,
            "REKEYING" => Self::Rekeying,
            "REKEYED" => Self::Rekeyed,
            "DELETING" => Self::Deleting,
            "DESTROYING" => Self::Destroying,
            _ => Self::Unknown,
        }
    }
}

/// Child SA state as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChildSaState {
    Created,
    Routed,
    Installing,
    Installed,
    Updating,
    Rekeying,
    Rekeyed,
    Retrying,
    Deleting,
    Deleted,
    Destroying,
    Unknown,
}

impl ChildSaState {
    pub fn from_vici(value: &str) -> Self {
        match value {
            "CREATED" => Self::Created,
            "ROUTED" => Self::Routed,
            "INSTALLING" => Self::Installing,
            "INSTALLED" => Self::Installed,
            "UPDATING" => Self::Updating,
            "REKEYING" => Self::Rekeying,
            "REKEYED" => Self::Rekeyed,
            "RETRYING" => Self::Retrying,
            "DELETING" => Self::Deleting,
            "DELETED" => Self::Deleted,
            "DESTROYING" => Self::Destroying,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IkeSaStats {
    pub state: IkeSaState,
    /// Seconds since the SA was established
    pub established: u64,
    /// Seconds until the next rekey
    pub rekey_time: u64,
    pub initiator_spi: u64,
    pub responder_spi: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildSaStats {
    pub state: ChildSaState,
    /// Seconds until the SA expires
    pub life_time: u64,
    /// Seconds until the next rekey
    pub rekey_time: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    pub spi_in: u32,
    pub spi_out: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub ike: IkeSaStats,
    pub child: ChildSaStats,
}

/// Daemon identification returned by the `version` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonVersion {
    pub daemon: String,
    pub version: String,
    pub sysname: String,
    pub release: String,
    pub machine: String,
}

impl fmt::Display for DaemonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} {}, {})",
            self.daemon, self.version, self.sysname, self.release, self.machine
        )
    }
}
