//! IKE control client.
//!
//! [`IkeClient`] drives connection lifecycle commands on the IKE daemon and
//! extracts typed statistics from its `list-sas` event stream. Each call is
//! one synchronous exchange over the client's long-lived transport.

use crate::builder::{Request, RequestBuilder};
use crate::parser::{ParseStatus, TreeStreamParser, parse_message};
use crate::transport::{Transport, UnixTransport};
use crate::tree::Section;
use crate::types::{
    AuthMethod, ChildProtocol, ChildSaState, ChildSaStats, ConnectionStats, Credential,
    DaemonVersion, IkeConnection, IkePeer, IkeSaState, IkeSaStats, LIST_SA_EVENT,
};
use common::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client for the IKE daemon's control interface.
pub struct IkeClient<T: Transport = UnixTransport> {
    transport: T,
    parser: TreeStreamParser,
}

impl IkeClient<UnixTransport> {
    /// Connect to the daemon's control socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_transport(UnixTransport::connect(path)?))
    }
}

impl<T: Transport> IkeClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            parser: TreeStreamParser::new(),
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Submit a request. Transport failures surface as generic errors.
    fn submit(&mut self, request: &Request) -> Result<Section> {
        let body = self
            .transport
            .request(request)
            .map_err(|e| Error::other(format!("'{}' request failed: {}", request.command(), e)))?;
        parse_message(&body)
    }

    /// Submit a command whose response carries `success` and `errmsg`.
    fn submit_checked(
        &mut self,
        request: &Request,
        failure: fn(String) -> Error,
    ) -> Result<()> {
        let response = self.submit(request)?;
        if response.value_str("success") == Some("yes") {
            return Ok(());
        }

        let errmsg = response.value_str("errmsg").unwrap_or("no error message");
        Err(failure(format!("{}: {}", request.command(), errmsg)))
    }

    /// Query the daemon's identity.
    pub fn version(&mut self) -> Result<DaemonVersion> {
        let response = self.submit(&Request::empty("version")?)?;
        Ok(DaemonVersion {
            daemon: response.require_value("daemon")?.to_string(),
            version: response.require_value("version")?.to_string(),
            sysname: response.value_str("sysname").unwrap_or_default().to_string(),
            release: response.value_str("release").unwrap_or_default().to_string(),
            machine: response.value_str("machine").unwrap_or_default().to_string(),
        })
    }

    /// Load a connection definition with `load-conn`.
    pub fn create_connection(&mut self, conn: &IkeConnection) -> Result<()> {
        let request = connection_request(conn)?;
        self.submit_checked(&request, Error::AddFailed)?;
        info!("Loaded connection {}", conn.name);
        Ok(())
    }

    /// Bring up the child SA of connection `name`. `timeout` is forwarded to
    /// the daemon.
    pub fn start_connection(&mut self, name: &str, timeout: Duration) -> Result<()> {
        let mut builder = RequestBuilder::begin("initiate")?;
        builder
            .add_key_value("child", name)?
            .add_key_value("ike", name)?
            .add_key_value("timeout", timeout.as_millis().to_string())?;
        let request = builder.finish()?;

        self.submit_checked(&request, Error::StartFailed)?;
        info!("Initiated connection {}", name);
        Ok(())
    }

    /// Tear down the IKE SA of connection `name`.
    pub fn stop_connection(&mut self, name: &str, timeout: Duration) -> Result<()> {
        let mut builder = RequestBuilder::begin("terminate")?;
        builder
            .add_key_value("ike", name)?
            .add_key_value("timeout", timeout.as_millis().to_string())?;
        let request = builder.finish()?;

        self.submit_checked(&request, Error::StopFailed)?;
        info!("Terminated connection {}", name);
        Ok(())
    }

    /// Unload connection `name` with `unload-conn`.
    pub fn delete_connection(&mut self, name: &str) -> Result<()> {
        let mut builder = RequestBuilder::begin("unload-conn")?;
        builder.add_key_value("name", name)?;
        let request = builder.finish()?;

        self.submit_checked(&request, Error::DeleteFailed)?;
        info!("Unloaded connection {}", name);
        Ok(())
    }

    /// Load a shared secret with `load-shared`.
    pub fn load_credential(&mut self, credential: &Credential) -> Result<()> {
        let mut builder = RequestBuilder::begin("load-shared")?;
        builder
            .add_key_value("type", credential.kind.to_string())?
            .add_key_value("data", &credential.data)?
            .add_list("owners", &credential.owners)?;
        let request = builder.finish()?;

        self.submit_checked(&request, Error::AddFailed)?;
        debug!("Loaded {} secret for {:?}", credential.kind, credential.owners);
        Ok(())
    }

    /// Statistics of the IKE SA and child SA of connection `name`.
    pub fn get_connection_stats(&mut self, name: &str) -> Result<ConnectionStats> {
        let mut builder = RequestBuilder::begin("list-sas")?;
        builder.add_key_value("ike", name)?;
        let request = builder.finish()?;

        self.parser
            .register(&mut self.transport, LIST_SA_EVENT)
            .map_err(|e| Error::other(format!("register '{}': {}", LIST_SA_EVENT, e)))?;

        let query = self.transport.request_streamed(&request, LIST_SA_EVENT);
        if let Ok((_, events)) = &query {
            for event in events {
                self.parser.feed(event);
            }
        }

        if let Err(e) = self.parser.unregister(&mut self.transport) {
            warn!("Failed to unregister from '{}': {}", LIST_SA_EVENT, e);
        }

        query.map_err(|e| Error::other(format!("'list-sas' request failed: {}", e)))?;

        match self.parser.status() {
            ParseStatus::NotParsed => Err(Error::not_found(format!("no IKE SA for '{}'", name))),
            ParseStatus::ParseError => Err(Error::parse(format!(
                "malformed '{}' event for '{}'",
                LIST_SA_EVENT, name
            ))),
            ParseStatus::Ok => extract_stats(self.parser.tree(), name),
        }
    }
}

fn connection_request(conn: &IkeConnection) -> Result<Request> {
    for peer in [&conn.local, &conn.remote] {
        if peer.auth == AuthMethod::PubKey {
            return Err(Error::unsupported(format!(
                "public key authentication for connection '{}'",
                conn.name
            )));
        }
    }

    let mut builder = RequestBuilder::begin("load-conn")?;
    builder
        .begin_section(&conn.name)?
        .add_key_value("version", conn.version.to_string())?
        .add_list("local_addrs", &conn.local_addrs)?
        .add_list("remote_addrs", &conn.remote_addrs)?
        .add_list("proposals", [conn.proposal.to_string()])?;
    if let Some(rekey) = conn.rekey_time {
        builder.add_key_value("rekey_time", format!("{}s", rekey.as_secs()))?;
    }

    add_peer(&mut builder, "local", &conn.local)?;
    add_peer(&mut builder, "remote", &conn.remote)?;

    let (proposals_key, child_proposal) = match conn.protocol {
        ChildProtocol::Esp => ("esp_proposals", conn.child_proposal.to_string()),
        ChildProtocol::Ah => ("ah_proposals", conn.child_proposal.to_ah_string()),
    };
    builder
        .begin_section("children")?
        .begin_section(&conn.name)?
        .add_list("local_ts", ["dynamic"])?
        .add_list("remote_ts", ["dynamic"])?
        .add_key_value("mode", conn.mode.to_string())?
        .add_key_value("start_action", conn.start_action.to_string())?
        .add_list(proposals_key, [child_proposal])?;
    if let Some(rekey) = conn.child_rekey_time {
        builder.add_key_value("rekey_time", format!("{}s", rekey.as_secs()))?;
    }
    if let Some(life) = conn.child_life_time {
        builder.add_key_value("life_time", format!("{}s", life.as_secs()))?;
    }
    builder.end_section()?.end_section()?.end_section()?;

    builder.finish()
}

fn add_peer(builder: &mut RequestBuilder, key: &str, peer: &IkePeer) -> Result<()> {
    builder
        .begin_section(key)?
        .add_key_value("auth", peer.auth.to_string())?;
    if !peer.id.is_empty() {
        builder.add_key_value("id", &peer.id)?;
    }
    builder.end_section()?;
    Ok(())
}

fn parse_spi(section: &Section, key: &str) -> Result<u64> {
    let raw = section.require_value(key)?;
    u64::from_str_radix(raw, 16)
        .map_err(|e| Error::parse(format!("invalid SPI '{}' for '{}': {}", raw, key, e)))
}

fn parse_spi32(section: &Section, key: &str) -> Result<u32> {
    let value = parse_spi(section, key)?;
    u32::try_from(value)
        .map_err(|_| Error::parse(format!("SPI {:x} for '{}' exceeds 32 bits", value, key)))
}

/// Walk the fixed `list-sa` layout for connection `name`.
fn extract_stats(tree: &Section, name: &str) -> Result<ConnectionStats> {
    let ike = tree.require_section(name)?;
    let child = ike.require_section("child-sas")?.require_section(name)?;

    Ok(ConnectionStats {
        ike: IkeSaStats {
            state: IkeSaState::from_vici(ike.require_value("state")?),
            established: ike.parse_value("established")?,
            rekey_time: ike.parse_value("rekey-time")?,
            initiator_spi: parse_spi(ike, "initiator-spi")?,
            responder_spi: parse_spi(ike, "responder-spi")?,
        },
        child: ChildSaStats {
            state: ChildSaState::from_vici(child.require_value("state")?),
            life_time: child.parse_value("life-time")?,
            rekey_time: child.parse_value("rekey-time")?,
            bytes_in: child.parse_value("bytes-in")?,
            bytes_out: child.parse_value("bytes-out")?,
            packets_in: child.parse_value("packets-in")?,
            packets_out: child.parse_value("packets-out")?,
            spi_in: parse_spi32(child, "spi-in")?,
            spi_out: parse_spi32(child, "spi-out")?,
        },
    })
}
