//! Desired-state reconciliation.
//!
//! A [`Reconciler`] compares a [`DesiredState`] against what the kernel and
//! the IKE daemon currently hold and issues the adds, modifies and deletes
//! needed to converge. Only objects the reconciler installed itself are ever
//! removed; SAs negotiated by the IKE daemon are left alone.

use crate::state::DesiredState;
use common::{Error, ErrorKind, Result};
use std::time::Duration;
use tracing::{debug, info, warn};
use vici::{Credential, IkeClient, IkeConnection, StartAction, Transport, UnixTransport};
use xfrm::{
    Algorithm, KernelChannel, SecurityAssociation, SecurityPolicy, XfrmChannel, XfrmManager,
};

/// Timeouts forwarded to the IKE daemon.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub initiate: Duration,
    pub terminate: Duration,
}

/// One object the reconciler could not converge.
#[derive(Debug)]
pub struct Failure {
    pub item: String,
    pub error: Error,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub started: usize,
    pub failures: Vec<Failure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, item: impl ToString, error: Error) {
        let item = item.to_string();
        warn!(item = %item, kind = %error.kind(), "Reconciliation step failed: {}", error);
        self.failures.push(Failure { item, error });
    }
}

/// Drives the kernel and the IKE daemon towards a desired state.
pub struct Reconciler<C: XfrmChannel = KernelChannel, T: Transport = UnixTransport> {
    xfrm: XfrmManager<C>,
    ike: Option<IkeClient<T>>,
    timeouts: Timeouts,
    /// What the last pass installed, used to find removals
    applied: DesiredState,
    /// Load every connection and credential on the next pass
    reload_ike: bool,
}

impl<C: XfrmChannel, T: Transport> Reconciler<C, T> {
    pub fn new(xfrm: XfrmManager<C>, ike: Option<IkeClient<T>>, timeouts: Timeouts) -> Self {
        Self {
            xfrm,
            ike,
            timeouts,
            applied: DesiredState::default(),
            reload_ike: false,
        }
    }

    pub fn applied(&self) -> &DesiredState {
        &self.applied
    }

    pub fn ike_mut(&mut self) -> Option<&mut IkeClient<T>> {
        self.ike.as_mut()
    }

    /// Swap in a fresh IKE daemon connection. A new daemon connection may
    /// face a restarted daemon, so every connection and credential is
    /// loaded again on the next pass.
    pub fn set_ike_client(&mut self, client: IkeClient<T>) {
        self.ike = Some(client);
        self.reload_ike = true;
    }

    pub fn drop_ike_client(&mut self) {
        self.ike = None;
    }

    /// Run one pass. Kernel dump failures abort the pass; failures on
    /// individual objects are collected in the report.
    pub fn apply(&mut self, desired: &DesiredState) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut applied = DesiredState::default();

        self.sync_sas(desired, &mut report, &mut applied)?;
        self.sync_policies(desired, &mut report, &mut applied)?;
        self.sync_ike(desired, &mut report, &mut applied);

        self.applied = applied;
        info!(
            added = report.added,
            modified = report.modified,
            removed = report.removed,
            unchanged = report.unchanged,
            started = report.started,
            failed = report.failures.len(),
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    fn sync_sas(
        &mut self,
        desired: &DesiredState,
        report: &mut ReconcileReport,
        applied: &mut DesiredState,
    ) -> Result<()> {
        let existing = self.xfrm.list_sas()?;

        for sa in &desired.sas {
            let result = match existing.iter().find(|e| same_sa(e, sa)) {
                Some(current) if sa_settings_match(current, sa) => {
                    report.unchanged += 1;
                    Ok(())
                }
                Some(_) => self.xfrm.modify_sa(sa).map(|()| report.modified += 1),
                None => self.xfrm.add_sa(sa).map(|()| report.added += 1),
            };
            if let Err(e) = result {
                report.fail(sa, e);
            }
            applied.sas.push(sa.clone());
        }

        for old in &self.applied.sas {
            if desired.sas.iter().any(|sa| same_sa(sa, old))
                || !existing.iter().any(|e| same_sa(e, old))
            {
                continue;
            }
            match self.xfrm.del_sa(old) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    report.fail(old, e);
                    applied.sas.push(old.clone());
                }
            }
        }
        Ok(())
    }

    fn sync_policies(
        &mut self,
        desired: &DesiredState,
        report: &mut ReconcileReport,
        applied: &mut DesiredState,
    ) -> Result<()> {
        let existing = self.xfrm.list_sps()?;

        for sp in &desired.policies {
            let result = match existing.iter().find(|e| same_sp(e, sp)) {
                Some(current) if sp_settings_match(current, sp) => {
                    report.unchanged += 1;
                    Ok(())
                }
                Some(_) => self.xfrm.modify_sp(sp).map(|()| report.modified += 1),
                None => self.xfrm.add_sp(sp).map(|()| report.added += 1),
            };
            if let Err(e) = result {
                report.fail(sp, e);
            }
            applied.policies.push(sp.clone());
        }

        for old in &self.applied.policies {
            if desired.policies.iter().any(|sp| same_sp(sp, old))
                || !existing.iter().any(|e| same_sp(e, old))
            {
                continue;
            }
            match self.xfrm.del_sp(old.direction, &old.selector) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    report.fail(old, e);
                    applied.policies.push(old.clone());
                }
            }
        }
        Ok(())
    }

    fn sync_ike(
        &mut self,
        desired: &DesiredState,
        report: &mut ReconcileReport,
        applied: &mut DesiredState,
    ) {
        let reload = std::mem::take(&mut self.reload_ike);
        let Some(ike) = self.ike.as_mut() else {
            if !desired.connections.is_empty() || !desired.credentials.is_empty() {
                report.fail("IKE daemon", Error::not_ready("no control connection"));
            }
            applied.connections = self.applied.connections.clone();
            return;
        };

        for credential in &desired.credentials {
            if !reload && self.applied.credentials.contains(credential) {
                report.unchanged += 1;
                applied.credentials.push(credential.clone());
                continue;
            }
            match ike.load_credential(credential) {
                Ok(()) => {
                    report.added += 1;
                    applied.credentials.push(credential.clone());
                }
                Err(e) => report.fail(describe_credential(credential), e),
            }
        }

        for conn in &desired.connections {
            let previous = self.applied.connections.iter().find(|c| c.name == conn.name);
            match previous {
                Some(old) if !reload && old == conn => report.unchanged += 1,
                _ => match ike.create_connection(conn) {
                    Ok(()) if previous.is_some() => report.modified += 1,
                    Ok(()) => report.added += 1,
                    Err(e) => {
                        report.fail(format!("connection {}", conn.name), e);
                        applied.connections.extend(previous.cloned());
                        continue;
                    }
                },
            }
            applied.connections.push(conn.clone());

            if conn.start_action == StartAction::Start {
                keep_up(ike, conn, self.timeouts.initiate, report);
            }
        }

        for old in &self.applied.connections {
            if desired.connections.iter().any(|c| c.name == old.name) {
                continue;
            }
            if let Err(e) = ike.stop_connection(&old.name, self.timeouts.terminate) {
                debug!("Connection {} not terminated: {}", old.name, e);
            }
            match ike.delete_connection(&old.name) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    report.fail(format!("connection {}", old.name), e);
                    applied.connections.push(old.clone());
                }
            }
        }
    }
}

/// Initiate `conn` again when the daemon has no IKE SA for it.
fn keep_up<T: Transport>(
    ike: &mut IkeClient<T>,
    conn: &IkeConnection,
    timeout: Duration,
    report: &mut ReconcileReport,
) {
    match ike.get_connection_stats(&conn.name) {
        Ok(stats) => debug!(
            connection = %conn.name,
            state = ?stats.ike.state,
            established = stats.ike.established,
            bytes_in = stats.child.bytes_in,
            bytes_out = stats.child.bytes_out,
            "Connection up"
        ),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Connection {} is down, initiating", conn.name);
            match ike.start_connection(&conn.name, timeout) {
                Ok(()) => report.started += 1,
                Err(e) => report.fail(format!("connection {}", conn.name), e),
            }
        }
        Err(e) => warn!("Stats for connection {} unavailable: {}", conn.name, e),
    }
}

fn describe_credential(credential: &Credential) -> String {
    format!("{} secret for {}", credential.kind, credential.owners.join(","))
}

/// SA identity: the SPI, the same key `modify_sa` looks records up by.
fn same_sa(a: &SecurityAssociation, b: &SecurityAssociation) -> bool {
    a.spi == b.spi
}

fn sa_settings_match(current: &SecurityAssociation, desired: &SecurityAssociation) -> bool {
    current.src == desired.src
        && current.dst == desired.dst
        && current.protocol == desired.protocol
        && current.mode == desired.mode
        && current.reqid == desired.reqid
        && current.selector == desired.selector
        && same_algorithm(&current.encryption, &desired.encryption)
        && same_algorithm(&current.authentication, &desired.authentication)
}

// The kernel reports keys in lowercase hex.
fn same_algorithm(a: &Option<Algorithm>, b: &Option<Algorithm>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.name == b.name && a.key.eq_ignore_ascii_case(&b.key),
        _ => false,
    }
}

fn same_sp(a: &SecurityPolicy, b: &SecurityPolicy) -> bool {
    a.direction == b.direction && a.selector == b.selector
}

fn sp_settings_match(current: &SecurityPolicy, desired: &SecurityPolicy) -> bool {
    current.action == desired.action
        && current.priority == desired.priority
        && current.templates == desired.templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::ops::ControlFlow;
    use vici::{Request, RequestBuilder, parse_message};
    use xfrm::messages::UserPolicyId;
    use xfrm::{PolicyDirection, Reply, Template, TrafficSelector, XfrmMessage};

    /// Kernel double keeping SAs and policies as domain values.
    #[derive(Default)]
    struct MemoryKernel {
        sas: Vec<SecurityAssociation>,
        policies: Vec<SecurityPolicy>,
        requests: Vec<&'static str>,
        fail_next: VecDeque<&'static str>,
    }

    impl MemoryKernel {
        fn reject(&mut self, request: &'static str) -> bool {
            if self.fail_next.front() == Some(&request) {
                self.fail_next.pop_front();
                return true;
            }
            false
        }
    }

    impl XfrmChannel for MemoryKernel {
        fn execute(&mut self, message: XfrmMessage, _flags: u16) -> Result<Reply> {
            let request = match &message {
                XfrmMessage::NewSa(_) => "newsa",
                XfrmMessage::DelSa(_) => "delsa",
                XfrmMessage::NewPolicy(_) => "newpolicy",
                XfrmMessage::UpdPolicy(_) => "updpolicy",
                XfrmMessage::DelPolicy(_) => "delpolicy",
                _ => "other",
            };
            self.requests.push(request);
            if self.reject(request) {
                return Ok(Reply::Error(io::Error::from(io::ErrorKind::PermissionDenied)));
            }

            match message {
                XfrmMessage::NewSa(msg) => {
                    let sa = SecurityAssociation::from_sa_message(&msg).unwrap();
                    if self.sas.iter().any(|s| same_sa(s, &sa)) {
                        return Ok(Reply::Error(io::Error::from(io::ErrorKind::AlreadyExists)));
                    }
                    self.sas.push(sa);
                }
                XfrmMessage::DelSa(id) => self.sas.retain(|s| s.spi != id.spi),
                XfrmMessage::NewPolicy(msg) => {
                    self.policies
                        .push(SecurityPolicy::from_policy_message(&msg).unwrap());
                }
                XfrmMessage::UpdPolicy(msg) => {
                    let sp = SecurityPolicy::from_policy_message(&msg).unwrap();
                    self.policies.retain(|p| !same_sp(p, &sp));
                    self.policies.push(sp);
                }
                XfrmMessage::DelPolicy(id) => self
                    .policies
                    .retain(|p| UserPolicyId::new(p.direction, &p.selector) != id),
                other => panic!("unexpected request {:?}", other),
            }
            Ok(Reply::Ack)
        }

        fn dump(
            &mut self,
            request: XfrmMessage,
            visit: &mut dyn FnMut(XfrmMessage) -> ControlFlow<()>,
        ) -> Result<()> {
            let records: Vec<XfrmMessage> = match request {
                XfrmMessage::GetSa(_) => self
                    .sas
                    .iter()
                    .map(|sa| XfrmMessage::NewSa(sa.to_sa_message()))
                    .collect(),
                XfrmMessage::GetPolicy(_) => self
                    .policies
                    .iter()
                    .map(|sp| XfrmMessage::NewPolicy(sp.to_policy_message()))
                    .collect(),
                other => panic!("unexpected dump {:?}", other),
            };
            for record in records {
                if visit(record).is_break() {
                    break;
                }
            }
            Ok(())
        }
    }

    /// IKE daemon double answering every command with success.
    #[derive(Default)]
    struct FakeDaemon {
        commands: Vec<String>,
        /// Connections with an established IKE SA
        up: Vec<String>,
        fail_command: Option<&'static str>,
    }

    fn reply(success: bool) -> Vec<u8> {
        let mut b = RequestBuilder::begin("reply").unwrap();
        b.add_key_value("success", if success { "yes" } else { "no" })
            .unwrap();
        b.finish().unwrap().into_body().to_vec()
    }

    fn sa_event(name: &str) -> Vec<u8> {
        let mut b = RequestBuilder::begin("list-sa").unwrap();
        b.begin_section(name).unwrap();
        for (k, v) in [
            ("state", "ESTABLISHED"),
            ("established", "10"),
            ("rekey-time", "100"),
            ("initiator-spi", "01"),
            ("responder-spi", "02"),
        ] {
            b.add_key_value(k, v).unwrap();
        }
        b.begin_section("child-sas").unwrap().begin_section(name).unwrap();
        for (k, v) in [
            ("state", "INSTALLED"),
            ("life-time", "10"),
            ("rekey-time", "5"),
            ("bytes-in", "0"),
            ("bytes-out", "0"),
            ("packets-in", "0"),
            ("packets-out", "0"),
            ("spi-in", "c1"),
            ("spi-out", "c2"),
        ] {
            b.add_key_value(k, v).unwrap();
        }
        b.end_section().unwrap().end_section().unwrap().end_section().unwrap();
        b.finish().unwrap().into_body().to_vec()
    }

    impl Transport for FakeDaemon {
        fn request(&mut self, request: &Request) -> Result<Vec<u8>> {
            self.commands.push(request.command().to_string());
            Ok(reply(self.fail_command != Some(request.command())))
        }

        fn request_streamed(
            &mut self,
            request: &Request,
            _event: &str,
        ) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
            self.commands.push(request.command().to_string());
            let tree = parse_message(request.body())?;
            let name = tree.require_value("ike")?;
            let events = if self.up.iter().any(|c| c == name) {
                vec![sa_event(name)]
            } else {
                Vec::new()
            };
            Ok((Vec::new(), events))
        }

        fn register_event(&mut self, _event: &str) -> Result<()> {
            Ok(())
        }

        fn unregister_event(&mut self, _event: &str) -> Result<()> {
            Ok(())
        }
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            initiate: Duration::from_secs(1),
            terminate: Duration::from_secs(1),
        }
    }

    fn reconciler() -> Reconciler<MemoryKernel, FakeDaemon> {
        Reconciler::new(
            XfrmManager::with_channel(MemoryKernel::default()),
            Some(IkeClient::with_transport(FakeDaemon::default())),
            timeouts(),
        )
    }

    fn sa(spi: u32) -> SecurityAssociation {
        let mut sa = SecurityAssociation::new(spi, "10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap());
        sa.encryption = Some(Algorithm::new("cbc(aes)", "00112233445566778899aabbccddeeff"));
        sa
    }

    fn policy(priority: u32) -> SecurityPolicy {
        let selector = TrafficSelector {
            src: "10.1.0.0".parse().unwrap(),
            src_prefix_len: 24,
            dst: "10.2.0.0".parse().unwrap(),
            dst_prefix_len: 24,
            ..TrafficSelector::default()
        };
        SecurityPolicy {
            direction: PolicyDirection::Out,
            selector,
            action: Default::default(),
            priority,
            index: 0,
            templates: vec![Template {
                src: "10.0.0.1".parse().unwrap(),
                dst: "10.0.0.2".parse().unwrap(),
                protocol: xfrm::IpsecProtocol::Esp,
                mode: xfrm::Mode::Tunnel,
                reqid: 0,
                spi: 0,
            }],
            lifetime: Default::default(),
        }
    }

    fn connection(name: &str) -> IkeConnection {
        IkeConnection::new(
            name,
            vici::Proposal::new("aes128", "sha256", "modp2048"),
            vici::Proposal::new("aes128", "sha256", ""),
        )
    }

    fn kernel(r: &mut Reconciler<MemoryKernel, FakeDaemon>) -> &mut MemoryKernel {
        r.xfrm.channel_mut()
    }

    fn daemon(r: &mut Reconciler<MemoryKernel, FakeDaemon>) -> &mut FakeDaemon {
        r.ike_mut().unwrap().transport_mut()
    }

    #[test]
    fn test_initial_pass_installs_everything() {
        let mut r = reconciler();
        let desired = DesiredState {
            sas: vec![sa(0x1000), sa(0x1001)],
            policies: vec![policy(100)],
            connections: vec![connection("gw")],
            credentials: vec![Credential {
                kind: vici::SecretType::Ike,
                data: "secret".to_string(),
                owners: vec!["10.0.0.2".to_string()],
            }],
        };

        let report = r.apply(&desired).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.added, 5);
        assert_eq!(kernel(&mut r).sas.len(), 2);
        assert_eq!(kernel(&mut r).policies.len(), 1);
        assert_eq!(daemon(&mut r).commands, ["load-shared", "load-conn"]);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let mut r = reconciler();
        let desired = DesiredState {
            sas: vec![sa(0x1000)],
            policies: vec![policy(100)],
            connections: vec![connection("gw")],
            ..Default::default()
        };

        r.apply(&desired).unwrap();
        kernel(&mut r).requests.clear();
        daemon(&mut r).commands.clear();

        let report = r.apply(&desired).unwrap();
        assert_eq!(report.unchanged, 3);
        assert_eq!(report.added + report.modified + report.removed, 0);
        assert!(kernel(&mut r).requests.is_empty());
        assert!(daemon(&mut r).commands.is_empty());
    }

    #[test]
    fn test_changed_objects_are_modified() {
        let mut r = reconciler();
        r.apply(&DesiredState {
            sas: vec![sa(0x1000)],
            policies: vec![policy(100)],
            ..Default::default()
        })
        .unwrap();
        kernel(&mut r).requests.clear();

        let mut rekeyed = sa(0x1000);
        rekeyed.encryption = Some(Algorithm::new("cbc(aes)", "ffeeddccbbaa99887766554433221100"));
        let report = r
            .apply(&DesiredState {
                sas: vec![rekeyed.clone()],
                policies: vec![policy(200)],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(report.modified, 2);
        // SA modify is delete-then-add, policy modify a single update
        assert_eq!(kernel(&mut r).requests, ["delsa", "newsa", "updpolicy"]);
        assert_eq!(kernel(&mut r).sas[0].encryption, rekeyed.encryption);
        assert_eq!(kernel(&mut r).policies[0].priority, 200);
    }

    #[test]
    fn test_sa_moved_to_new_peer_is_replaced() {
        let mut r = reconciler();
        r.apply(&DesiredState {
            sas: vec![sa(0x55)],
            ..Default::default()
        })
        .unwrap();
        kernel(&mut r).requests.clear();

        let mut moved = sa(0x55);
        moved.dst = "10.0.0.3".parse().unwrap();
        moved.reqid = 9;
        let report = r
            .apply(&DesiredState {
                sas: vec![moved.clone()],
                ..Default::default()
            })
            .unwrap();

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.modified, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(kernel(&mut r).requests, ["delsa", "newsa"]);
        let sas = &kernel(&mut r).sas;
        assert_eq!(sas.len(), 1);
        assert_eq!((sas[0].dst, sas[0].reqid), (moved.dst, 9));
    }

    #[test]
    fn test_only_own_objects_are_removed() {
        let mut r = reconciler();
        // Negotiated by the IKE daemon, never part of the desired state
        kernel(&mut r).sas.push(sa(0x9999));

        r.apply(&DesiredState {
            sas: vec![sa(0x1000)],
            policies: vec![policy(100)],
            connections: vec![connection("gw")],
            ..Default::default()
        })
        .unwrap();

        let report = r.apply(&DesiredState::default()).unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(kernel(&mut r).sas.len(), 1);
        assert_eq!(kernel(&mut r).sas[0].spi, 0x9999);
        assert!(kernel(&mut r).policies.is_empty());
        assert!(daemon(&mut r).commands.ends_with(&["terminate".to_string(), "unload-conn".to_string()]));
        assert!(r.applied().sas.is_empty());
    }

    #[test]
    fn test_failed_removal_is_retried() {
        let mut r = reconciler();
        r.apply(&DesiredState {
            sas: vec![sa(0x1000)],
            ..Default::default()
        })
        .unwrap();

        kernel(&mut r).fail_next.push_back("delsa");
        let report = r.apply(&DesiredState::default()).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind(), ErrorKind::DeleteFailed);
        assert_eq!(r.applied().sas.len(), 1);

        let report = r.apply(&DesiredState::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.removed, 1);
        assert!(kernel(&mut r).sas.is_empty());
    }

    #[test]
    fn test_add_failure_is_reported() {
        let mut r = reconciler();
        kernel(&mut r).fail_next.push_back("newsa");

        let report = r
            .apply(&DesiredState {
                sas: vec![sa(0x1000), sa(0x1001)],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind(), ErrorKind::AddFailed);
    }

    #[test]
    fn test_down_connection_is_initiated() {
        let mut r = reconciler();
        let mut conn = connection("gw");
        conn.start_action = StartAction::Start;
        let desired = DesiredState {
            connections: vec![conn],
            ..Default::default()
        };

        let report = r.apply(&desired).unwrap();
        assert_eq!(report.started, 1);
        assert_eq!(daemon(&mut r).commands, ["load-conn", "list-sas", "initiate"]);

        daemon(&mut r).commands.clear();
        daemon(&mut r).up.push("gw".to_string());
        let report = r.apply(&desired).unwrap();
        assert_eq!(report.started, 0);
        assert_eq!(daemon(&mut r).commands, ["list-sas"]);
    }

    #[test]
    fn test_failed_load_conn_keeps_previous() {
        let mut r = reconciler();
        r.apply(&DesiredState {
            connections: vec![connection("gw")],
            ..Default::default()
        })
        .unwrap();

        let mut changed = connection("gw");
        changed.version = 1;
        daemon(&mut r).fail_command = Some("load-conn");
        let report = r
            .apply(&DesiredState {
                connections: vec![changed],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(report.failures[0].error.kind(), ErrorKind::AddFailed);
        assert_eq!(r.applied().connections, [connection("gw")]);
    }

    #[test]
    fn test_missing_ike_client_is_not_ready() {
        let mut r: Reconciler<MemoryKernel, FakeDaemon> = Reconciler::new(
            XfrmManager::with_channel(MemoryKernel::default()),
            None,
            timeouts(),
        );

        let report = r
            .apply(&DesiredState {
                sas: vec![sa(0x1000)],
                connections: vec![connection("gw")],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn test_new_ike_client_reloads_credentials() {
        let mut r = reconciler();
        let desired = DesiredState {
            credentials: vec![Credential {
                kind: vici::SecretType::Ike,
                data: "secret".to_string(),
                owners: Vec::new(),
            }],
            ..Default::default()
        };
        r.apply(&desired).unwrap();

        r.set_ike_client(IkeClient::with_transport(FakeDaemon::default()));
        let report = r.apply(&desired).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(daemon(&mut r).commands, ["load-shared"]);
    }
}
