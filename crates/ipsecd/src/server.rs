//! Main daemon loop.

use crate::config::Config;
use crate::reconcile::{Reconciler, Timeouts};
use crate::state::DesiredState;
use common::Result;
use tokio::task;
use tracing::{info, warn};
use vici::IkeClient;
use xfrm::{KernelChannel, XfrmManager};

/// IPsec daemon: periodically reconciles the desired-state file into the
/// kernel and the IKE daemon until shut down.
pub struct IpsecServer {
    config: Config,
}

impl IpsecServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        info!("Starting IPsec daemon");

        let xfrm = XfrmManager::with_channel(KernelChannel::new(self.config.xfrm.recv_buffer_size));
        let timeouts = Timeouts {
            initiate: self.config.vici.initiate_timeout,
            terminate: self.config.vici.terminate_timeout,
        };
        let mut reconciler: Reconciler = Reconciler::new(xfrm, None, timeouts);

        let mut ticker = tokio::time::interval(self.config.state.resync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    reconciler = self.resync(reconciler).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        info!("IPsec daemon stopped");
        Ok(())
    }

    /// One resync: reconnect to the IKE daemon if needed, reload the state
    /// file and apply it. The engines block, so the pass runs off the
    /// async workers.
    async fn resync(&self, mut reconciler: Reconciler) -> Result<Reconciler> {
        let socket_path = self.config.vici.socket_path.clone();
        let state_path = self.config.state.path.clone();

        let joined = task::spawn_blocking(move || {
            ensure_ike_client(&mut reconciler, &socket_path);

            match DesiredState::load_from_file(&state_path) {
                Ok(desired) => match reconciler.apply(&desired) {
                    Ok(report) if !report.is_clean() => {
                        warn!("{} object(s) not converged", report.failures.len());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(kind = %e.kind(), "Reconciliation aborted: {}", e),
                },
                Err(e) => warn!("Keeping current state: {}", e),
            }
            reconciler
        })
        .await;

        joined.map_err(|e| common::Error::other(format!("reconciliation task failed: {}", e)))
    }
}

/// Connect to the IKE daemon when there is no live connection. The
/// `version` command doubles as a readiness probe.
fn ensure_ike_client(reconciler: &mut Reconciler, socket_path: &str) {
    if let Some(client) = reconciler.ike_mut() {
        if client.transport_mut().is_connected() {
            return;
        }
        warn!("Lost connection to IKE daemon at {}", socket_path);
        reconciler.drop_ike_client();
    }

    let mut client = match IkeClient::connect(socket_path) {
        Ok(client) => client,
        Err(e) => {
            warn!("IKE daemon not reachable: {}", e);
            return;
        }
    };

    match client.version() {
        Ok(version) => {
            info!("Connected to {}", version);
            reconciler.set_ike_client(client);
        }
        Err(e) => warn!("IKE daemon at {} not ready: {}", socket_path, e),
    }
}
