//! ipsecd - switch-resident IPsec daemon
//!
//! Keeps the kernel's XFRM state and the IKE daemon's connections in line
//! with a declarative desired-state file.
//!
//! # Components
//!
//! - **Config**: YAML daemon settings with validation
//! - **DesiredState**: SAs, policies, IKE connections and secrets to install
//! - **Reconciler**: converges the kernel and the IKE daemon on a desired state
//! - **IpsecServer**: periodic resync loop with graceful shutdown

pub mod config;
pub mod reconcile;
pub mod server;
pub mod state;

pub use config::{Config, ConfigError};
pub use reconcile::{Failure, ReconcileReport, Reconciler, Timeouts};
pub use server::IpsecServer;
pub use state::DesiredState;
