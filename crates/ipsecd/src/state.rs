//! Desired IPsec state as handed over by the configuration store.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use vici::{Credential, IkeConnection};
use xfrm::{SecurityAssociation, SecurityPolicy};

/// Everything the daemon should have installed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub sas: Vec<SecurityAssociation>,
    #[serde(default)]
    pub policies: Vec<SecurityPolicy>,
    #[serde(default)]
    pub connections: Vec<IkeConnection>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl DesiredState {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let state: DesiredState = serde_yaml::from_str(contents)
            .map_err(|e| Error::config(format!("invalid desired state: {}", e)))?;
        state.validate()?;
        Ok(state)
    }

    /// Reject duplicate keys; the kernel and the IKE daemon would silently
    /// keep only one of them. SAs are keyed by SPI alone.
    pub fn validate(&self) -> Result<()> {
        let mut spis = HashSet::new();
        for sa in &self.sas {
            if !spis.insert(sa.spi) {
                return Err(Error::config(format!("duplicate SPI in SA {}", sa)));
            }
        }

        let mut policies = HashSet::new();
        for sp in &self.policies {
            if !policies.insert((sp.direction, sp.selector)) {
                return Err(Error::config(format!("duplicate policy {}", sp)));
            }
            if sp.templates.is_empty() {
                return Err(Error::config(format!("policy {} has no templates", sp)));
            }
        }

        let mut names = HashSet::new();
        for conn in &self.connections {
            if conn.name.is_empty() || !names.insert(conn.name.as_str()) {
                return Err(Error::config(format!(
                    "empty or duplicate connection name '{}'",
                    conn.name
                )));
            }
        }

        Ok(())
    }
}
