pub mod admin;
pub mod gate;
pub mod ledger;
pub mod resolver;
pub mod types;

use crate::settings::Settings;
use std::collections::HashSet;

/// Access-control policy knobs, resolved once at startup from settings.
/// Immutable after construction; changing policy requires a service reload.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// Claim-based access grants download rights only when enabled.
    pub claim_download_enabled: bool,
    /// A claim leaving at most this many slots requires explicit confirmation.
    pub low_allowance_threshold: i64,
    /// Administrative actions withheld from the sysadmin role.
    pub sysadmin_forbidden_actions: HashSet<String>,
}

impl AccessPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            claim_download_enabled: settings.access.claim_download_enabled,
            low_allowance_threshold: settings.access.low_allowance_threshold,
            sysadmin_forbidden_actions: settings
                .access
                .sysadmin_forbidden_actions
                .iter()
                .cloned()
                .collect(),
        }
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
