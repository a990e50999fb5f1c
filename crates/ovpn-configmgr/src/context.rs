//! State shared by the store and every profile it owns.

use crate::credentials::{CredentialsQuery, Uid};
use crate::options::ParseLimits;
use crate::settings::ServiceSettings;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment a profile operates in
pub struct ManagerContext {
    /// Caller identity oracle
    pub creds: Arc<dyn CredentialsQuery>,
    /// User id of the VPN backend client processes
    pub backend_uid: Uid,
    /// Well-known name prefix of backend client processes
    pub backend_prefix: String,
    /// Directory for persistent profiles
    pub state_dir: Option<PathBuf>,
    pub atomic_writes: bool,
    pub limits: ParseLimits,
}

impl ManagerContext {
    pub fn new(settings: &ServiceSettings, creds: Arc<dyn CredentialsQuery>) -> Self {
        Self {
            creds,
            backend_uid: settings.backend_uid,
            backend_prefix: settings.backend_name_prefix.clone(),
            state_dir: settings.state_dir.clone(),
            atomic_writes: settings.atomic_writes,
            limits: ParseLimits::default(),
        }
    }
}

impl fmt::Debug for ManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerContext")
            .field("backend_uid", &self.backend_uid)
            .field("backend_prefix", &self.backend_prefix)
            .field("state_dir", &self.state_dir)
            .field("atomic_writes", &self.atomic_writes)
            .finish_non_exhaustive()
    }
}
