//! Caller identity resolution
//!
//! The configuration manager never inspects callers itself. It asks a
//! [`CredentialsQuery`] oracle to map a caller reference (a unique bus
//! name such as `:1.42`) to the numeric user id and process id behind it,
//! and to resolve well-known names to their current unique owner.

use crate::error::{ConfigMgrError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Numeric user identity
pub type Uid = u32;

/// Numeric process identity
pub type Pid = u32;

/// Well-known name prefix claimed by VPN backend client processes
pub const DEFAULT_BACKEND_PREFIX: &str = "net.openvpn.v3.backends.be";

/// Identity oracle consumed by the access control checks
pub trait CredentialsQuery: Send + Sync {
    /// User id of the process behind `caller`
    fn uid(&self, caller: &str) -> Result<Uid>;

    /// Process id behind `caller`
    ///
    /// `caller` may be a unique name or a well-known name.
    fn pid(&self, caller: &str) -> Result<Pid>;

    /// Unique name currently owning a well-known name
    fn unique_name(&self, well_known: &str) -> Result<String>;
}

/// Check whether `caller` is the VPN backend client process
///
/// The caller must run as `backend_uid`. Its process id is then used to
/// re-compose the backend's well-known name; the caller qualifies only if
/// that name is owned by the very same unique name and both resolve to the
/// same process. Any resolution failure means the caller is not a backend
/// client.
pub fn is_backend_client(
    creds: &dyn CredentialsQuery,
    caller: &str,
    prefix: &str,
    backend_uid: Uid,
) -> bool {
    let verify = || -> Result<bool> {
        if creds.uid(caller)? != backend_uid {
            return Ok(false);
        }
        let caller_pid = creds.pid(caller)?;
        let be_name = format!("{}{}", prefix, caller_pid);
        let be_unique = creds.unique_name(&be_name)?;
        let be_pid = creds.pid(&be_name)?;
        Ok(caller_pid == be_pid && caller == be_unique)
    };
    verify().unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
struct Peer {
    uid: Uid,
    pid: Pid,
}

#[derive(Debug, Default)]
struct Registry {
    peers: HashMap<String, Peer>,
    names: HashMap<String, String>,
}

/// In-memory caller registry
///
/// Every connected peer gets a unique name bound to its credentials and
/// may claim well-known names. The transport host feeds it; the core
/// consults it through [`CredentialsQuery`].
#[derive(Debug, Default)]
pub struct CallerRegistry {
    inner: RwLock<Registry>,
    next_serial: AtomicU64,
    /// Name prefixes only the paired uid may own
    reserved: Vec<(String, Uid)>,
}

impl CallerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict well-known names starting with `prefix` to peers running
    /// as `uid`
    pub fn reserve_prefix(mut self, prefix: impl Into<String>, uid: Uid) -> Self {
        self.reserved.push((prefix.into(), uid));
        self
    }

    /// Register a new peer and return its unique name
    pub fn connect(&self, uid: Uid, pid: Pid) -> String {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed) + 1;
        let unique = format!(":1.{}", serial);
        self.write().peers.insert(unique.clone(), Peer { uid, pid });
        debug!("Registered caller {} (uid {}, pid {})", unique, uid, pid);
        unique
    }

    /// Forget a peer and every name it owned
    pub fn disconnect(&self, unique: &str) {
        let mut reg = self.write();
        reg.peers.remove(unique);
        reg.names.retain(|_, owner| owner != unique);
        debug!("Unregistered caller {}", unique);
    }

    /// Let a connected peer own a well-known name
    pub fn request_name(&self, unique: &str, well_known: &str) -> Result<()> {
        if well_known.is_empty() || well_known.starts_with(':') {
            return Err(ConfigMgrError::InvalidArgument(format!(
                "Invalid well-known name '{}'",
                well_known
            )));
        }

        let mut reg = self.write();
        let Some(peer) = reg.peers.get(unique).copied() else {
            return Err(ConfigMgrError::NotFound(format!("Unknown caller '{}'", unique)));
        };
        let reserved_for = self
            .reserved
            .iter()
            .find(|(prefix, _)| well_known.starts_with(prefix.as_str()));
        if let Some((_, uid)) = reserved_for {
            if peer.uid != *uid {
                warn!("{} (uid {}) denied reserved name {}", unique, peer.uid, well_known);
                return Err(ConfigMgrError::AuthorizationDenied(format!(
                    "Not allowed to own '{}'",
                    well_known
                )));
            }
        }
        match reg.names.get(well_known) {
            Some(owner) if owner == unique => Ok(()),
            Some(_) => Err(ConfigMgrError::Conflict(format!(
                "Name '{}' is already owned",
                well_known
            ))),
            None => {
                reg.names.insert(well_known.to_string(), unique.to_string());
                debug!("{} acquired {}", unique, well_known);
                Ok(())
            }
        }
    }

    /// Give up a well-known name
    pub fn release_name(&self, unique: &str, well_known: &str) -> Result<()> {
        let mut reg = self.write();
        match reg.names.get(well_known) {
            Some(owner) if owner == unique => {
                reg.names.remove(well_known);
                Ok(())
            }
            _ => Err(ConfigMgrError::NotFound(format!(
                "Name '{}' is not owned by '{}'",
                well_known, unique
            ))),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self, caller: &str) -> Result<Peer> {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let unique = if caller.starts_with(':') {
            caller
        } else {
            reg.names
                .get(caller)
                .map(String::as_str)
                .ok_or_else(|| ConfigMgrError::Identity(format!("Name '{}' has no owner", caller)))?
        };
        reg.peers
            .get(unique)
            .copied()
            .ok_or_else(|| ConfigMgrError::Identity(format!("Unknown caller '{}'", caller)))
    }
}

impl CredentialsQuery for CallerRegistry {
    fn uid(&self, caller: &str) -> Result<Uid> {
        self.peer(caller).map(|p| p.uid)
    }

    fn pid(&self, caller: &str) -> Result<Pid> {
        self.peer(caller).map(|p| p.pid)
    }

    fn unique_name(&self, well_known: &str) -> Result<String> {
        let reg = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        reg.names
            .get(well_known)
            .cloned()
            .ok_or_else(|| ConfigMgrError::Identity(format!("Name '{}' has no owner", well_known)))
    }
}
