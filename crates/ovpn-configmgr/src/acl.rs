//! Per-profile access control list
//!
//! An owner, an explicit list of granted user ids and a public-access
//! flag. Caller references are resolved to user ids through the
//! [`CredentialsQuery`] oracle at check time.

use crate::credentials::{CredentialsQuery, Uid};
use crate::error::{ConfigMgrError, Result};
use serde::{Deserialize, Serialize};

/// Access control list for one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    owner: Uid,
    public_access: bool,
    grants: Vec<Uid>,
}

impl AccessControlList {
    /// Create an ACL owned by `owner` with no grants
    pub fn new(owner: Uid) -> Self {
        Self {
            owner,
            public_access: false,
            grants: Vec::new(),
        }
    }

    pub fn owner(&self) -> Uid {
        self.owner
    }

    pub fn transfer_ownership(&mut self, new_owner: Uid) {
        self.owner = new_owner;
    }

    pub fn public_access(&self) -> bool {
        self.public_access
    }

    pub fn set_public_access(&mut self, public: bool) {
        self.public_access = public;
    }

    /// Grant access to `uid`
    pub fn grant(&mut self, uid: Uid) -> Result<()> {
        if self.grants.contains(&uid) {
            return Err(ConfigMgrError::Conflict(format!(
                "UID {} is already granted access",
                uid
            )));
        }
        self.grants.push(uid);
        Ok(())
    }

    /// Revoke access from `uid`
    pub fn revoke(&mut self, uid: Uid) -> Result<()> {
        let idx = self.grants.iter().position(|&g| g == uid).ok_or_else(|| {
            ConfigMgrError::NotFound(format!("UID {} is not in the access list", uid))
        })?;
        self.grants.remove(idx);
        Ok(())
    }

    /// Granted user ids, in grant order
    pub fn grants(&self) -> &[Uid] {
        &self.grants
    }

    /// Check if `caller` may access the object
    ///
    /// Public access short-circuits the check unless `ignore_public` is
    /// set. Otherwise the caller passes when its uid is the owner, is
    /// granted, or is listed in `extra_allowed`. An unresolvable caller
    /// never passes.
    pub fn check(
        &self,
        creds: &dyn CredentialsQuery,
        caller: &str,
        extra_allowed: &[Uid],
        ignore_public: bool,
    ) -> bool {
        if self.public_access && !ignore_public {
            return true;
        }
        match creds.uid(caller) {
            Ok(uid) => {
                uid == self.owner || self.grants.contains(&uid) || extra_allowed.contains(&uid)
            }
            Err(_) => false,
        }
    }

    /// Check if `caller` is the owner
    pub fn check_owner(&self, creds: &dyn CredentialsQuery, caller: &str) -> bool {
        creds.uid(caller).map(|uid| uid == self.owner).unwrap_or(false)
    }
}
