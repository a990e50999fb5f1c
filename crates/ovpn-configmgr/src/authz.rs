//! Authorization vocabulary
//!
//! Remote operations are classified as method calls, property reads and
//! property writes. Each object kind exposed to callers decides on its own
//! whether a request is allowed by implementing [`Authorize`].

use crate::error::ConfigMgrError;
use std::fmt;
use std::str::FromStr;

/// Methods callable on a configuration profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Validate,
    Fetch,
    FetchJson,
    SetOverride,
    UnsetOverride,
    AddTag,
    RemoveTag,
    AccessGrant,
    AccessRevoke,
    TransferOwnership,
    Seal,
    Remove,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Validate => "Validate",
            Method::Fetch => "Fetch",
            Method::FetchJson => "FetchJSON",
            Method::SetOverride => "SetOverride",
            Method::UnsetOverride => "UnsetOverride",
            Method::AddTag => "AddTag",
            Method::RemoveTag => "RemoveTag",
            Method::AccessGrant => "AccessGrant",
            Method::AccessRevoke => "AccessRevoke",
            Method::TransferOwnership => "TransferOwnership",
            Method::Seal => "Seal",
            Method::Remove => "Remove",
        }
    }

    /// Methods modifying the profile; restricted to the owner of an
    /// unsealed profile
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Method::SetOverride
                | Method::UnsetOverride
                | Method::AddTag
                | Method::RemoveTag
                | Method::AccessGrant
                | Method::AccessRevoke
                | Method::TransferOwnership
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties of a configuration profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Id,
    Owner,
    Name,
    Tags,
    Persistent,
    SingleUse,
    Readonly,
    LockedDown,
    PublicAccess,
    TransferOwnerSession,
    Dco,
    ImportTimestamp,
    LastUsedTimestamp,
    UsedCount,
    Valid,
    Acl,
    Overrides,
}

impl Property {
    pub const ALL: [Property; 17] = [
        Property::Id,
        Property::Owner,
        Property::Name,
        Property::Tags,
        Property::Persistent,
        Property::SingleUse,
        Property::Readonly,
        Property::LockedDown,
        Property::PublicAccess,
        Property::TransferOwnerSession,
        Property::Dco,
        Property::ImportTimestamp,
        Property::LastUsedTimestamp,
        Property::UsedCount,
        Property::Valid,
        Property::Acl,
        Property::Overrides,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Id => "id",
            Property::Owner => "owner",
            Property::Name => "name",
            Property::Tags => "tags",
            Property::Persistent => "persistent",
            Property::SingleUse => "single_use",
            Property::Readonly => "readonly",
            Property::LockedDown => "locked_down",
            Property::PublicAccess => "public_access",
            Property::TransferOwnerSession => "transfer_owner_session",
            Property::Dco => "dco",
            Property::ImportTimestamp => "import_timestamp",
            Property::LastUsedTimestamp => "last_used_timestamp",
            Property::UsedCount => "used_count",
            Property::Valid => "valid",
            Property::Acl => "acl",
            Property::Overrides => "overrides",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Property {
    type Err = ConfigMgrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConfigMgrError::NotFound(format!("Unknown property '{}'", s)))
    }
}

/// Kind of access requested, carrying its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Call(Method),
    Get(Property),
    Set(Property),
}

/// An access request from a caller
#[derive(Debug, Clone, Copy)]
pub struct AuthzRequest<'a> {
    pub operation: Operation,
    /// Unique bus name of the calling process
    pub caller: &'a str,
}

impl<'a> AuthzRequest<'a> {
    pub fn new(operation: Operation, caller: &'a str) -> Self {
        Self { operation, caller }
    }
}

/// Per-object authorization decision
pub trait Authorize {
    /// Decide whether the request may proceed
    fn authorize(&self, request: &AuthzRequest<'_>) -> bool;

    /// Reason reported to a caller whose request was refused
    fn rejection_message(&self, operation: Operation) -> String;
}
