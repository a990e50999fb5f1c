//! Configuration Profile
//!
//! One imported VPN configuration profile: the parsed option data plus
//! the metadata, overrides, tags and access control list wrapped around
//! it. A profile decides on its own which callers may perform which
//! operations (see the [`Authorize`] implementation below).
//!
//! # Lifecycle
//!
//! ```text
//!   import / rehydrate
//!          │
//!          ▼
//!      ┌────────┐   seal() [valid]   ┌────────┐
//!      │ Active │ ─────────────────▶ │ Sealed │
//!      └────────┘                    └────────┘
//!          │   remove() / single-use      │ remove()
//!          │   fetch by backend           │
//!          ▼                              ▼
//!      ┌──────────────────────────────────────┐
//!      │               Removed                │
//!      └──────────────────────────────────────┘
//! ```
//!
//! Removal is carried out by the store, which owns every profile.

use crate::acl::AccessControlList;
use crate::authz::{Authorize, AuthzRequest, Method, Operation, Property};
use crate::context::ManagerContext;
use crate::credentials::{is_backend_client, Uid};
use crate::error::{ConfigMgrError, Result};
use crate::options::{filter_ctrl_chars, OptionList};
use crate::overrides::{lookup_override, Override, OverrideValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Maximum length of a tag
pub const MAX_TAG_LENGTH: usize = 128;

/// Suffix of persistent profile files
pub const PERSISTENT_FILE_SUFFIX: &str = ".json";

const SEALED_MESSAGE: &str = "Configuration profile is sealed and read-only";

/// Opaque profile identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(Uuid);

impl ProfileId {
    /// Allocate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Name of the persistent file for this profile
    pub fn file_name(&self) -> String {
        format!("{}{}", self.0.hyphenated(), PERSISTENT_FILE_SUFFIX)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ProfileId {
    type Err = ConfigMgrError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ConfigMgrError::NotFound(format!("Invalid configuration profile id '{}'", s)))
    }
}

/// Serializable snapshot of a profile
///
/// This is the on-disk format of persistent profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: ProfileId,
    pub owner: Uid,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub import_timestamp: u64,
    #[serde(default)]
    pub last_used_timestamp: u64,
    #[serde(default)]
    pub locked_down: bool,
    #[serde(default)]
    pub transfer_owner_session: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub single_use: bool,
    #[serde(default)]
    pub used_count: u32,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub dco: bool,
    #[serde(default)]
    pub public_access: bool,
    #[serde(default)]
    pub acl: Vec<Uid>,
    #[serde(default)]
    pub overrides: BTreeMap<String, Value>,
    /// Structured export of the option data
    #[serde(default)]
    pub profile: Value,
}

/// Result of a `Fetch` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Rendered configuration
    pub config: String,
    /// The profile was claimed by the backend and must be removed
    pub consumed: bool,
}

/// A configuration profile
pub struct Configuration {
    ctx: Arc<ManagerContext>,
    id: ProfileId,
    name: String,
    acl: AccessControlList,
    tags: Vec<String>,
    options: OptionList,
    overrides: Vec<Override>,
    persistent: bool,
    single_use: bool,
    readonly: bool,
    locked_down: bool,
    transfer_owner_session: bool,
    dco: bool,
    valid: bool,
    used_count: u32,
    import_timestamp: u64,
    last_used_timestamp: u64,
    persistent_file: Option<PathBuf>,
}

impl Configuration {
    /// Create a profile from imported configuration text
    ///
    /// Persistent profiles are written to the state directory right away.
    pub fn import(
        ctx: Arc<ManagerContext>,
        id: ProfileId,
        name: &str,
        config_text: &str,
        single_use: bool,
        persistent: bool,
        owner: Uid,
    ) -> Result<Self> {
        let options = OptionList::parse(config_text, &ctx.limits)?;
        let persistent_file = match (&ctx.state_dir, persistent) {
            (Some(dir), true) => Some(dir.join(id.file_name())),
            _ => None,
        };

        let mut cfg = Self {
            ctx,
            id,
            name: filter_ctrl_chars(name, true),
            acl: AccessControlList::new(owner),
            tags: Vec::new(),
            options,
            overrides: Vec::new(),
            persistent,
            single_use,
            readonly: false,
            locked_down: false,
            transfer_owner_session: false,
            dco: false,
            valid: false,
            used_count: 0,
            import_timestamp: unix_now(),
            last_used_timestamp: 0,
            persistent_file,
        };
        cfg.validate();

        info!(
            "Parsed{}{}{} configuration '{}', owner: {}",
            if persistent { " persistent" } else { "" },
            if persistent && single_use { "," } else { "" },
            if single_use { " single-use" } else { "" },
            cfg.name,
            owner
        );

        cfg.persist()?;
        Ok(cfg)
    }

    /// Rebuild a profile from an exported record
    ///
    /// `file` is where the record was loaded from; updates are written
    /// back there. Override entries with unknown keys or mismatching
    /// types are logged and dropped. An override value that is neither a
    /// string nor a boolean makes the whole record invalid.
    pub fn from_record(
        ctx: Arc<ManagerContext>,
        record: ProfileRecord,
        file: Option<PathBuf>,
    ) -> Result<Self> {
        let options = OptionList::json_import(&record.profile)?;

        let mut acl = AccessControlList::new(record.owner);
        acl.set_public_access(record.public_access);
        for uid in &record.acl {
            // Duplicates in a hand edited file are harmless
            let _ = acl.grant(*uid);
        }

        let mut tags: Vec<String> = Vec::with_capacity(record.tags.len());
        for tag in &record.tags {
            let tag = filter_ctrl_chars(tag, true);
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let mut cfg = Self {
            ctx,
            id: record.id,
            name: filter_ctrl_chars(&record.name, true),
            acl,
            tags,
            options,
            overrides: Vec::new(),
            persistent: file.is_some(),
            single_use: record.single_use,
            readonly: record.readonly,
            locked_down: record.locked_down,
            transfer_owner_session: record.transfer_owner_session,
            dco: record.dco,
            valid: record.valid,
            used_count: record.used_count,
            import_timestamp: record.import_timestamp,
            last_used_timestamp: record.last_used_timestamp,
            persistent_file: file,
        };

        for (key, value) in &record.overrides {
            let value = match value {
                Value::Bool(b) => OverrideValue::Boolean(*b),
                Value::String(s) => OverrideValue::String(s.clone()),
                other => {
                    return Err(ConfigMgrError::Parse(format!(
                        "Invalid data type for override '{}': {}",
                        key, other
                    )))
                }
            };
            if let Err(e) = cfg.store_override(key, value) {
                error!("Incorrect override '{}' in {}: {}, ignoring", key, cfg.id, e);
            }
        }

        cfg.validate();
        Ok(cfg)
    }

    pub fn id(&self) -> ProfileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Uid {
        self.acl.owner()
    }

    pub fn acl(&self) -> &AccessControlList {
        &self.acl
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check if this profile carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn options(&self) -> &OptionList {
        &self.options
    }

    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    /// Current value of an override
    pub fn get_override(&self, key: &str) -> Option<&OverrideValue> {
        self.overrides.iter().find(|o| o.key == key).map(|o| &o.value)
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_single_use(&self) -> bool {
        self.single_use
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_locked_down(&self) -> bool {
        self.locked_down
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn used_count(&self) -> u32 {
        self.used_count
    }

    pub fn last_used_timestamp(&self) -> u64 {
        self.last_used_timestamp
    }

    /// Path of the disk mirror, if this profile has one
    pub fn persistent_file(&self) -> Option<&Path> {
        self.persistent_file.as_deref()
    }

    /// Full serializable snapshot
    pub fn export(&self) -> ProfileRecord {
        ProfileRecord {
            id: self.id,
            owner: self.acl.owner(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            import_timestamp: self.import_timestamp,
            last_used_timestamp: self.last_used_timestamp,
            locked_down: self.locked_down,
            transfer_owner_session: self.transfer_owner_session,
            readonly: self.readonly,
            single_use: self.single_use,
            used_count: self.used_count,
            valid: self.valid,
            dco: self.dco,
            public_access: self.acl.public_access(),
            acl: self.acl.grants().to_vec(),
            overrides: self
                .overrides
                .iter()
                .map(|o| (o.key.to_string(), override_to_json(&o.value)))
                .collect(),
            profile: self.options.json_export(),
        }
    }

    /// Render the configuration for `caller`
    ///
    /// When the caller is the verified VPN backend client the fetch counts
    /// as a use of the profile. A single-use profile is then reported as
    /// consumed and must be removed by the owner of this object before the
    /// call returns. Other callers never trigger these side effects.
    pub fn fetch(&mut self, caller: &str) -> FetchOutcome {
        let config = self.options.string_export();

        let creds = self.ctx.creds.as_ref();
        if !is_backend_client(creds, caller, &self.ctx.backend_prefix, self.ctx.backend_uid) {
            return FetchOutcome { config, consumed: false };
        }

        if self.single_use {
            debug!("Single-use configuration {} fetched", self.id);
            return FetchOutcome { config, consumed: true };
        }

        self.used_count = self.used_count.saturating_add(1);
        self.last_used_timestamp = unix_now();
        if let Err(e) = self.persist() {
            error!("Could not update persistent file for {}: {}", self.id, e);
        }
        FetchOutcome { config, consumed: false }
    }

    /// Structured form of the option data
    pub fn fetch_json(&self) -> Value {
        self.options.json_export()
    }

    /// Check if `caller` may list this profile
    pub fn check_acl(&self, caller: &str) -> bool {
        self.acl
            .check(self.ctx.creds.as_ref(), caller, &[self.acl.owner()], false)
    }

    /// Set or replace an override
    pub fn set_override(&mut self, key: &str, value: OverrideValue) -> Result<()> {
        self.ensure_writable()?;
        let key = filter_ctrl_chars(key, true);
        self.update(|cfg| cfg.store_override(&key, value))?;
        if let Some(value) = self.get_override(&key) {
            info!("Setting configuration override '{}' to '{}' on {}", key, value, self.id);
        }
        Ok(())
    }

    /// Remove an override
    pub fn unset_override(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        let key = filter_ctrl_chars(key, true);
        self.update(|cfg| {
            if cfg.remove_override(&key) {
                Ok(())
            } else {
                Err(ConfigMgrError::NotFound(format!("Override '{}' has not been set", key)))
            }
        })?;
        info!("Unset configuration override '{}' on {}", key, self.id);
        Ok(())
    }

    pub fn add_tag(&mut self, tag: &str) -> Result<()> {
        self.ensure_writable()?;
        let tag = filter_ctrl_chars(tag, true);
        check_tag(&tag)?;
        if self.has_tag(&tag) {
            return Err(ConfigMgrError::Conflict("Tag already exists".into()));
        }
        self.update(|cfg| {
            cfg.tags.push(tag);
            Ok(())
        })
    }

    pub fn remove_tag(&mut self, tag: &str) -> Result<()> {
        self.ensure_writable()?;
        check_tag(tag)?;
        let idx = self
            .tags
            .iter()
            .position(|t| t == tag)
            .ok_or_else(|| ConfigMgrError::NotFound("Non-existing tag".into()))?;
        self.update(|cfg| {
            cfg.tags.remove(idx);
            Ok(())
        })
    }

    pub fn grant_access(&mut self, uid: Uid) -> Result<()> {
        self.ensure_writable()?;
        self.update(|cfg| cfg.acl.grant(uid))?;
        info!("Granted access to UID {} on {}", uid, self.id);
        Ok(())
    }

    pub fn revoke_access(&mut self, uid: Uid) -> Result<()> {
        self.ensure_writable()?;
        self.update(|cfg| cfg.acl.revoke(uid))?;
        info!("Revoked access from UID {} on {}", uid, self.id);
        Ok(())
    }

    pub fn transfer_ownership(&mut self, new_owner: Uid) -> Result<()> {
        self.ensure_writable()?;
        let old_owner = self.acl.owner();
        self.update(|cfg| {
            cfg.acl.transfer_ownership(new_owner);
            Ok(())
        })?;
        info!(
            "Transferred ownership of {} from UID {} to UID {}",
            self.id, old_owner, new_owner
        );
        Ok(())
    }

    /// Make the profile read-only
    pub fn seal(&mut self) -> Result<()> {
        if !self.valid {
            return Err(ConfigMgrError::Validation(
                "Configuration is not currently valid".into(),
            ));
        }
        self.update(|cfg| {
            cfg.readonly = true;
            Ok(())
        })?;
        info!("Configuration {} sealed", self.id);
        Ok(())
    }

    /// Check that the profile can be used as a client configuration
    ///
    /// Requires `--ca`, `--client` or `--tls-client`, `--dev` and
    /// `--remote`. Server locked profiles are always rejected. Updates the
    /// `valid` flag and returns it together with a diagnostic which is
    /// empty for valid profiles.
    pub fn validate(&mut self) -> (bool, String) {
        let mut client_configured = false;
        let mut remote_found = false;
        let mut ca_found = false;
        let mut dev_found = false;

        for opt in self.options.iter() {
            match opt.name.as_str() {
                "setenv" if opt.arg(0) == Some("GENERIC_CONFIG") => {
                    self.valid = false;
                    return (false, "Server locked profiles are unsupported".to_string());
                }
                "remote" => remote_found = true,
                "ca" => ca_found = true,
                "dev" => dev_found = true,
                "client" | "tls-client" => client_configured = true,
                _ => {}
            }
        }

        let mut missing = Vec::new();
        if !ca_found {
            missing.push("--ca");
        }
        if !client_configured {
            missing.push("--client or --tls-client");
        }
        if !dev_found {
            missing.push("--dev");
        }
        if !remote_found {
            missing.push("--remote");
        }

        self.valid = missing.is_empty();
        if self.valid {
            (true, String::new())
        } else {
            (
                false,
                format!(
                    "Configuration profile is missing required options: {}",
                    missing.join(", ")
                ),
            )
        }
    }

    /// Read a property
    pub fn get_property(&self, prop: Property) -> Value {
        match prop {
            Property::Id => json!(self.id),
            Property::Owner => json!(self.acl.owner()),
            Property::Name => json!(self.name),
            Property::Tags => json!(self.tags),
            Property::Persistent => json!(self.persistent),
            Property::SingleUse => json!(self.single_use),
            Property::Readonly => json!(self.readonly),
            Property::LockedDown => json!(self.locked_down),
            Property::PublicAccess => json!(self.acl.public_access()),
            Property::TransferOwnerSession => json!(self.transfer_owner_session),
            Property::Dco => json!(self.dco),
            Property::ImportTimestamp => json!(self.import_timestamp),
            Property::LastUsedTimestamp => json!(self.last_used_timestamp),
            Property::UsedCount => json!(self.used_count),
            Property::Valid => json!(self.valid),
            Property::Acl => json!(self.acl.grants()),
            Property::Overrides => Value::Object(
                self.overrides
                    .iter()
                    .map(|o| (o.key.to_string(), override_to_json(&o.value)))
                    .collect(),
            ),
        }
    }

    /// Change a writable property
    pub fn set_property(&mut self, prop: Property, value: &Value) -> Result<()> {
        self.ensure_writable()?;
        self.update(|cfg| {
            match prop {
                Property::Name => {
                    let name = value.as_str().ok_or_else(|| type_error(prop, "string"))?;
                    cfg.name = filter_ctrl_chars(name, true);
                }
                Property::LockedDown => cfg.locked_down = bool_arg(prop, value)?,
                Property::PublicAccess => cfg.acl.set_public_access(bool_arg(prop, value)?),
                Property::TransferOwnerSession => {
                    cfg.transfer_owner_session = bool_arg(prop, value)?
                }
                Property::Dco => cfg.dco = bool_arg(prop, value)?,
                _ => {
                    return Err(ConfigMgrError::InvalidArgument(format!(
                        "Property '{}' is read-only",
                        prop
                    )))
                }
            }
            Ok(())
        })?;
        debug!("{} - Property {} changed to '{}'", self.id, prop, value);
        Ok(())
    }

    /// Delete the disk mirror, if any
    pub(crate) fn discard_persistent_file(&self) {
        let Some(path) = &self.persistent_file else {
            return;
        };
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed persistent config: {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!("Could not remove {}: {}", path.display(), e),
        }
    }

    /// Apply `change` and mirror it to disk
    ///
    /// If either step fails the profile is left exactly as it was.
    fn update<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved = Snapshot::take(self);
        let result = change(self).and_then(|()| self.persist());
        if result.is_err() {
            saved.restore(self);
        }
        result
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            Err(ConfigMgrError::AuthorizationDenied(SEALED_MESSAGE.into()))
        } else {
            Ok(())
        }
    }

    /// Validate and upsert an override, without persisting
    fn store_override(&mut self, key: &str, value: OverrideValue) -> Result<()> {
        let vo = lookup_override(key, false)
            .ok_or_else(|| ConfigMgrError::NotFound(format!("Invalid override key '{}'", key)))?;
        if !vo.accepts(&value) {
            return Err(ConfigMgrError::TypeMismatch {
                key: key.to_string(),
                expected: vo.kind.name(),
                got: value.kind().name(),
            });
        }
        let value = match value {
            OverrideValue::String(s) => OverrideValue::String(filter_ctrl_chars(&s, true)),
            other => other,
        };

        self.remove_override(key);
        self.overrides.push(Override { key: vo.key, value });
        Ok(())
    }

    fn remove_override(&mut self, key: &str) -> bool {
        match self.overrides.iter().position(|o| o.key == key) {
            Some(idx) => {
                self.overrides.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Mirror the current state to disk, if persistent
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.persistent_file else {
            return Ok(());
        };
        let data = serde_json::to_vec_pretty(&self.export())?;

        if self.ctx.atomic_writes {
            // Write next to the target and rename over it
            let temp_path = path.with_extension("json.tmp");
            fs::write(&temp_path, &data)?;
            if let Err(e) = fs::rename(&temp_path, path) {
                let _ = fs::remove_file(&temp_path);
                return Err(e.into());
            }
        } else {
            fs::write(path, &data)?;
        }

        debug!("Updated persistent config: {}", path.display());
        Ok(())
    }
}

impl Authorize for Configuration {
    fn authorize(&self, request: &AuthzRequest<'_>) -> bool {
        let creds = self.ctx.creds.as_ref();
        let caller = request.caller;
        let owner = self.acl.owner();
        let backend = self.ctx.backend_uid;

        match request.operation {
            Operation::Call(method) if method.is_write() => {
                !self.readonly && self.acl.check_owner(creds, caller)
            }
            Operation::Call(Method::Fetch | Method::FetchJson) => {
                if self.locked_down {
                    // Only the owner and the backend client may read a
                    // locked down profile
                    self.acl.check_owner(creds, caller)
                        || is_backend_client(creds, caller, &self.ctx.backend_prefix, backend)
                } else {
                    // Public access alone never grants Fetch
                    self.acl.check(creds, caller, &[owner, backend], true)
                }
            }
            Operation::Call(Method::Seal | Method::Remove) => self.acl.check_owner(creds, caller),
            Operation::Call(_) => self.acl.check(creds, caller, &[owner], false),

            Operation::Get(Property::Owner) => true,
            Operation::Get(
                Property::Name
                | Property::TransferOwnerSession
                | Property::Overrides
                | Property::Dco
                | Property::Persistent
                | Property::ImportTimestamp
                | Property::LastUsedTimestamp
                | Property::LockedDown
                | Property::Readonly
                | Property::UsedCount
                | Property::Valid
                | Property::Tags,
            ) => self.acl.check(creds, caller, &[owner, backend], false),
            Operation::Get(Property::PublicAccess | Property::Acl | Property::SingleUse) => {
                self.acl.check_owner(creds, caller)
            }
            Operation::Get(_) => self.acl.check(creds, caller, &[0, owner, backend], true),

            Operation::Set(_) if self.readonly => false,
            Operation::Set(Property::Name | Property::LockedDown | Property::PublicAccess) => {
                self.acl.check_owner(creds, caller)
            }
            Operation::Set(_) => self.acl.check(creds, caller, &[owner], true),
        }
    }

    fn rejection_message(&self, operation: Operation) -> String {
        match operation {
            Operation::Set(_) if self.readonly => SEALED_MESSAGE.to_string(),
            Operation::Set(_) => "Configuration can only be modified by the profile owner".to_string(),
            Operation::Call(method) if self.readonly && method.is_write() => SEALED_MESSAGE.to_string(),
            _ => "Access to the configuration profile is denied.".to_string(),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.acl.owner())
            .field("readonly", &self.readonly)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}

/// Mutable part of a profile, kept aside while an update is in flight
struct Snapshot {
    name: String,
    acl: AccessControlList,
    tags: Vec<String>,
    overrides: Vec<Override>,
    readonly: bool,
    locked_down: bool,
    transfer_owner_session: bool,
    dco: bool,
}

impl Snapshot {
    fn take(cfg: &Configuration) -> Self {
        Self {
            name: cfg.name.clone(),
            acl: cfg.acl.clone(),
            tags: cfg.tags.clone(),
            overrides: cfg.overrides.clone(),
            readonly: cfg.readonly,
            locked_down: cfg.locked_down,
            transfer_owner_session: cfg.transfer_owner_session,
            dco: cfg.dco,
        }
    }

    fn restore(self, cfg: &mut Configuration) {
        cfg.name = self.name;
        cfg.acl = self.acl;
        cfg.tags = self.tags;
        cfg.overrides = self.overrides;
        cfg.readonly = self.readonly;
        cfg.locked_down = self.locked_down;
        cfg.transfer_owner_session = self.transfer_owner_session;
        cfg.dco = self.dco;
    }
}

fn check_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(ConfigMgrError::InvalidArgument("Tag value cannot be empty".into()));
    }
    if tag.chars().count() > MAX_TAG_LENGTH {
        return Err(ConfigMgrError::InvalidArgument("Tag value too long".into()));
    }
    Ok(())
}

fn override_to_json(value: &OverrideValue) -> Value {
    match value {
        OverrideValue::Boolean(b) => Value::Bool(*b),
        OverrideValue::String(s) => Value::String(s.clone()),
    }
}

fn type_error(prop: Property, expected: &str) -> ConfigMgrError {
    ConfigMgrError::InvalidArgument(format!("Property '{}' expects a {} value", prop, expected))
}

fn bool_arg(prop: Property, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| type_error(prop, "boolean"))
}

/// Seconds since the Unix epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CallerRegistry, DEFAULT_BACKEND_PREFIX};
    use crate::options::ParseLimits;

    const VALID_PROFILE: &str = "\
client
dev tun
remote vpn.example.com 1194
<ca>
-----BEGIN CERTIFICATE-----
MIIBszCCAVmgAwIBAgIU
-----END CERTIFICATE-----
</ca>
";

    const OWNER: Uid = 1000;
    const FRIEND: Uid = 1001;
    const STRANGER: Uid = 1002;
    const BACKEND: Uid = 990;

    struct Env {
        reg: Arc<CallerRegistry>,
        ctx: Arc<ManagerContext>,
        owner: String,
        friend: String,
        stranger: String,
        root: String,
        backend: String,
    }

    fn env() -> Env {
        let reg = Arc::new(CallerRegistry::new());
        let owner = reg.connect(OWNER, 100);
        let friend = reg.connect(FRIEND, 101);
        let stranger = reg.connect(STRANGER, 102);
        let root = reg.connect(0, 103);
        let backend = reg.connect(BACKEND, 200);
        reg.request_name(&backend, &format!("{}200", DEFAULT_BACKEND_PREFIX))
            .unwrap();

        let ctx = Arc::new(ManagerContext {
            creds: reg.clone(),
            backend_uid: BACKEND,
            backend_prefix: DEFAULT_BACKEND_PREFIX.to_string(),
            state_dir: None,
            atomic_writes: true,
            limits: ParseLimits::default(),
        });
        Env { reg, ctx, owner, friend, stranger, root, backend }
    }

    fn profile(env: &Env, single_use: bool) -> Configuration {
        Configuration::import(
            env.ctx.clone(),
            ProfileId::generate(),
            "test profile",
            VALID_PROFILE,
            single_use,
            false,
            OWNER,
        )
        .unwrap()
    }

    fn allowed(cfg: &Configuration, op: Operation, caller: &str) -> bool {
        cfg.authorize(&AuthzRequest::new(op, caller))
    }

    #[test]
    fn test_profile_id() {
        let id = ProfileId::generate();
        assert_eq!(id.to_string().len(), 36);
        assert_eq!(id.file_name().len(), 41);
        assert_eq!(id.to_string().parse::<ProfileId>().unwrap(), id);
        assert!("not-a-uuid".parse::<ProfileId>().is_err());
    }

    #[test]
    fn test_validate() {
        let env = env();
        let mut cfg = profile(&env, false);
        assert!(cfg.is_valid());
        assert_eq!(cfg.validate(), (true, String::new()));

        let without_ca = "client\ndev tun\nremote host 1194\n";
        let mut cfg = Configuration::import(
            env.ctx.clone(),
            ProfileId::generate(),
            "no ca",
            without_ca,
            false,
            false,
            OWNER,
        )
        .unwrap();
        let (valid, diag) = cfg.validate();
        assert!(!valid);
        assert!(!cfg.is_valid());
        assert!(diag.contains("--ca"));
        assert!(!diag.contains("--dev"));
    }

    #[test]
    fn test_validate_missing_everything() {
        let env = env();
        let mut cfg = Configuration::import(
            env.ctx.clone(),
            ProfileId::generate(),
            "empty",
            "verb 3\n",
            false,
            false,
            OWNER,
        )
        .unwrap();
        let (_, diag) = cfg.validate();
        assert_eq!(
            diag,
            "Configuration profile is missing required options: \
             --ca, --client or --tls-client, --dev, --remote"
        );
    }

    #[test]
    fn test_validate_server_locked() {
        let env = env();
        let text = format!("{}setenv GENERIC_CONFIG 1\n", VALID_PROFILE);
        let mut cfg = Configuration::import(
            env.ctx.clone(),
            ProfileId::generate(),
            "locked",
            &text,
            false,
            false,
            OWNER,
        )
        .unwrap();
        assert_eq!(
            cfg.validate(),
            (false, "Server locked profiles are unsupported".to_string())
        );
        assert!(cfg.seal().is_err());
    }

    #[test]
    fn test_overrides() {
        let env = env();
        let mut cfg = profile(&env, false);

        cfg.set_override("proto-override", "tcp".into()).unwrap();
        cfg.set_override("persist-tun", true.into()).unwrap();
        cfg.set_override("proto-override", "udp".into()).unwrap();
        assert_eq!(cfg.overrides().len(), 2);
        assert_eq!(cfg.get_override("proto-override"), Some(&OverrideValue::from("udp")));

        assert!(matches!(
            cfg.set_override("bogus", "x".into()),
            Err(ConfigMgrError::NotFound(_))
        ));
        assert!(matches!(
            cfg.set_override("persist-tun", "yes".into()),
            Err(ConfigMgrError::TypeMismatch { .. })
        ));
        // Failed sets leave the previous value alone
        assert_eq!(cfg.get_override("persist-tun"), Some(&OverrideValue::Boolean(true)));

        cfg.unset_override("persist-tun").unwrap();
        assert!(matches!(
            cfg.unset_override("persist-tun"),
            Err(ConfigMgrError::NotFound(_))
        ));
    }

    #[test]
    fn test_tags() {
        let env = env();
        let mut cfg = profile(&env, false);

        cfg.add_tag("work").unwrap();
        assert!(matches!(cfg.add_tag("work"), Err(ConfigMgrError::Conflict(_))));
        assert!(cfg.has_tag("work"));
        cfg.remove_tag("work").unwrap();
        assert!(cfg.tags().is_empty());
        assert!(matches!(cfg.remove_tag("work"), Err(ConfigMgrError::NotFound(_))));

        assert!(matches!(cfg.add_tag(""), Err(ConfigMgrError::InvalidArgument(_))));
        assert!(cfg.add_tag(&"x".repeat(MAX_TAG_LENGTH)).is_ok());
        assert!(matches!(
            cfg.add_tag(&"y".repeat(MAX_TAG_LENGTH + 1)),
            Err(ConfigMgrError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sealed_blocks_mutation() {
        let env = env();
        let mut cfg = profile(&env, false);
        cfg.seal().unwrap();
        assert!(cfg.is_readonly());

        assert!(matches!(cfg.add_tag("x"), Err(ConfigMgrError::AuthorizationDenied(_))));
        assert!(cfg.set_override("persist-tun", true.into()).is_err());
        assert!(cfg.grant_access(FRIEND).is_err());
        assert!(cfg.transfer_ownership(FRIEND).is_err());
        assert!(cfg.set_property(Property::Name, &json!("new")).is_err());
        assert_eq!(cfg.name(), "test profile");

        for caller in [&env.owner, &env.friend, &env.root, &env.backend] {
            for method in [Method::AddTag, Method::SetOverride, Method::AccessGrant] {
                assert!(!allowed(&cfg, Operation::Call(method), caller));
            }
            assert!(!allowed(&cfg, Operation::Set(Property::Name), caller));
        }
        assert_eq!(
            cfg.rejection_message(Operation::Call(Method::AddTag)),
            "Configuration profile is sealed and read-only"
        );
        assert_eq!(
            cfg.rejection_message(Operation::Call(Method::Fetch)),
            "Access to the configuration profile is denied."
        );
    }

    #[test]
    fn test_write_methods_owner_only() {
        let env = env();
        let mut cfg = profile(&env, false);
        cfg.grant_access(FRIEND).unwrap();

        let op = Operation::Call(Method::SetOverride);
        assert!(allowed(&cfg, op, &env.owner));
        assert!(!allowed(&cfg, op, &env.friend));
        assert!(!allowed(&cfg, op, &env.root));
        assert_eq!(
            cfg.rejection_message(op),
            "Access to the configuration profile is denied."
        );

        let seal = Operation::Call(Method::Seal);
        assert!(allowed(&cfg, seal, &env.owner));
        assert!(!allowed(&cfg, seal, &env.friend));

        let validate = Operation::Call(Method::Validate);
        assert!(allowed(&cfg, validate, &env.friend));
        assert!(!allowed(&cfg, validate, &env.stranger));
    }

    #[test]
    fn test_fetch_authorization() {
        let env = env();
        let mut cfg = profile(&env, false);
        let fetch = Operation::Call(Method::Fetch);

        assert!(allowed(&cfg, fetch, &env.owner));
        assert!(allowed(&cfg, fetch, &env.backend));
        assert!(!allowed(&cfg, fetch, &env.friend));

        // Public access does not open up Fetch
        cfg.set_property(Property::PublicAccess, &json!(true)).unwrap();
        assert!(!allowed(&cfg, fetch, &env.stranger));
        assert!(allowed(&cfg, Operation::Get(Property::Name), &env.stranger));

        cfg.grant_access(FRIEND).unwrap();
        assert!(allowed(&cfg, fetch, &env.friend));

        // Locked down profiles: owner and backend only
        cfg.set_property(Property::LockedDown, &json!(true)).unwrap();
        assert!(allowed(&cfg, fetch, &env.owner));
        assert!(allowed(&cfg, Operation::Call(Method::FetchJson), &env.backend));
        assert!(!allowed(&cfg, fetch, &env.friend));
    }

    #[test]
    fn test_property_read_rules() {
        let env = env();
        let mut cfg = profile(&env, false);
        cfg.grant_access(FRIEND).unwrap();

        assert!(allowed(&cfg, Operation::Get(Property::Owner), &env.stranger));
        assert!(allowed(&cfg, Operation::Get(Property::Tags), &env.friend));
        assert!(allowed(&cfg, Operation::Get(Property::Valid), &env.backend));
        assert!(!allowed(&cfg, Operation::Get(Property::Valid), &env.stranger));

        assert!(allowed(&cfg, Operation::Get(Property::Acl), &env.owner));
        assert!(!allowed(&cfg, Operation::Get(Property::Acl), &env.friend));
        assert!(!allowed(&cfg, Operation::Get(Property::SingleUse), &env.root));

        // Everything else: root, owner, grants and backend, never public
        cfg.set_property(Property::PublicAccess, &json!(true)).unwrap();
        assert!(allowed(&cfg, Operation::Get(Property::Id), &env.root));
        assert!(allowed(&cfg, Operation::Get(Property::Id), &env.friend));
        assert!(!allowed(&cfg, Operation::Get(Property::Id), &env.stranger));
    }

    #[test]
    fn test_property_write_rules() {
        let env = env();
        let mut cfg = profile(&env, false);
        cfg.grant_access(FRIEND).unwrap();

        assert!(allowed(&cfg, Operation::Set(Property::Name), &env.owner));
        assert!(!allowed(&cfg, Operation::Set(Property::Name), &env.friend));
        assert!(allowed(&cfg, Operation::Set(Property::Dco), &env.friend));
        assert!(!allowed(&cfg, Operation::Set(Property::Dco), &env.stranger));
        assert_eq!(
            cfg.rejection_message(Operation::Set(Property::Name)),
            "Configuration can only be modified by the profile owner"
        );

        cfg.set_property(Property::Name, &json!("renamed\u{7}")).unwrap();
        assert_eq!(cfg.name(), "renamed");
        assert!(matches!(
            cfg.set_property(Property::Dco, &json!("yes")),
            Err(ConfigMgrError::InvalidArgument(_))
        ));
        assert!(matches!(
            cfg.set_property(Property::UsedCount, &json!(5)),
            Err(ConfigMgrError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fetch_side_effects() {
        let env = env();
        let mut cfg = profile(&env, false);

        let out = cfg.fetch(&env.owner);
        assert!(!out.consumed);
        assert!(out.config.contains("remote vpn.example.com 1194"));
        assert_eq!(cfg.used_count(), 0);

        let out = cfg.fetch(&env.backend);
        assert!(!out.consumed);
        assert_eq!(cfg.used_count(), 1);
        assert!(cfg.last_used_timestamp() > 0);

        let mut single = profile(&env, true);
        assert!(!single.fetch(&env.owner).consumed);
        assert!(single.fetch(&env.backend).consumed);
        assert_eq!(single.used_count(), 0);
    }

    #[test]
    fn test_backend_name_must_match_pid() {
        let env = env();
        let mut single = profile(&env, true);

        // Right uid, but the backend name belongs to another process
        let impostor = env.reg.connect(BACKEND, 300);
        env.reg
            .request_name(&impostor, &format!("{}200", DEFAULT_BACKEND_PREFIX))
            .unwrap_err();
        env.reg
            .request_name(&impostor, &format!("{}301", DEFAULT_BACKEND_PREFIX))
            .unwrap();
        assert!(!single.fetch(&impostor).consumed);
    }

    #[test]
    fn test_only_backend_consumes() {
        let env = env();
        let mut single = profile(&env, true);
        single.grant_access(FRIEND).unwrap();

        // A granted user may fetch, but that is not a use of the profile
        assert!(allowed(&single, Operation::Call(Method::Fetch), &env.friend));
        assert!(!single.fetch(&env.friend).consumed);
        assert_eq!(single.used_count(), 0);

        // Holding a name under the backend prefix for its own pid is not
        // enough without the backend uid
        let lookalike = env.reg.connect(FRIEND, 7777);
        env.reg
            .request_name(&lookalike, &format!("{}7777", DEFAULT_BACKEND_PREFIX))
            .unwrap();
        assert!(!single.fetch(&lookalike).consumed);

        let mut reusable = profile(&env, false);
        reusable.grant_access(FRIEND).unwrap();
        reusable.fetch(&env.friend);
        reusable.fetch(&lookalike);
        assert_eq!(reusable.used_count(), 0);
        assert_eq!(reusable.last_used_timestamp(), 0);

        // Locked down: the lookalike is neither owner nor backend
        reusable
            .set_property(Property::LockedDown, &json!(true))
            .unwrap();
        assert!(!allowed(&reusable, Operation::Call(Method::Fetch), &lookalike));
        assert!(allowed(&reusable, Operation::Call(Method::Fetch), &env.backend));
    }

    #[test]
    fn test_export_roundtrip() {
        let env = env();
        let mut cfg = profile(&env, true);
        cfg.add_tag("work").unwrap();
        cfg.add_tag("eu").unwrap();
        cfg.set_override("server-override", "alt.example.com".into()).unwrap();
        cfg.set_override("dns-fallback-google", false.into()).unwrap();
        cfg.grant_access(FRIEND).unwrap();
        cfg.set_property(Property::PublicAccess, &json!(true)).unwrap();

        let record = cfg.export();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: ProfileRecord = serde_json::from_str(&json).unwrap();
        let restored = Configuration::from_record(env.ctx.clone(), parsed, None).unwrap();

        assert_eq!(restored.id(), cfg.id());
        assert_eq!(restored.owner(), cfg.owner());
        assert_eq!(restored.name(), cfg.name());
        assert_eq!(restored.tags(), cfg.tags());
        assert_eq!(restored.options(), cfg.options());
        assert_eq!(restored.acl(), cfg.acl());
        assert_eq!(restored.get_property(Property::Overrides), cfg.get_property(Property::Overrides));
        assert!(restored.is_single_use());
        assert!(restored.is_valid());
    }

    #[test]
    fn test_record_bad_overrides() {
        let env = env();
        let mut record = profile(&env, false).export();
        record.overrides.insert("no-such-key".into(), json!("x"));
        record.overrides.insert("persist-tun".into(), json!("not a bool"));
        record.overrides.insert("ipv6".into(), json!("no"));

        let restored = Configuration::from_record(env.ctx.clone(), record.clone(), None).unwrap();
        assert_eq!(restored.overrides().len(), 1);
        assert_eq!(restored.get_override("ipv6"), Some(&OverrideValue::from("no")));

        record.overrides.insert("log-level".into(), json!(4));
        assert!(matches!(
            Configuration::from_record(env.ctx.clone(), record, None),
            Err(ConfigMgrError::Parse(_))
        ));
    }
}
