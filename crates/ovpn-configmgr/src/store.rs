//! Configuration Store
//!
//! Owns every live profile, keyed by its identifier. Removing a profile
//! from the map invalidates its identifier; there are no other handles.

use crate::authz::{Authorize, AuthzRequest, Method, Operation};
use crate::context::ManagerContext;
use crate::credentials::Uid;
use crate::error::{ConfigMgrError, Result};
use crate::events::{ConfigEvent, EventBus, EventType};
use crate::profile::{Configuration, ProfileId, ProfileRecord, PERSISTENT_FILE_SUFFIX};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Length of a persistent file name: 36 character id plus suffix
const PERSISTENT_FILE_NAME_LEN: usize = 41;

/// Collection of all configuration profiles
#[derive(Debug)]
pub struct ConfigStore {
    ctx: Arc<ManagerContext>,
    profiles: BTreeMap<ProfileId, Configuration>,
    events: EventBus,
}

impl ConfigStore {
    pub fn new(ctx: Arc<ManagerContext>) -> Self {
        Self {
            ctx,
            profiles: BTreeMap::new(),
            events: EventBus::new(),
        }
    }

    pub fn context(&self) -> &Arc<ManagerContext> {
        &self.ctx
    }

    /// Subscribe to created/destroyed events
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    /// Rehydrate persistent profiles from the state directory
    ///
    /// A file that fails to load is logged and skipped. Returns the number
    /// of profiles loaded.
    pub fn load_state_dir(&mut self) -> Result<usize> {
        let Some(dir) = self.ctx.state_dir.clone() else {
            return Ok(0);
        };

        let mut loaded = 0;
        for path in persistent_file_list(&dir)? {
            match self.load_file(&path) {
                Ok(id) => {
                    debug!("Loaded configuration file '{}' as {}", path.display(), id);
                    loaded += 1;
                }
                Err(e) => error!("Could not load '{}': {}", path.display(), e),
            }
        }

        info!("Loaded {} persistent configuration(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    fn load_file(&mut self, path: &Path) -> Result<ProfileId> {
        let content = fs::read_to_string(path)?;
        let record: ProfileRecord = serde_json::from_str(&content)?;
        if self.profiles.contains_key(&record.id) {
            return Err(ConfigMgrError::Conflict(format!(
                "Configuration {} is already loaded",
                record.id
            )));
        }

        let cfg = Configuration::from_record(self.ctx.clone(), record, Some(path.to_path_buf()))?;
        let id = cfg.id();
        self.profiles.insert(id, cfg);
        Ok(id)
    }

    /// Import a new profile and announce it
    pub fn import(
        &mut self,
        name: &str,
        config_text: &str,
        single_use: bool,
        persistent: bool,
        owner: Uid,
    ) -> Result<ProfileId> {
        let id = ProfileId::generate();
        let cfg = Configuration::import(
            self.ctx.clone(),
            id,
            name,
            config_text,
            single_use,
            persistent,
            owner,
        )?;
        self.profiles.insert(id, cfg);
        self.events.publish(ConfigEvent::new(id, EventType::Created, owner));
        Ok(id)
    }

    pub fn get(&self, id: &ProfileId) -> Result<&Configuration> {
        self.profiles.get(id).ok_or_else(|| unknown_profile(id))
    }

    pub fn get_mut(&mut self, id: &ProfileId) -> Result<&mut Configuration> {
        self.profiles.get_mut(id).ok_or_else(|| unknown_profile(id))
    }

    pub fn contains(&self, id: &ProfileId) -> bool {
        self.profiles.contains_key(id)
    }

    /// Drop a profile, its disk mirror, and announce it
    pub fn remove(&mut self, id: &ProfileId) -> Result<()> {
        let cfg = self.profiles.remove(id).ok_or_else(|| unknown_profile(id))?;
        cfg.discard_persistent_file();
        info!("Configuration {} removed, owner: {}", id, cfg.owner());
        self.events
            .publish(ConfigEvent::new(*id, EventType::Destroyed, cfg.owner()));
        Ok(())
    }

    /// Render a profile for `caller`
    ///
    /// A single-use profile claimed by the backend client is removed
    /// before this returns.
    pub fn fetch(&mut self, id: &ProfileId, caller: &str) -> Result<String> {
        let outcome = self.get_mut(id)?.fetch(caller);
        if outcome.consumed {
            self.remove(id)?;
        }
        Ok(outcome.config)
    }

    /// Profiles `caller` may list and `predicate` accepts
    ///
    /// An empty `caller` skips the access check.
    pub fn fetch_all<F>(&self, caller: &str, predicate: F) -> Vec<ProfileId>
    where
        F: Fn(&Configuration) -> bool,
    {
        self.profiles
            .values()
            .filter(|cfg| caller.is_empty() || cfg.check_acl(caller))
            .filter(|cfg| predicate(cfg))
            .map(|cfg| cfg.id())
            .collect()
    }

    pub fn by_name(&self, caller: &str, name: &str) -> Vec<ProfileId> {
        self.fetch_all(caller, |cfg| cfg.name() == name)
    }

    pub fn by_tag(&self, caller: &str, tag: &str) -> Vec<ProfileId> {
        self.fetch_all(caller, |cfg| cfg.has_tag(tag))
    }

    pub fn by_owner(&self, caller: &str, owner: Uid) -> Vec<ProfileId> {
        self.fetch_all(caller, |cfg| cfg.owner() == owner)
    }

    /// Hand a profile over to another user
    ///
    /// Allowed for whoever the profile itself authorizes, and for root.
    pub fn transfer_ownership(&mut self, id: &ProfileId, caller: &str, new_owner: Uid) -> Result<()> {
        let is_root = self
            .ctx
            .creds
            .uid(caller)
            .map(|uid| uid == 0)
            .unwrap_or(false);

        let cfg = self.get_mut(id)?;
        let op = Operation::Call(Method::TransferOwnership);
        if !is_root && !cfg.authorize(&AuthzRequest::new(op, caller)) {
            return Err(ConfigMgrError::AuthorizationDenied(cfg.rejection_message(op)));
        }
        cfg.transfer_ownership(new_owner)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn unknown_profile(id: &ProfileId) -> ConfigMgrError {
    ConfigMgrError::NotFound(format!("Unknown configuration profile: {}", id))
}

/// Candidate persistent files in `dir`
///
/// Only regular files and symlinks whose name is an identifier plus the
/// persistent suffix qualify. Directories are skipped quietly; anything
/// else is skipped with a warning.
pub fn persistent_file_list(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.len() != PERSISTENT_FILE_NAME_LEN
            || name.get(PERSISTENT_FILE_NAME_LEN - PERSISTENT_FILE_SUFFIX.len()..)
                != Some(PERSISTENT_FILE_SUFFIX)
        {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() && !file_type.is_symlink() {
            warn!("Ignoring '{}': not a regular file", entry.path().display());
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Property;
    use crate::credentials::{CallerRegistry, DEFAULT_BACKEND_PREFIX};
    use crate::options::ParseLimits;
    use tempfile::TempDir;

    const PROFILE: &str = "client\ndev tun\nremote vpn.example.com 1194\nca ca.crt\n";
    const BACKEND: Uid = 990;

    fn context(reg: &Arc<CallerRegistry>, state_dir: Option<PathBuf>) -> Arc<ManagerContext> {
        Arc::new(ManagerContext {
            creds: reg.clone(),
            backend_uid: BACKEND,
            backend_prefix: DEFAULT_BACKEND_PREFIX.to_string(),
            state_dir,
            atomic_writes: true,
            limits: ParseLimits::default(),
        })
    }

    #[test]
    fn test_import_and_search() {
        let reg = Arc::new(CallerRegistry::new());
        let alice = reg.connect(1000, 10);
        let bob = reg.connect(1001, 11);
        let mut store = ConfigStore::new(context(&reg, None));

        let a = store.import("work", PROFILE, false, false, 1000).unwrap();
        let b = store.import("home", PROFILE, false, false, 1001).unwrap();
        store.get_mut(&a).unwrap().add_tag("eu").unwrap();

        assert_eq!(store.fetch_all(&alice, |_| true), vec![a]);
        assert_eq!(store.by_name(&bob, "home"), vec![b]);
        assert!(store.by_name(&bob, "work").is_empty());
        assert_eq!(store.by_tag(&alice, "eu"), vec![a]);
        assert_eq!(store.by_owner("", 1001), vec![b]);
        assert_eq!(store.fetch_all("", |_| true).len(), 2);
    }

    #[test]
    fn test_remove() {
        let reg = Arc::new(CallerRegistry::new());
        let mut store = ConfigStore::new(context(&reg, None));
        let mut events = store.subscribe();

        let id = store.import("x", PROFILE, false, false, 1000).unwrap();
        store.remove(&id).unwrap();
        assert!(matches!(store.get(&id), Err(ConfigMgrError::NotFound(_))));
        assert!(matches!(store.remove(&id), Err(ConfigMgrError::NotFound(_))));

        let created = events.try_recv().unwrap();
        assert_eq!(created.kind, EventType::Created);
        let destroyed = events.try_recv().unwrap();
        assert_eq!(destroyed.kind, EventType::Destroyed);
        assert_eq!(destroyed.id, id);
        assert_eq!(destroyed.owner, 1000);
    }

    #[test]
    fn test_single_use_claim() {
        let reg = Arc::new(CallerRegistry::new());
        let owner = reg.connect(1000, 10);
        let backend = reg.connect(BACKEND, 4242);
        reg.request_name(&backend, &format!("{}4242", DEFAULT_BACKEND_PREFIX))
            .unwrap();
        let mut store = ConfigStore::new(context(&reg, None));

        let id = store.import("once", PROFILE, true, false, 1000).unwrap();
        store.fetch(&id, &owner).unwrap();
        assert!(store.contains(&id));

        let text = store.fetch(&id, &backend).unwrap();
        assert!(text.contains("remote vpn.example.com 1194"));
        assert!(!store.contains(&id));
        assert!(matches!(store.fetch(&id, &owner), Err(ConfigMgrError::NotFound(_))));
    }

    #[test]
    fn test_transfer_ownership() {
        let reg = Arc::new(CallerRegistry::new());
        let owner = reg.connect(1000, 10);
        let other = reg.connect(1001, 11);
        let root = reg.connect(0, 1);
        let mut store = ConfigStore::new(context(&reg, None));
        let id = store.import("x", PROFILE, false, false, 1000).unwrap();

        assert!(matches!(
            store.transfer_ownership(&id, &other, 1001),
            Err(ConfigMgrError::AuthorizationDenied(_))
        ));
        store.transfer_ownership(&id, &owner, 1001).unwrap();
        assert_eq!(store.get(&id).unwrap().owner(), 1001);
        store.transfer_ownership(&id, &root, 1000).unwrap();
        assert_eq!(store.get(&id).unwrap().owner(), 1000);
    }

    #[test]
    fn test_rehydration() {
        let dir = TempDir::new().unwrap();
        let reg = Arc::new(CallerRegistry::new());

        let id = {
            let mut store = ConfigStore::new(context(&reg, Some(dir.path().to_path_buf())));
            let id = store.import("persisted", PROFILE, false, true, 1000).unwrap();
            let cfg = store.get_mut(&id).unwrap();
            cfg.add_tag("kept").unwrap();
            cfg.set_override("persist-tun", true.into()).unwrap();
            store.import("volatile", PROFILE, false, false, 1000).unwrap();
            id
        };
        assert!(dir.path().join(id.file_name()).exists());

        // Files that must be ignored or skipped
        fs::write(dir.path().join(ProfileId::generate().file_name()), "{ not json").unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        fs::create_dir(dir.path().join(ProfileId::generate().file_name())).unwrap();

        let mut store = ConfigStore::new(context(&reg, Some(dir.path().to_path_buf())));
        assert_eq!(store.load_state_dir().unwrap(), 1);

        let cfg = store.get(&id).unwrap();
        assert_eq!(cfg.name(), "persisted");
        assert!(cfg.has_tag("kept"));
        assert!(cfg.get_override("persist-tun").is_some());
        assert!(cfg.is_persistent());
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let reg = Arc::new(CallerRegistry::new());
        let mut store = ConfigStore::new(context(&reg, Some(dir.path().to_path_buf())));

        let id = store.import("x", PROFILE, false, true, 1000).unwrap();
        let path = dir.path().join(id.file_name());
        assert!(path.exists());
        store.remove(&id).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_write_leaves_profile_unchanged() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("configs");
        fs::create_dir(&state_dir).unwrap();
        let reg = Arc::new(CallerRegistry::new());
        let mut store = ConfigStore::new(context(&reg, Some(state_dir.clone())));
        let id = store.import("x", PROFILE, false, true, 1000).unwrap();

        fs::remove_dir_all(&state_dir).unwrap();
        let cfg = store.get_mut(&id).unwrap();

        assert!(matches!(cfg.add_tag("work"), Err(ConfigMgrError::Io(_))));
        assert!(cfg.tags().is_empty());
        // Nothing was kept, so a retry fails the same way
        assert!(matches!(cfg.add_tag("work"), Err(ConfigMgrError::Io(_))));

        assert!(cfg.set_override("persist-tun", true.into()).is_err());
        assert!(cfg.get_override("persist-tun").is_none());

        assert!(cfg.set_property(Property::Name, &serde_json::Value::from("renamed")).is_err());
        assert_eq!(cfg.name(), "x");

        assert!(cfg.grant_access(1001).is_err());
        assert!(cfg.transfer_ownership(1001).is_err());
        assert_eq!(cfg.owner(), 1000);
        assert!(cfg.acl().grants().is_empty());

        // Once the directory is back the same change goes through
        fs::create_dir(&state_dir).unwrap();
        cfg.add_tag("work").unwrap();
        assert_eq!(cfg.tags(), ["work"]);
        assert!(state_dir.join(id.file_name()).exists());
    }

    #[test]
    fn test_file_filter() {
        let dir = TempDir::new().unwrap();
        let good = ProfileId::generate().file_name();
        fs::write(dir.path().join(&good), "{}").unwrap();
        fs::write(dir.path().join(good.replace(".json", ".jsox")), "{}").unwrap();
        fs::write(dir.path().join("short.json"), "{}").unwrap();

        let files = persistent_file_list(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join(good)]);
    }
}
