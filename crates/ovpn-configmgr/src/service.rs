//! Service Facade
//!
//! The operation surface exposed at the process boundary. Every per-profile
//! call resolves the identifier, asks the profile whether the caller is
//! authorized, and only then delegates to the profile or the store.

use crate::authz::{Authorize, AuthzRequest, Method, Operation, Property};
use crate::context::ManagerContext;
use crate::credentials::{CredentialsQuery, Uid};
use crate::error::{ConfigMgrError, Result};
use crate::events::ConfigEvent;
use crate::overrides::OverrideValue;
use crate::profile::ProfileId;
use crate::settings::ServiceSettings;
use crate::store::ConfigStore;
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Configuration manager service
#[derive(Debug)]
pub struct ConfigService {
    store: ConfigStore,
}

impl ConfigService {
    /// Create the service and rehydrate persistent profiles
    ///
    /// The state directory is created when missing.
    pub fn new(settings: &ServiceSettings, creds: Arc<dyn CredentialsQuery>) -> Result<Self> {
        if let Some(dir) = &settings.state_dir {
            fs::create_dir_all(dir)?;
        }

        let ctx = Arc::new(ManagerContext::new(settings, creds));
        let mut store = ConfigStore::new(ctx);
        store.load_state_dir()?;
        Ok(Self { store })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Receive created/destroyed events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.store.subscribe()
    }

    /// Import a configuration owned by the caller
    pub fn import(
        &mut self,
        caller: &str,
        name: &str,
        config_text: &str,
        single_use: bool,
        persistent: bool,
    ) -> Result<ProfileId> {
        let owner = self.creds().uid(caller)?;
        self.store
            .import(name, config_text, single_use, persistent, owner)
    }

    pub fn fetch_available_configs(&self, caller: &str) -> Vec<ProfileId> {
        self.store.fetch_all(caller, |_| true)
    }

    pub fn lookup_config_name(&self, caller: &str, name: &str) -> Vec<ProfileId> {
        self.store.by_name(caller, name)
    }

    pub fn search_by_tag(&self, caller: &str, tag: &str) -> Vec<ProfileId> {
        self.store.by_tag(caller, tag)
    }

    /// Profiles owned by `owner`, given as a decimal uid
    pub fn search_by_owner(&self, caller: &str, owner: &str) -> Result<Vec<ProfileId>> {
        let owner: Uid = owner.trim().parse().map_err(|_| {
            ConfigMgrError::InvalidArgument(format!("Invalid owner '{}'", owner))
        })?;
        Ok(self.store.by_owner(caller, owner))
    }

    pub fn transfer_ownership(&mut self, caller: &str, id: &ProfileId, new_owner: Uid) -> Result<()> {
        self.store.transfer_ownership(id, caller, new_owner)
    }

    /// Rendered configuration text
    pub fn fetch(&mut self, caller: &str, id: &ProfileId) -> Result<String> {
        self.authorize(caller, id, Operation::Call(Method::Fetch))?;
        self.store.fetch(id, caller)
    }

    /// Structured option data
    pub fn fetch_json(&self, caller: &str, id: &ProfileId) -> Result<Value> {
        self.authorize(caller, id, Operation::Call(Method::FetchJson))?;
        Ok(self.store.get(id)?.fetch_json())
    }

    pub fn set_override(
        &mut self,
        caller: &str,
        id: &ProfileId,
        key: &str,
        value: OverrideValue,
    ) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::SetOverride))?;
        self.store.get_mut(id)?.set_override(key, value)?;
        Ok(())
    }

    pub fn unset_override(&mut self, caller: &str, id: &ProfileId, key: &str) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::UnsetOverride))?;
        self.store.get_mut(id)?.unset_override(key)
    }

    pub fn add_tag(&mut self, caller: &str, id: &ProfileId, tag: &str) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::AddTag))?;
        self.store.get_mut(id)?.add_tag(tag)
    }

    pub fn remove_tag(&mut self, caller: &str, id: &ProfileId, tag: &str) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::RemoveTag))?;
        self.store.get_mut(id)?.remove_tag(tag)
    }

    pub fn access_grant(&mut self, caller: &str, id: &ProfileId, uid: Uid) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::AccessGrant))?;
        self.store.get_mut(id)?.grant_access(uid)
    }

    pub fn access_revoke(&mut self, caller: &str, id: &ProfileId, uid: Uid) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::AccessRevoke))?;
        self.store.get_mut(id)?.revoke_access(uid)
    }

    pub fn seal(&mut self, caller: &str, id: &ProfileId) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::Seal))?;
        self.store.get_mut(id)?.seal()
    }

    pub fn remove(&mut self, caller: &str, id: &ProfileId) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::Remove))?;
        info!("Removing configuration {} on request from {}", id, caller);
        self.store.remove(id)
    }

    /// Re-run validation; an invalid profile yields the diagnostic as error
    pub fn validate(&mut self, caller: &str, id: &ProfileId) -> Result<()> {
        self.authorize(caller, id, Operation::Call(Method::Validate))?;
        let (valid, diagnostic) = self.store.get_mut(id)?.validate();
        if valid {
            Ok(())
        } else {
            Err(ConfigMgrError::Validation(diagnostic))
        }
    }

    pub fn get_property(&self, caller: &str, id: &ProfileId, prop: Property) -> Result<Value> {
        self.authorize(caller, id, Operation::Get(prop))?;
        Ok(self.store.get(id)?.get_property(prop))
    }

    pub fn set_property(
        &mut self,
        caller: &str,
        id: &ProfileId,
        prop: Property,
        value: &Value,
    ) -> Result<()> {
        self.authorize(caller, id, Operation::Set(prop))?;
        self.store.get_mut(id)?.set_property(prop, value)
    }

    fn creds(&self) -> &dyn CredentialsQuery {
        self.store.context().creds.as_ref()
    }

    fn authorize(&self, caller: &str, id: &ProfileId, operation: Operation) -> Result<()> {
        let cfg = self.store.get(id)?;
        if cfg.authorize(&AuthzRequest::new(operation, caller)) {
            return Ok(());
        }
        let message = cfg.rejection_message(operation);
        warn!("{:?} on {} denied for {}: {}", operation, id, caller, message);
        Err(ConfigMgrError::AuthorizationDenied(message))
    }
}
