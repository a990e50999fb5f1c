//! OpenVPN 3 Configuration Manager
//!
//! Stores imported VPN configuration profiles on behalf of local users and
//! decides, for every remote call, whether the calling process may perform
//! it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Transport (IPC host)                   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ caller + operation
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  ConfigService ── resolve id ── authorize ── delegate    │
//! │        │                                                 │
//! │        ▼                                                 │
//! │  ConfigStore ──▶ Configuration ──▶ AccessControlList     │
//! │        │              │                                  │
//! │        ▼              ▼                                  │
//! │    EventBus     <state_dir>/<uuid>.json                  │
//! └──────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ uid / pid / name lookups
//!                    CredentialsQuery (CallerRegistry)
//! ```
//!
//! # Features
//!
//! - **Per-operation authorization**: owner, grants, public access, sealed
//!   and locked-down profiles
//! - **Overrides**: a fixed schema of typed client-side settings
//! - **Persistence**: profiles mirrored to disk and rehydrated on start
//! - **Single-use profiles**: removed once claimed by the verified VPN
//!   backend client

mod acl;
mod authz;
mod context;
mod credentials;
mod error;
mod events;
mod options;
mod overrides;
mod profile;
mod service;
mod settings;
mod store;

pub use acl::AccessControlList;
pub use authz::{Authorize, AuthzRequest, Method, Operation, Property};
pub use context::ManagerContext;
pub use credentials::{
    is_backend_client, CallerRegistry, CredentialsQuery, Pid, Uid, DEFAULT_BACKEND_PREFIX,
};
pub use error::{ConfigMgrError, Result};
pub use events::{ConfigEvent, EventBus, EventType};
pub use options::{filter_ctrl_chars, Directive, OptionList, ParseLimits};
pub use overrides::{
    lookup_override, Override, OverrideType, OverrideValue, ValidOverride, CONFIG_PROFILE_OVERRIDES,
};
pub use profile::{Configuration, FetchOutcome, ProfileId, ProfileRecord, MAX_TAG_LENGTH};
pub use service::ConfigService;
pub use settings::ServiceSettings;
pub use store::{persistent_file_list, ConfigStore};
