//! Wire protocol
//!
//! One JSON object per line in each direction. Requests name a method, an
//! optional target profile and a map of arguments:
//!
//! ```text
//! {"id": 1, "method": "AddTag", "target": "<uuid>", "args": {"tag": "work"}}
//! {"id": 1, "ok": true, "result": null}
//! {"id": 2, "ok": false, "error": {"kind": "...", "message": "..."}}
//! {"event": {"id": "<uuid>", "kind": "created", "owner": 1000}}
//! ```

use ovpn_configmgr::{
    CallerRegistry, ConfigEvent, ConfigMgrError, ConfigService, OverrideValue, ProfileId,
    Property, Result, Uid,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Switches a connection to event streaming; handled by the server
pub const SUBSCRIBE: &str = "Subscribe";

/// A request line
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// A response line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self { id, ok: true, result: Some(result), error: None }
    }

    pub fn failure(id: u64, err: &ConfigMgrError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn from_result(id: u64, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, &e),
        }
    }
}

/// An event line
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage<'a> {
    pub event: &'a ConfigEvent,
}

/// Execute one request on behalf of `caller`
pub fn dispatch(
    service: &mut ConfigService,
    registry: &CallerRegistry,
    caller: &str,
    req: &Request,
) -> Result<Value> {
    let args = &req.args;
    match req.method.as_str() {
        "Import" => {
            let id = service.import(
                caller,
                str_arg(args, "name")?,
                str_arg(args, "config")?,
                bool_arg(args, "single_use")?,
                bool_arg(args, "persistent")?,
            )?;
            Ok(json!(id))
        }
        "FetchAvailableConfigs" => Ok(json!(service.fetch_available_configs(caller))),
        "LookupConfigName" => Ok(json!(service.lookup_config_name(caller, str_arg(args, "name")?))),
        "SearchByTag" => Ok(json!(service.search_by_tag(caller, str_arg(args, "tag")?))),
        "SearchByOwner" => {
            let owner = match args.get("owner") {
                Some(Value::Number(n)) => n.to_string(),
                _ => str_arg(args, "owner")?.to_string(),
            };
            Ok(json!(service.search_by_owner(caller, &owner)?))
        }
        "TransferOwnership" => {
            service.transfer_ownership(caller, &target(req)?, uid_arg(args, "new_owner")?)?;
            Ok(Value::Null)
        }
        "Fetch" => Ok(json!(service.fetch(caller, &target(req)?)?)),
        "FetchJSON" => service.fetch_json(caller, &target(req)?),
        "SetOverride" => {
            let value: OverrideValue = match args.get("value") {
                Some(Value::Bool(b)) => (*b).into(),
                Some(Value::String(s)) => s.as_str().into(),
                _ => {
                    return Err(ConfigMgrError::InvalidArgument(
                        "Override value must be a string or a boolean".into(),
                    ))
                }
            };
            service.set_override(caller, &target(req)?, str_arg(args, "key")?, value)?;
            Ok(Value::Null)
        }
        "UnsetOverride" => {
            service.unset_override(caller, &target(req)?, str_arg(args, "key")?)?;
            Ok(Value::Null)
        }
        "AddTag" => {
            service.add_tag(caller, &target(req)?, str_arg(args, "tag")?)?;
            Ok(Value::Null)
        }
        "RemoveTag" => {
            service.remove_tag(caller, &target(req)?, str_arg(args, "tag")?)?;
            Ok(Value::Null)
        }
        "AccessGrant" => {
            service.access_grant(caller, &target(req)?, uid_arg(args, "uid")?)?;
            Ok(Value::Null)
        }
        "AccessRevoke" => {
            service.access_revoke(caller, &target(req)?, uid_arg(args, "uid")?)?;
            Ok(Value::Null)
        }
        "Seal" => {
            service.seal(caller, &target(req)?)?;
            Ok(Value::Null)
        }
        "Remove" => {
            service.remove(caller, &target(req)?)?;
            Ok(Value::Null)
        }
        "Validate" => {
            service.validate(caller, &target(req)?)?;
            Ok(Value::Null)
        }
        "Get" => {
            let prop: Property = str_arg(args, "property")?.parse()?;
            service.get_property(caller, &target(req)?, prop)
        }
        "Set" => {
            let prop: Property = str_arg(args, "property")?.parse()?;
            let value = args.get("value").unwrap_or(&Value::Null);
            service.set_property(caller, &target(req)?, prop, value)?;
            Ok(Value::Null)
        }
        "RequestName" => {
            registry.request_name(caller, str_arg(args, "name")?)?;
            Ok(Value::Null)
        }
        "ReleaseName" => {
            registry.release_name(caller, str_arg(args, "name")?)?;
            Ok(Value::Null)
        }
        other => Err(ConfigMgrError::InvalidArgument(format!(
            "Unknown method '{}'",
            other
        ))),
    }
}

fn target(req: &Request) -> Result<ProfileId> {
    if req.target.is_empty() {
        return Err(ConfigMgrError::InvalidArgument(format!(
            "{} requires a target profile",
            req.method
        )));
    }
    req.target.parse()
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigMgrError::InvalidArgument(format!("Missing string argument '{}'", name)))
}

fn bool_arg(args: &Value, name: &str) -> Result<bool> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ConfigMgrError::InvalidArgument(format!(
            "Argument '{}' must be a boolean",
            name
        ))),
    }
}

fn uid_arg(args: &Value, name: &str) -> Result<Uid> {
    args.get(name)
        .and_then(Value::as_u64)
        .and_then(|v| Uid::try_from(v).ok())
        .ok_or_else(|| ConfigMgrError::InvalidArgument(format!("Missing uid argument '{}'", name)))
}
