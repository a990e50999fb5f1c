//! Configuration Profile Overrides
//!
//! A fixed table of client-side settings a user may apply on top of an
//! imported profile. Keys not listed here can never be stored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type an override key accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideType {
    String,
    Boolean,
}

impl OverrideType {
    /// Name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            OverrideType::String => "string",
            OverrideType::Boolean => "boolean",
        }
    }
}

/// One permissible override key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidOverride {
    pub key: &'static str,
    pub kind: OverrideType,
    pub help: &'static str,
    /// Space separated list of accepted values, when the set is closed
    pub values_hint: Option<&'static str>,
}

impl ValidOverride {
    const fn string(key: &'static str, help: &'static str) -> Self {
        Self { key, kind: OverrideType::String, help, values_hint: None }
    }

    const fn boolean(key: &'static str, help: &'static str) -> Self {
        Self { key, kind: OverrideType::Boolean, help, values_hint: None }
    }

    const fn hinted(key: &'static str, help: &'static str, hint: &'static str) -> Self {
        Self { key, kind: OverrideType::String, help, values_hint: Some(hint) }
    }

    /// Check a value against the declared type
    pub fn accepts(&self, value: &OverrideValue) -> bool {
        self.kind == value.kind()
    }
}

/// All supported profile overrides
pub const CONFIG_PROFILE_OVERRIDES: &[ValidOverride] = &[
    ValidOverride::string("server-override", "Replace the remote, connecting to this server instead"),
    ValidOverride::string("port-override", "Replace the remote port, connecting to this port instead"),
    ValidOverride::hinted("proto-override", "Overrides the protocol being used", "tcp udp"),
    ValidOverride::hinted("ipv6", "Sets the IPv6 policy of the client", "yes no default"),
    ValidOverride::boolean("persist-tun", "Do not tear down the tun device on reconnect"),
    ValidOverride::boolean("dns-fallback-google", "Use Google DNS as fallback when no DNS server is pushed"),
    ValidOverride::boolean("dns-setup-disabled", "Do not change the DNS settings on the system"),
    ValidOverride::boolean("dns-sync-lookup", "Use synchronous DNS lookups for remote names"),
    ValidOverride::boolean("auth-fail-retry", "Continue connecting on auth failure"),
    ValidOverride::boolean("no-client-cert", "Do not send a client certificate"),
    ValidOverride::hinted("allow-compression", "Set compression mode", "no asym yes"),
    ValidOverride::boolean("enable-legacy-algorithms", "Enable legacy and insecure algorithms"),
    ValidOverride::hinted(
        "tls-version-min",
        "Sets the minimal TLS version for the control channel",
        "tls_1_0 tls_1_1 tls_1_2 tls_1_3",
    ),
    ValidOverride::hinted(
        "tls-cert-profile",
        "Sets the TLS certificate profile",
        "legacy preferred suiteb",
    ),
    ValidOverride::string("proxy-host", "HTTP proxy to use for the connection"),
    ValidOverride::string("proxy-port", "Port of the HTTP proxy"),
    ValidOverride::string("proxy-username", "Username for the HTTP proxy"),
    ValidOverride::string("proxy-password", "Password for the HTTP proxy"),
    ValidOverride::boolean("proxy-auth-cleartext", "Allow clear text authentication with the HTTP proxy"),
    ValidOverride::hinted("log-level", "Sets the log verbosity of the VPN session", "0 1 2 3 4 5 6"),
    ValidOverride::string("enterprise-profile", "Device posture check profile to use"),
    ValidOverride::hinted(
        "automatic-restart",
        "Restart the session automatically on unexpected termination",
        "no on-failure",
    ),
];

/// Find an override definition by key
///
/// With `ignore_case` the key is compared without regard to ASCII case.
pub fn lookup_override(key: &str, ignore_case: bool) -> Option<&'static ValidOverride> {
    CONFIG_PROFILE_OVERRIDES.iter().find(|vo| {
        vo.key == key || (ignore_case && vo.key.eq_ignore_ascii_case(key))
    })
}

/// Value of an applied override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Boolean(bool),
    String(String),
}

impl OverrideValue {
    /// Type tag of this value
    pub fn kind(&self) -> OverrideType {
        match self {
            OverrideValue::Boolean(_) => OverrideType::Boolean,
            OverrideValue::String(_) => OverrideType::String,
        }
    }
}

impl fmt::Display for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideValue::Boolean(b) => write!(f, "{}", b),
            OverrideValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for OverrideValue {
    fn from(value: bool) -> Self {
        OverrideValue::Boolean(value)
    }
}

impl From<&str> for OverrideValue {
    fn from(value: &str) -> Self {
        OverrideValue::String(value.to_string())
    }
}

impl From<String> for OverrideValue {
    fn from(value: String) -> Self {
        OverrideValue::String(value)
    }
}

/// An override stored on a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: &'static str,
    pub value: OverrideValue,
}
