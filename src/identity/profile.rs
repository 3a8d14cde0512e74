use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

/// module name -> privilege keys
pub type ModuleMap = BTreeMap<String, BTreeSet<String>>;
/// application name -> modules
pub type ApplicationMap = BTreeMap<String, ModuleMap>;

/// Identity payload returned by the "who am I" endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_uuid: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub applications: ApplicationMap,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), ..Default::default() }
    }

    /// Builder used mostly by tests and fixtures.
    pub fn with_privileges<I, S>(mut self, application: &str, module: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applications
            .entry(application.to_string())
            .or_default()
            .entry(module.to_string())
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn privileges_for(&self, application: &str, module: &str) -> Option<&BTreeSet<String>> {
        self.applications.get(application).and_then(|m| m.get(module))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

// The backend emits numeric ids for some tenants and string ids for others.
fn value_to_id(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    value_to_id(v).ok_or_else(|| serde::de::Error::custom("expected string or number id"))
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    if v.is_null() { return Ok(None); }
    value_to_id(v).map(Some).ok_or_else(|| serde::de::Error::custom("expected string or number id"))
}
