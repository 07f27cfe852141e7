//! Page settings: a map over a fixed set of keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{HostError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SettingKey {
    #[serde(rename = "loadImages")]
    LoadImages,
    #[serde(rename = "loadPlugins")]
    LoadPlugins,
    #[serde(rename = "javascriptEnabled")]
    JavascriptEnabled,
    #[serde(rename = "XSSAuditingEnabled")]
    XssAuditing,
    #[serde(rename = "userAgent")]
    UserAgent,
    #[serde(rename = "localToRemoteUrlAccessEnabled")]
    LocalToRemoteUrlAccess,
    #[serde(rename = "webSecurityEnabled")]
    WebSecurityEnabled,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        SettingKey::LoadImages,
        SettingKey::LoadPlugins,
        SettingKey::JavascriptEnabled,
        SettingKey::XssAuditing,
        SettingKey::UserAgent,
        SettingKey::LocalToRemoteUrlAccess,
        SettingKey::WebSecurityEnabled,
    ];

    /// Name as seen from script.
    pub fn name(self) -> &'static str {
        match self {
            SettingKey::LoadImages => "loadImages",
            SettingKey::LoadPlugins => "loadPlugins",
            SettingKey::JavascriptEnabled => "javascriptEnabled",
            SettingKey::XssAuditing => "XSSAuditingEnabled",
            SettingKey::UserAgent => "userAgent",
            SettingKey::LocalToRemoteUrlAccess => "localToRemoteUrlAccessEnabled",
            SettingKey::WebSecurityEnabled => "webSecurityEnabled",
        }
    }

    fn expects_text(self) -> bool {
        matches!(self, SettingKey::UserAgent)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SettingKey {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| HostError::UnknownSetting(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

/// Settings applied to a page. Keys are always [`SettingKey`]s and each value
/// has the type its key expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PageSettings(BTreeMap<SettingKey, SettingValue>);

impl PageSettings {
    /// The settings every new page starts from.
    pub fn defaults_from(config: &Config, user_agent: &str) -> Self {
        let mut settings = Self::default();
        settings.put(SettingKey::LoadImages, config.auto_load_images);
        settings.put(SettingKey::LoadPlugins, config.plugins_enabled);
        settings.put(SettingKey::JavascriptEnabled, true);
        settings.put(SettingKey::XssAuditing, false);
        settings.put(SettingKey::UserAgent, user_agent);
        settings.put(SettingKey::LocalToRemoteUrlAccess, config.local_to_remote_url_access);
        settings.put(SettingKey::WebSecurityEnabled, config.web_security);
        settings
    }

    /// Parse settings handed over from script. Unknown keys and values of the
    /// wrong type are rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(HostError::InvalidSettingValue {
                key: String::from("settings"),
                expected: "an object",
            });
        };

        let mut settings = Self::default();
        for (name, value) in map {
            let key: SettingKey = name.parse()?;
            let value = match value {
                serde_json::Value::Bool(b) => SettingValue::Bool(b),
                serde_json::Value::String(s) => SettingValue::Text(s),
                _ => return Err(type_mismatch(key)),
            };
            settings.insert(key, value)?;
        }
        Ok(settings)
    }

    pub fn insert(&mut self, key: SettingKey, value: SettingValue) -> Result<()> {
        match (&value, key.expects_text()) {
            (SettingValue::Text(_), true) | (SettingValue::Bool(_), false) => {
                self.0.insert(key, value);
                Ok(())
            }
            _ => Err(type_mismatch(key)),
        }
    }

    fn put(&mut self, key: SettingKey, value: impl Into<SettingValue>) {
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: SettingKey) -> Option<&SettingValue> {
        self.0.get(&key)
    }

    pub fn flag(&self, key: SettingKey) -> Option<bool> {
        match self.0.get(&key) {
            Some(SettingValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn text(&self, key: SettingKey) -> Option<&str> {
        match self.0.get(&key) {
            Some(SettingValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Overlay `other` onto these settings.
    pub fn merge(&mut self, other: &PageSettings) {
        for (key, value) in &other.0 {
            self.0.insert(*key, value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        SettingValue::Bool(b) => serde_json::Value::Bool(*b),
                        SettingValue::Text(s) => serde_json::Value::String(s.clone()),
                    };
                    (key.name().to_string(), value)
                })
                .collect(),
        )
    }
}

fn type_mismatch(key: SettingKey) -> HostError {
    HostError::InvalidSettingValue {
        key: key.name().to_string(),
        expected: if key.expects_text() { "a string" } else { "a boolean" },
    }
}
