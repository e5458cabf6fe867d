//! Per-driver environment settings.
//!
//! Settings arrive as one flat map keyed `"DriverName.setting"`. Each driver
//! instance receives only its own entries with the `DriverName.` prefix
//! stripped. Keys without a dot are shared by every driver; a driver's own
//! entry wins over a shared one with the same name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Settings visible to one driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverSettings {
    values: BTreeMap<String, Value>,
}

impl DriverSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the settings meant for `driver_name` out of a flat map.
    #[must_use]
    pub fn scoped(flat: &BTreeMap<String, Value>, driver_name: &str) -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in flat {
            if !key.contains('.') {
                values.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        for (key, value) in flat {
            if let Some((owner, setting)) = key.split_once('.')
                && owner == driver_name
                && !setting.is_empty()
            {
                values.insert(setting.to_string(), value.clone());
            }
        }
        Self { values }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String setting; non-string values are rendered as JSON.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
