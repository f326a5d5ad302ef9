/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

use ferry_config_macro::FerryPreferences;
use log::{debug, warn};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A type-erased preference value, used by the string-keyed accessors.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PrefValue {
    pub fn from_json_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(value) => Some(PrefValue::Bool(*value)),
            Value::Number(number) => number
                .as_i64()
                .map(PrefValue::Int)
                .or_else(|| number.as_f64().map(PrefValue::Float)),
            Value::String(value) => Some(PrefValue::Str(value.clone())),
            _ => None,
        }
    }
}

impl From<bool> for PrefValue {
    fn from(value: bool) -> Self {
        PrefValue::Bool(value)
    }
}

impl From<i64> for PrefValue {
    fn from(value: i64) -> Self {
        PrefValue::Int(value)
    }
}

impl From<f64> for PrefValue {
    fn from(value: f64) -> Self {
        PrefValue::Float(value)
    }
}

impl From<String> for PrefValue {
    fn from(value: String) -> Self {
        PrefValue::Str(value)
    }
}

impl TryFrom<PrefValue> for bool {
    type Error = PrefValue;

    fn try_from(value: PrefValue) -> Result<Self, Self::Error> {
        match value {
            PrefValue::Bool(value) => Ok(value),
            other => Err(other),
        }
    }
}

impl TryFrom<PrefValue> for i64 {
    type Error = PrefValue;

    fn try_from(value: PrefValue) -> Result<Self, Self::Error> {
        match value {
            PrefValue::Int(value) => Ok(value),
            other => Err(other),
        }
    }
}

impl TryFrom<PrefValue> for f64 {
    type Error = PrefValue;

    fn try_from(value: PrefValue) -> Result<Self, Self::Error> {
        match value {
            PrefValue::Float(value) => Ok(value),
            PrefValue::Int(value) => Ok(value as f64),
            other => Err(other),
        }
    }
}

impl TryFrom<PrefValue> for String {
    type Error = PrefValue;

    fn try_from(value: PrefValue) -> Result<Self, Self::Error> {
        match value {
            PrefValue::Str(value) => Ok(value),
            other => Err(other),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum PrefError {
    NoSuchPref(String),
    TypeMismatch(&'static str),
    InvalidJson(String),
}

impl fmt::Display for PrefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrefError::NoSuchPref(name) => write!(f, "unknown preference {:?}", name),
            PrefError::TypeMismatch(name) => write!(f, "wrong value type for preference {}", name),
            PrefError::InvalidJson(error) => write!(f, "could not parse preferences: {}", error),
        }
    }
}

impl std::error::Error for PrefError {}

/// Something that wants to know when preferences change. Observers are called
/// with the names and new values of every preference that changed.
pub trait PreferencesObserver: Send + Sync {
    fn prefs_changed(&self, _changes: &[(&'static str, PrefValue)]) {}
}

#[derive(Clone, Debug, Deserialize, FerryPreferences, PartialEq, Serialize)]
pub struct Preferences {
    /// The number of worker contexts a single browsing context may keep alive
    /// at once.
    pub dom_workers_max_per_context: i64,
    /// The number of worker contexts the whole session may keep alive at once.
    pub dom_workers_max_per_session: i64,
}

impl Preferences {
    const fn const_default() -> Self {
        Self {
            dom_workers_max_per_context: 16,
            dom_workers_max_per_session: 64,
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::const_default()
    }
}

/// The live preference set of one host, plus whoever is watching it.
#[derive(Default)]
pub struct PreferenceStore {
    preferences: RwLock<Preferences>,
    observers: RwLock<Vec<Box<dyn PreferencesObserver>>>,
}

impl PreferenceStore {
    pub fn new(preferences: Preferences) -> Self {
        PreferenceStore {
            preferences: RwLock::new(preferences),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Build a store from a JSON object of preference name to value. Unknown
    /// names are ignored with a warning, matching how stale prefs files are
    /// treated.
    pub fn from_json(json: &str) -> Result<Self, PrefError> {
        let values: serde_json::Map<String, Value> =
            serde_json::from_str(json).map_err(|error| PrefError::InvalidJson(error.to_string()))?;
        let mut preferences = Preferences::default();
        for (name, value) in values.iter() {
            if !Preferences::exists(name) {
                warn!("Ignoring unknown preference {:?}", name);
                continue;
            }
            let Some(value) = PrefValue::from_json_value(value) else {
                return Err(PrefError::InvalidJson(format!(
                    "unsupported value for {}",
                    name
                )));
            };
            preferences.set_value(name, value)?;
        }
        Ok(Self::new(preferences))
    }

    pub fn get(&self) -> RwLockReadGuard<'_, Preferences> {
        self.preferences.read()
    }

    pub fn add_observer(&self, observer: Box<dyn PreferencesObserver>) {
        self.observers.write().push(observer);
    }

    /// Replace the whole preference set, notifying observers of what changed.
    pub fn set(&self, preferences: Preferences) {
        let changed = {
            let mut current = self.preferences.write();
            let changed = preferences.diff(&current);
            *current = preferences;
            changed
        };
        self.notify(&changed);
    }

    pub fn set_value(&self, name: &str, value: PrefValue) -> Result<(), PrefError> {
        let mut preferences = self.get().clone();
        preferences.set_value(name, value)?;
        self.set(preferences);
        Ok(())
    }

    fn notify(&self, changed: &[(&'static str, PrefValue)]) {
        if changed.is_empty() {
            return;
        }
        debug!("Preferences changed: {:?}", changed);
        for observer in self.observers.read().iter() {
            observer.prefs_changed(changed);
        }
    }
}
