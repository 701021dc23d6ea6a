//! Declared plugin properties and their binding from config sections.
//!
//! A plugin declares its properties as a static slice of [`Property`]. At
//! load time the manager binds them against the plugin's config section:
//! required properties must be present, optional ones fall back to their
//! default, and every present value is coerced to the declared type.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::error::{PluginError, PluginResult};

/// A plugin's raw config section: flat key to string value.
pub type Section = BTreeMap<String, String>;

/// The type a property value is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// Free text.
    String,
    /// Signed integer.
    Integer,
    /// Floating point.
    Float,
    /// `true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`.
    Boolean,
    /// A number with an optional `ms`, `s`, `m`, `h` or `d` suffix.
    Duration,
    /// Comma separated, entries trimmed, empty entries dropped.
    List,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Duration => "duration",
            Self::List => "list",
        })
    }
}

/// A bound, typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// See [`PropertyType::String`].
    String(String),
    /// See [`PropertyType::Integer`].
    Integer(i64),
    /// See [`PropertyType::Float`].
    Float(f64),
    /// See [`PropertyType::Boolean`].
    Boolean(bool),
    /// See [`PropertyType::Duration`].
    Duration(Duration),
    /// See [`PropertyType::List`].
    List(Vec<String>),
}

/// Declaration of one config property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    /// Key in the plugin's section.
    pub name: &'static str,
    /// Declared type.
    pub kind: PropertyType,
    /// Whether loading fails when the key is absent.
    pub required: bool,
    /// Raw default used when the key is absent.
    pub default: Option<&'static str>,
    /// One-line description.
    pub doc: &'static str,
}

impl Property {
    /// A property that must be present.
    #[must_use]
    pub const fn required(name: &'static str, kind: PropertyType) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            doc: "",
        }
    }

    /// A property with a default.
    #[must_use]
    pub const fn with_default(name: &'static str, kind: PropertyType, default: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
            doc: "",
        }
    }

    /// A property that may be absent with no default.
    #[must_use]
    pub const fn optional(name: &'static str, kind: PropertyType) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            doc: "",
        }
    }

    /// Attach a description.
    #[must_use]
    pub const fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    /// Coerce `raw` to this property's type.
    ///
    /// # Errors
    ///
    /// Returns the reason the value was rejected.
    pub fn coerce(&self, raw: &str) -> Result<PropertyValue, String> {
        let trimmed = raw.trim();
        match self.kind {
            PropertyType::String => Ok(PropertyValue::String(raw.to_string())),
            PropertyType::Integer => trimmed
                .parse()
                .map(PropertyValue::Integer)
                .map_err(|e| format!("expected an integer: {e}")),
            PropertyType::Float => trimmed
                .parse()
                .map(PropertyValue::Float)
                .map_err(|e| format!("expected a number: {e}")),
            PropertyType::Boolean => parse_bool(trimmed).map(PropertyValue::Boolean),
            PropertyType::Duration => parse_duration(trimmed).map(PropertyValue::Duration),
            PropertyType::List => Ok(PropertyValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}

/// Parse `"500ms"`, `"30"`, `"30s"`, `"10m"`, `"2h"` or `"1d"`.
///
/// # Errors
///
/// Returns a description of the problem for malformed input or overflow.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        return Err(format!("expected a duration like 30s or 10m, got '{raw}'"));
    }
    let amount: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration amount: {e}"))?;
    let millis_per_unit: u64 = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    amount
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| "duration too large".to_string())
}

/// A plugin's bound properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Bind `declared` against `section` for `plugin`.
    ///
    /// Keys in the section that no property declares are ignored with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MissingProperty`] or
    /// [`PluginError::InvalidProperty`].
    pub fn bind(plugin: &str, declared: &[Property], section: &Section) -> PluginResult<Self> {
        let mut values = BTreeMap::new();
        for property in declared {
            let raw = match (section.get(property.name), property.default) {
                (Some(raw), _) => raw.as_str(),
                (None, Some(default)) => default,
                (None, None) if property.required => {
                    return Err(PluginError::MissingProperty {
                        plugin: plugin.to_string(),
                        property: property.name.to_string(),
                    });
                },
                (None, None) => continue,
            };
            let value = property
                .coerce(raw)
                .map_err(|message| PluginError::InvalidProperty {
                    plugin: plugin.to_string(),
                    property: property.name.to_string(),
                    value: raw.to_string(),
                    message,
                })?;
            values.insert(property.name.to_string(), value);
        }

        for key in section.keys() {
            if !declared.iter().any(|p| p.name == key) {
                warn!(plugin, key = %key, "Ignoring undeclared plugin property");
            }
        }
        Ok(Self { values })
    }

    /// Raw bound value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Whether `name` has a value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// A string property.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// An integer property.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            PropertyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// A float property.
    #[must_use]
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            PropertyValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// A boolean property.
    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// A duration property.
    #[must_use]
    pub fn duration(&self, name: &str) -> Option<Duration> {
        match self.get(name)? {
            PropertyValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    /// A list property.
    #[must_use]
    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.get(name)? {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }
}
