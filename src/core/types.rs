//! Core data types for dataref subscription and change delivery.
//!
//! Key types for integrators:
//! - [`DatarefKey`]: parsed dataref identifier with array index / precision suffix
//! - [`DatarefValue`]: scalar or array value as received from the simulator
//! - [`ChangeSet`]: batch of keys whose cached value changed in one update
//! - [`ValueTransform`]: unit conversion applied to raw values before rounding

use crate::error::{Error, Result};
use crate::protocol::SUBSCRIBE_NAME_LEN;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dataref identifier as declared by a caller.
///
/// The composite string form carries optional suffix metadata:
///
/// ```text
/// sim/cockpit/autopilot/heading_mag        plain name
/// sim/aircraft/parts/acf_gear_deploy[0]    array element 0
/// sim/cockpit/misc/barometer_setting,2     rounded to 2 decimals
/// AirbusFBW/OHPLightsATA28_Raw[14],1       both
/// ```
///
/// The wire name (everything before the comma) is what goes into subscribe
/// requests; the precision only affects local rounding and change detection.
/// Equality and hashing are by the normalized composite string.
#[derive(Debug, Clone)]
pub struct DatarefKey {
    raw: String,
    name: String,
    index: Option<usize>,
    precision: Option<u32>,
}

impl DatarefKey {
    /// Parse a composite key string.
    ///
    /// Rejects an empty name, a non-numeric precision suffix, a malformed
    /// array-index bracket, and a wire name that does not fit the subscribe
    /// request's fixed name field.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (name, precision) = match spec.split_once(',') {
            Some((name, prec)) => {
                let prec: u32 = prec.trim().parse().map_err(|_| {
                    Error::InvalidKey(spec.to_string(), "precision is not an integer".into())
                })?;
                (name.trim(), Some(prec))
            }
            None => (spec, None),
        };

        if name.is_empty() {
            return Err(Error::InvalidKey(spec.to_string(), "empty name".into()));
        }
        if name.len() > SUBSCRIBE_NAME_LEN {
            return Err(Error::NameTooLong {
                name: name.to_string(),
                limit: SUBSCRIBE_NAME_LEN,
            });
        }

        let index = match name.find('[') {
            Some(open) => {
                let inner = name[open + 1..].strip_suffix(']').ok_or_else(|| {
                    Error::InvalidKey(spec.to_string(), "unterminated array index".into())
                })?;
                let idx: usize = inner.parse().map_err(|_| {
                    Error::InvalidKey(spec.to_string(), "array index is not an integer".into())
                })?;
                Some(idx)
            }
            None => None,
        };

        let raw = match precision {
            Some(p) => format!("{},{}", name, p),
            None => name.to_string(),
        };

        Ok(Self {
            raw,
            name: name.to_string(),
            index,
            precision,
        })
    }

    /// Normalized composite string, the key's identity
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Name as sent in subscribe requests (includes any `[idx]` suffix)
    #[inline]
    pub fn wire_name(&self) -> &str {
        &self.name
    }

    /// Parsed array index, if the name addresses an array element
    #[inline]
    pub fn array_index(&self) -> Option<usize> {
        self.index
    }

    /// Configured decimal rounding precision
    #[inline]
    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    /// Round a raw value to this key's precision, if one is configured.
    ///
    /// Rounding happens before change comparison, so two raw values that
    /// round to the same figure never produce two change notifications.
    pub fn round(&self, value: f32) -> f32 {
        match self.precision {
            Some(p) => {
                let scale = 10f64.powi(p as i32);
                ((value as f64 * scale).round() / scale) as f32
            }
            None => value,
        }
    }
}

impl PartialEq for DatarefKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for DatarefKey {}

impl Hash for DatarefKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Borrow<str> for DatarefKey {
    fn borrow(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DatarefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A dataref value.
///
/// The UDP update protocol only ever carries scalars (array elements are
/// subscribed as distinct `name[i]` keys); the session stream may deliver
/// whole arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatarefValue {
    Scalar(f32),
    Array(Vec<f32>),
}

impl DatarefValue {
    /// Scalar payload, if this is a scalar
    #[inline]
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            DatarefValue::Scalar(v) => Some(*v),
            DatarefValue::Array(_) => None,
        }
    }
}

impl From<f32> for DatarefValue {
    fn from(v: f32) -> Self {
        DatarefValue::Scalar(v)
    }
}

impl fmt::Display for DatarefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatarefValue::Scalar(v) => write!(f, "{}", v),
            DatarefValue::Array(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Unit conversion applied to an inbound raw value before rounding.
///
/// The set is closed and resolved once at configuration load; dependent
/// layers never dispatch on strategy names at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ValueTransform {
    /// Pass the raw value through
    #[default]
    None,
    /// Multiply by a fixed factor
    Scale(f32),
}

/// Barometric pressure conversion factor (inches of mercury to hectopascal)
const INHG_TO_HPA: f32 = 33.864;

impl ValueTransform {
    /// Resolve a strategy name from the configuration file.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "" | "none" => Ok(ValueTransform::None),
            "inhg_to_hpa" => Ok(ValueTransform::Scale(INHG_TO_HPA)),
            other => Err(Error::Config(format!(
                "unknown value transform `{}`",
                other
            ))),
        }
    }

    /// Apply the transform to a raw value.
    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        match self {
            ValueTransform::None => value,
            ValueTransform::Scale(factor) => value * factor,
        }
    }
}

/// One subscribed dataref: the key plus its resolved transform.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub key: DatarefKey,
    pub transform: ValueTransform,
}

impl Subscription {
    /// Subscription with no transform
    pub fn new(key: DatarefKey) -> Self {
        Self {
            key,
            transform: ValueTransform::None,
        }
    }

    /// Subscription with a transform
    pub fn with_transform(key: DatarefKey, transform: ValueTransform) -> Self {
        Self { key, transform }
    }
}

/// Batch of keys whose cached value changed after one inbound update.
///
/// Built once per update and delivered to every observer as a single
/// consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: HashMap<DatarefKey, DatarefValue>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: DatarefKey, value: DatarefValue) {
        self.changes.insert(key, value);
    }

    /// Look up a changed value by its composite key string
    pub fn get(&self, key: &str) -> Option<&DatarefValue> {
        self.changes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DatarefKey, &DatarefValue)> {
        self.changes.iter()
    }
}
