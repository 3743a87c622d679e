// SPDX-License-Identifier: Apache-2.0
//! Attribute values and their type tags.
use std::collections::BTreeMap;

/// Attribute map carried by every node and edge of an attributed graph.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// A dynamically typed attribute value.
///
/// The closed set of variants replaces ad-hoc duck typing; pattern type
/// constraints become variant-tag checks. `List` arises from the
/// [`crate::MergePolicy::Union`] policy, `Opaque` carries a user token the
/// engine stores and compares but never interprets.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrValue {
    /// Attribute present without a meaningful value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    Str(String),
    /// Ordered collection of values, produced by union merges.
    List(Vec<AttrValue>),
    /// Opaque user value, compared byte-for-byte.
    Opaque(String),
}

impl AttrValue {
    /// Returns the type tag of this value, if it has one.
    ///
    /// `Null`, `List` and `Opaque` carry no tag and satisfy no type
    /// constraint.
    #[must_use]
    pub fn type_tag(&self) -> Option<ValueType> {
        match self {
            Self::Bool(_) => Some(ValueType::Bool),
            Self::Int(_) => Some(ValueType::Int),
            Self::Float(_) => Some(ValueType::Float),
            Self::Str(_) => Some(ValueType::Str),
            Self::Null | Self::List(_) | Self::Opaque(_) => None,
        }
    }

    /// Returns `true` if this value carries the given type tag.
    #[must_use]
    pub fn has_type(&self, ty: ValueType) -> bool {
        self.type_tag() == Some(ty)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Type tag required by a pattern attribute constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    /// Requires a boolean value.
    Bool,
    /// Requires an integer value.
    Int,
    /// Requires a floating-point value.
    Float,
    /// Requires a string value.
    Str,
}
