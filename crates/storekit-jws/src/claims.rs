//! Typed claims decoded from a verified payload.
//!
//! The payload is decoded twice from the same bytes: once into
//! [`RegisteredClaims`] for the checks this crate enforces, and once into the
//! caller's domain type. Neither structure embeds the other.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::ops::Deref;

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether `value` is one of the audiences.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == value,
            Audience::Multiple(auds) => auds.iter().any(|a| a == value),
        }
    }
}

/// Registered JWT claims. All optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// NumericDate: integer or fractional seconds since the epoch, floored to
/// whole seconds.
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumericDate {
        Seconds(i64),
        Fractional(f64),
    }

    match Option::<NumericDate>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumericDate::Seconds(secs)) => Ok(Some(secs)),
        Some(NumericDate::Fractional(secs)) => floor_seconds(secs)
            .map(Some)
            .ok_or_else(|| D::Error::custom("NumericDate out of range")),
    }
}

// Range checked before the cast
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn floor_seconds(secs: f64) -> Option<i64> {
    let floored = secs.floor();
    (floored.is_finite() && floored >= i64::MIN as f64 && floored < i64::MAX as f64)
        .then(|| floored as i64)
}

/// Result of a successful verification: registered claims plus the caller's
/// domain claims, both decoded from the same payload.
///
/// Derefs to the domain claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedClaims<T> {
    pub registered: RegisteredClaims,
    pub claims: T,
}

impl<T> VerifiedClaims<T> {
    /// Drop the registered claims and keep the domain claims.
    pub fn into_inner(self) -> T {
        self.claims
    }
}

impl<T> Deref for VerifiedClaims<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.claims
    }
}
