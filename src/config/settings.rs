//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailbag.
//
// Mailbag is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mailbag is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailbag. If not, see <http://www.gnu.org/licenses/>.

//! Backend settings: a flat, ordered mapping from option name to a simple
//! value.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::iter::FromIterator;
use std::time::Duration;

use serde::Deserialize;

use crate::support::error::Error;

/// A single setting value.
///
/// `Nil` is an explicit "no value". Accessors treat it exactly like an absent
/// key, but it still participates in merges, so a caller can blank out a
/// default (e.g. `password`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Nil,
}

impl Value {
    pub fn is_nil(&self) -> bool {
        Value::Nil == *self
    }

    fn type_name(&self) -> &'static str {
        match *self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Nil => "nil",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(ref s) => write!(f, "{:?}", s),
            Value::Nil => write!(f, "nil"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Int(i.into())
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

/// Builds a `Settings` from `key => value` pairs.
///
/// ```ignore
/// let s = settings! { "location" => "/usr/sbin/sendmail", "timeout" => 30 };
/// ```
#[macro_export]
macro_rules! settings {
    () => { $crate::Settings::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut s = $crate::Settings::new();
        $(s.insert($key, $value);)+
        s
    }};
}

/// The configuration mapping handed to a backend constructor.
///
/// The `Debug` rendering is the redacted one.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns the raw value for `key`, including explicit `Nil`s.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Returns `overrides` laid over `self`.
    ///
    /// Keys only in `overrides` are added, keys in both take the value from
    /// `overrides`, and keys only in `self` are kept. This is a single-level
    /// merge.
    pub fn merged(&self, overrides: &Settings) -> Settings {
        let mut merged = self.clone();
        merged.merge(overrides);
        merged
    }

    /// In-place version of `merged`.
    pub fn merge(&mut self, overrides: &Settings) {
        for (k, v) in overrides.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// The value of `key` as a string, or `None` if absent or nil.
    pub fn str(&self, key: &str) -> Result<Option<&str>, Error> {
        match self.value(key) {
            None => Ok(None),
            Some(&Value::Str(ref s)) => Ok(Some(s.as_str())),
            Some(other) => Err(wrong_type(key, "a string", other)),
        }
    }

    /// The value of `key` as an integer, or `None` if absent or nil.
    ///
    /// Strings consisting only of digits are accepted as well, since that is
    /// what comes out of some configuration sources.
    pub fn int(&self, key: &str) -> Result<Option<i64>, Error> {
        match self.value(key) {
            None => Ok(None),
            Some(&Value::Int(i)) => Ok(Some(i)),
            Some(&Value::Str(ref s)) => {
                s.trim().parse::<i64>().map(Some).map_err(|_| {
                    Error::InvalidSetting {
                        key: key.to_owned(),
                        reason: format!("{:?} is not an integer", s),
                    }
                })
            },
            Some(other) => Err(wrong_type(key, "an integer", other)),
        }
    }

    /// The value of `key` as a boolean, or `None` if absent or nil.
    pub fn bool(&self, key: &str) -> Result<Option<bool>, Error> {
        match self.value(key) {
            None => Ok(None),
            Some(&Value::Bool(b)) => Ok(Some(b)),
            Some(&Value::Str(ref s)) if s == "true" => Ok(Some(true)),
            Some(&Value::Str(ref s)) if s == "false" => Ok(Some(false)),
            Some(other) => Err(wrong_type(key, "a boolean", other)),
        }
    }

    /// The value of `key` as a TCP port.
    pub fn port(&self, key: &str) -> Result<Option<u16>, Error> {
        match self.int(key)? {
            None => Ok(None),
            Some(p) if p > 0 && p <= i64::from(u16::MAX) => Ok(Some(p as u16)),
            Some(p) => Err(Error::InvalidSetting {
                key: key.to_owned(),
                reason: format!("{} is not a valid port number", p),
            }),
        }
    }

    /// The value of `key` interpreted as a number of seconds.
    pub fn seconds(&self, key: &str) -> Result<Option<Duration>, Error> {
        match self.int(key)? {
            None => Ok(None),
            Some(s) if s >= 0 => Ok(Some(Duration::from_secs(s as u64))),
            Some(s) => Err(Error::InvalidSetting {
                key: key.to_owned(),
                reason: format!("{} is not a valid duration", s),
            }),
        }
    }

    /// Returns a value which displays these settings with secrets blanked
    /// out.
    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }

    fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_nil())
    }
}

fn wrong_type(key: &str, expected: &str, actual: &Value) -> Error {
    Error::InvalidSetting {
        key: key.to_owned(),
        reason: format!("expected {}, got {}", expected, actual.type_name()),
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Settings {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Whether the value of the setting `key` must never be shown.
pub fn is_secret(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["password", "secret", "token", "key"]
        .iter()
        .any(|s| key.contains(s))
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings {}", self.redacted())
    }
}

/// `Display` adapter returned by `Settings::redacted()`.
pub struct Redacted<'a>(&'a Settings);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (ix, (k, v)) in self.0.iter().enumerate() {
            if ix > 0 {
                write!(f, ", ")?;
            }

            if is_secret(k) && !v.is_nil() {
                write!(f, "{}: [redacted]", k)?;
            } else {
                write!(f, "{}: {}", k, v)?;
            }
        }
        write!(f, "}}")
    }
}
