//! Sharing settings and the "shared with" list.
//!
//! Writers have stored list entries in two shapes over time: bare email
//! strings and `{ "email": ... }` objects. [`SharedEntry`] makes the shape
//! explicit and [`normalize_shared_with`] collapses a list to bare strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// One element of a `sharedWith` list.
#[derive(Debug, Clone, PartialEq)]
pub enum SharedEntry {
    /// `"a@x.com"`
    PlainEmail(String),
    /// `{"email": "a@x.com", ...}`
    EmailHolder {
        email: String,
        extra: Map<String, Value>,
    },
    /// Anything no email can be read from
    Unrecognized(Value),
}

impl SharedEntry {
    /// Classify a raw list element.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(email) => SharedEntry::PlainEmail(email),
            Value::Object(mut object) => match object.remove("email") {
                Some(Value::String(email)) => SharedEntry::EmailHolder {
                    email,
                    extra: object,
                },
                Some(other) => {
                    object.insert("email".to_string(), other);
                    SharedEntry::Unrecognized(Value::Object(object))
                }
                None => SharedEntry::Unrecognized(Value::Object(object)),
            },
            other => SharedEntry::Unrecognized(other),
        }
    }

    /// The email this entry refers to, if any.
    pub fn email(&self) -> Option<&str> {
        match self {
            SharedEntry::PlainEmail(email) | SharedEntry::EmailHolder { email, .. } => Some(email),
            SharedEntry::Unrecognized(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            SharedEntry::PlainEmail(email) => Value::String(email.clone()),
            SharedEntry::EmailHolder { email, extra } => {
                let mut object = extra.clone();
                object.insert("email".to_string(), Value::String(email.clone()));
                Value::Object(object)
            }
            SharedEntry::Unrecognized(value) => value.clone(),
        }
    }
}

impl Serialize for SharedEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SharedEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(SharedEntry::from_value)
    }
}

/// A `sharingSettings` object.
///
/// A `sharedWith` value that is missing, `null` or not an array decodes as an
/// empty list with `well_formed` unset, so a rewrite that stores `[]` still
/// counts as a change. A settings value that is not an object at all decodes
/// the same way and is replaced by an object on rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct SharingSettings {
    #[serde(rename = "sharedWith")]
    pub shared_with: Vec<SharedEntry>,
    #[serde(skip)]
    pub well_formed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SharingSettings {
    fn default() -> Self {
        Self {
            shared_with: Vec::new(),
            well_formed: false,
            extra: Map::new(),
        }
    }
}

impl From<Value> for SharingSettings {
    fn from(value: Value) -> Self {
        let Value::Object(mut extra) = value else {
            return Self::default();
        };
        let (shared_with, well_formed) = match extra.remove("sharedWith") {
            Some(Value::Array(items)) => (
                items.into_iter().map(SharedEntry::from_value).collect(),
                true,
            ),
            _ => (Vec::new(), false),
        };
        Self {
            shared_with,
            well_formed,
            extra,
        }
    }
}

impl SharingSettings {
    /// Replace the list with already-normalized emails.
    pub fn with_emails(mut self, emails: &[String]) -> Self {
        self.shared_with = emails.iter().cloned().map(SharedEntry::PlainEmail).collect();
        self.well_formed = true;
        self
    }
}

/// Result of collapsing a `sharedWith` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedList {
    pub emails: Vec<String>,
    /// Entries that carried no email and were left out
    pub dropped: usize,
}

/// Map every entry to its plain email, keeping order.
pub fn normalize_shared_with(entries: &[SharedEntry]) -> NormalizedList {
    let mut list = NormalizedList::default();
    for entry in entries {
        match entry.email() {
            Some(email) => list.emails.push(email.to_string()),
            None => list.dropped += 1,
        }
    }
    list
}
