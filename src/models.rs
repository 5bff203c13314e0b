use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Permission tier. `Admin` is the administrator, `Lecturer` is staff and
/// `Student` is the end-user tier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Lecturer,
    Student,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Lecturer, Role::Student];
    pub const STAFF: [Role; 2] = [Role::Admin, Role::Lecturer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Lecturer => "lecturer",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "lecturer" => Ok(Role::Lecturer),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// An authenticable principal. The secret hash never leaves the server;
/// clients only ever see an [`IdentityView`].
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub secret_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdentityView {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            name: identity.name.clone(),
            email: identity.email.clone(),
            role: identity.role,
            created_at: identity.created_at,
        }
    }
}

/// JWT claims.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: String, // identity name
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
}

/// A schema-less record: a JSON object keyed by field name.
///
/// Required fields, once stored: `id` (unique within its collection) and a
/// creation stamp (`created_at`, or a caller-supplied `createdAt`). Shapes may
/// otherwise differ freely between records of the same collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub const ID: &'static str = "id";
    pub const CREATED_AT: &'static str = "created_at";
    pub const CREATED_AT_ALT: &'static str = "createdAt";
    pub const UPDATED_AT: &'static str = "updated_at";
    pub const UPDATED_AT_ALT: &'static str = "updatedAt";

    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value; `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get(Self::ID)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn has_created_at(&self) -> bool {
        self.contains_key(Self::CREATED_AT) || self.contains_key(Self::CREATED_AT_ALT)
    }

    pub fn has_updated_at(&self) -> bool {
        self.contains_key(Self::UPDATED_AT) || self.contains_key(Self::UPDATED_AT_ALT)
    }

    /// Shallow merge: keys in `partial` overwrite, everything else is kept.
    /// The `id` key is never overwritten.
    pub fn merge(&mut self, partial: Record) {
        for (key, value) in partial.0 {
            if key == Self::ID {
                continue;
            }
            self.0.insert(key, value);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Identifier of a record, as found in its `id` field or in a request path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Path segments that look like integers address integer ids.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => RecordId::Int(n),
            Err(_) => RecordId::Text(raw.to_string()),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (RecordId::Int(id), Value::Number(n)) => n.as_i64() == Some(*id),
            (RecordId::Text(id), Value::String(s)) => id == s,
            _ => false,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parse_and_serialize() {
        assert_eq!("Lecturer".parse::<Role>().unwrap(), Role::Lecturer);
        assert!("janitor".parse::<Role>().is_err());
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), json!("admin"));
    }

    #[test]
    fn test_record_id_matching() {
        assert!(RecordId::parse("7").matches(&json!(7)));
        assert!(!RecordId::parse("7").matches(&json!("7")));
        assert!(RecordId::parse("abc").matches(&json!("abc")));
        assert_eq!(RecordId::from_value(&json!(true)), None);
    }

    #[test]
    fn test_merge_keeps_id_and_unspecified_fields() {
        let mut rec = Record::from_value(json!({"id": 1, "a": 1, "b": 2})).unwrap();
        rec.merge(Record::from_value(json!({"id": 99, "b": 3})).unwrap());
        assert_eq!(serde_json::to_value(&rec).unwrap(), json!({"id": 1, "a": 1, "b": 3}));
    }

    #[test]
    fn test_identity_view_hides_hash() {
        let identity = Identity {
            id: 1,
            name: "admin".into(),
            email: "admin@example.edu".into(),
            secret_hash: "$2b$secret".into(),
            role: Role::Admin,
            created_at: Utc::now(),
        };
        let view = serde_json::to_value(IdentityView::from(&identity)).unwrap();
        assert!(view.get("secret_hash").is_none());
        assert_eq!(view["role"], json!("admin"));
    }
}
