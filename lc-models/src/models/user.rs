//! User profile model.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use lc_core::error::LcResult;

use super::{required_str, str_field};

/// A registered user, one row of the `users` relation.
///
/// The id equals the auth identity id assigned at sign up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub status: String,
    pub phone: String,
    #[serde(default)]
    pub region: String,
}

impl User {
    /// Create a User from a backend row.
    pub fn from_server_map(map: &Value) -> LcResult<Self> {
        Ok(Self {
            id: required_str(map, "id", "user")?,
            name: str_field(map, "name").unwrap_or_default(),
            avatar: str_field(map, "avatar").unwrap_or_default(),
            status: str_field(map, "status").unwrap_or_default(),
            phone: required_str(map, "phone", "user")?,
            region: str_field(map, "region").unwrap_or_default(),
        })
    }

    /// Row inserted into `users` at registration.
    pub fn to_insert_row(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "avatar": self.avatar,
            "status": self.status,
            "phone": self.phone,
            "region": self.region,
        })
    }

    /// Name to show in lists, falling back to the phone number.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.phone
        } else {
            &self.name
        }
    }
}

/// Profile fields supplied at registration or edited later.
///
/// `None` leaves a field unchanged on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub status: Option<String>,
    pub region: Option<String>,
}

impl ProfileUpdate {
    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar.is_none() && self.status.is_none() && self.region.is_none()
    }

    /// Build the `users` patch containing only the set fields.
    pub fn to_patch(&self) -> Value {
        let mut patch = Map::new();
        let fields = [
            ("name", &self.name),
            ("avatar", &self.avatar),
            ("status", &self.status),
            ("region", &self.region),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                patch.insert(key.to_string(), Value::String(v.clone()));
            }
        }
        Value::Object(patch)
    }

    /// Apply the set fields to a user in place.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.name {
            user.name = v.clone();
        }
        if let Some(v) = &self.avatar {
            user.avatar = v.clone();
        }
        if let Some(v) = &self.status {
            user.status = v.clone();
        }
        if let Some(v) = &self.region {
            user.region = v.clone();
        }
    }

    /// Materialize a new user from these fields.
    pub fn into_user(self, id: String, phone: String) -> User {
        User {
            id,
            name: self.name.unwrap_or_default(),
            avatar: self.avatar.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            phone,
            region: self.region.unwrap_or_default(),
        }
    }
}
