//! Contact entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lc_core::error::LcResult;

use super::user::User;
use super::{required_str, str_field, time_field};

/// A directed "user knows contact" edge, one row of the `contacts` relation.
///
/// Display fields are copied from the contact's user row when the entry is
/// created and are not refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub contact_id: String,
    pub name: String,
    pub avatar: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    /// Create a Contact from a backend row.
    pub fn from_server_map(map: &Value) -> LcResult<Self> {
        Ok(Self {
            id: required_str(map, "id", "contact")?,
            user_id: required_str(map, "user_id", "contact")?,
            contact_id: required_str(map, "contact_id", "contact")?,
            name: str_field(map, "name").unwrap_or_default(),
            avatar: str_field(map, "avatar").unwrap_or_default(),
            status: str_field(map, "status").unwrap_or_default(),
            created_at: time_field(map, "created_at"),
        })
    }

    /// Row inserted into `contacts` with display fields copied from `target`.
    pub fn insert_row(user_id: &str, target: &User) -> Value {
        json!({
            "user_id": user_id,
            "contact_id": target.id,
            "name": target.display_name(),
            "avatar": target.avatar,
            "status": target.status,
        })
    }
}
