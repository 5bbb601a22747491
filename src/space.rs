//! Space is a quota root: a named tree of matters with per-file and total
//! size limits, owned by a user (private) or shared via membership.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::{CoreError, CoreResult};

pub const SPACE_TYPE_PRIVATE: &str = "PRIVATE";
pub const SPACE_TYPE_SHARED: &str = "SHARED";

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub uuid: String,
    pub name: String,
    pub user_uuid: String,
    pub kind: String,
    /// Per-file byte limit, -1 for unlimited.
    pub size_limit: i64,
    /// Total byte limit, -1 for unlimited.
    pub total_size_limit: i64,
    /// Running total of file bytes in the space.
    pub total_size: i64,
    pub sort: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Space {
    pub fn is_private(&self) -> bool {
        self.kind == SPACE_TYPE_PRIVATE
    }

    /// Bytes still available under the total limit, or None when unlimited.
    pub fn available_bytes(&self) -> Option<i64> {
        if self.total_size_limit < 0 {
            return None;
        }
        Some((self.total_size_limit - self.total_size).max(0))
    }

    #[cfg(test)]
    pub fn new_for_test(name: &str) -> Space {
        let now = Utc::now();
        Space {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            user_uuid: uuid::Uuid::new_v4().to_string(),
            kind: SPACE_TYPE_PRIVATE.to_string(),
            size_limit: -1,
            total_size_limit: -1,
            total_size: 0,
            sort: now.timestamp_millis(),
            create_time: now,
            update_time: now,
        }
    }
}

/// Space names double as disk-path segments, so the charset is strict.
pub fn check_space_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::bad_request("space name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::bad_request(
            "space name may only contain letters, digits, '_' and '-'",
        ));
    }
    if name.len() > 45 {
        return Err(CoreError::bad_request("space name too long"));
    }
    Ok(())
}

/// -1 means unlimited; any other negative limit is malformed.
pub fn check_size_limit(limit: i64) -> CoreResult<()> {
    if limit < -1 {
        return Err(CoreError::bad_request(
            "size limit cannot be negative except -1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_name_charset_is_strict() {
        assert!(check_space_name("alice").is_ok());
        assert!(check_space_name("team_42-a").is_ok());
        assert!(check_space_name("").is_err());
        assert!(check_space_name("has space").is_err());
        assert!(check_space_name("slash/name").is_err());
        assert!(check_space_name("dot.name").is_err());
    }

    #[test]
    fn available_bytes_clamps_at_zero() {
        let mut space = Space::new_for_test("alice");
        assert_eq!(space.available_bytes(), None);
        space.total_size_limit = 100;
        space.total_size = 30;
        assert_eq!(space.available_bytes(), Some(70));
        space.total_size = 130;
        assert_eq!(space.available_bytes(), Some(0));
    }

    #[test]
    fn size_limit_validation() {
        assert!(check_size_limit(-1).is_ok());
        assert!(check_size_limit(0).is_ok());
        assert!(check_size_limit(1024).is_ok());
        assert!(check_size_limit(-2).is_err());
    }
}
