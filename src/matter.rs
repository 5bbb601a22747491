//! Matter is the virtual filesystem node: a file or directory metadata
//! record layered over the relational store and the physical disk tree.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};
use crate::space::Space;

/// Sentinel uuid of a space's virtual root directory. Never persisted.
pub const MATTER_ROOT: &str = "root";
/// Directory name for live content under a space.
pub const SPACE_ROOT_DIR: &str = "root";
/// Directory name for cached derivatives under a space.
pub const SPACE_CACHE_DIR: &str = "cache";
/// Directory name for transient zip staging under a space.
pub const SPACE_ZIP_DIR: &str = "zip";

pub const MATTER_NAME_MAX_LENGTH: usize = 200;
pub const MATTER_MAX_DEPTH: usize = 32;
const MATTER_NAME_FORBIDDEN: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Matter {
    pub uuid: String,
    pub puuid: String,
    pub space_uuid: String,
    pub space_name: String,
    pub user_uuid: String,
    pub dir: bool,
    pub name: String,
    pub digest: String,
    pub size: i64,
    pub privacy: bool,
    pub path: String,
    pub times: i64,
    pub prop: String,
    pub deleted: bool,
    pub delete_time: Option<DateTime<Utc>>,
    pub visit_time: DateTime<Utc>,
    pub sort: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Matter {
    /// Synthesize the virtual root of a space. Convenient as a move/create
    /// destination; never written to the store.
    pub fn root_of(space: &Space) -> Matter {
        Matter {
            uuid: MATTER_ROOT.to_string(),
            puuid: String::new(),
            space_uuid: space.uuid.clone(),
            space_name: space.name.clone(),
            user_uuid: space.user_uuid.clone(),
            dir: true,
            name: String::new(),
            digest: String::new(),
            size: 0,
            privacy: true,
            path: String::new(),
            times: 0,
            prop: "{}".to_string(),
            deleted: false,
            delete_time: None,
            visit_time: space.update_time,
            sort: space.sort,
            create_time: space.create_time,
            update_time: space.update_time,
        }
    }

    pub fn is_root(&self) -> bool {
        self.uuid == MATTER_ROOT
    }

    /// Absolute disk path. `path` is the relative address under the space's
    /// content root; its segments may lag renamed ancestors, so it is never
    /// parsed for names.
    pub fn absolute_path(&self, storage_root: &std::path::Path) -> PathBuf {
        let mut abs = space_matter_root_dir(storage_root, &self.space_name);
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            abs.push(segment);
        }
        abs
    }

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    /// Depth of this node counted in `path` segments. The root is 0.
    pub fn depth(&self) -> usize {
        self.path.split('/').filter(|s| !s.is_empty()).count()
    }

    /// 读取 prop 字段中的键值对。
    pub fn prop_map(&self) -> CoreResult<HashMap<String, String>> {
        let raw = if self.prop.is_empty() { "{}" } else { &self.prop };
        serde_json::from_str(raw)
            .map_err(|err| CoreError::bad_request(format!("corrupt prop map: {err}")))
    }

    /// 写入 prop 字段中的键值对。
    pub fn set_prop_map(&mut self, map: &HashMap<String, String>) {
        self.prop = serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string());
    }
}

/// Absolute directory holding a space's live content.
pub fn space_matter_root_dir(storage_root: &std::path::Path, space_name: &str) -> PathBuf {
    storage_root.join(space_name).join(SPACE_ROOT_DIR)
}

/// Absolute directory holding a space's cached derivatives.
pub fn space_cache_root_dir(storage_root: &std::path::Path, space_name: &str) -> PathBuf {
    storage_root.join(space_name).join(SPACE_CACHE_DIR)
}

/// Absolute directory holding a space's transient zip archives.
pub fn space_zip_root_dir(storage_root: &std::path::Path, space_name: &str) -> PathBuf {
    storage_root.join(space_name).join(SPACE_ZIP_DIR)
}

/// Validate a matter name: non-empty, bounded, no reserved characters, no
/// surrounding whitespace.
pub fn check_matter_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::bad_request("name cannot be empty"));
    }
    if name.starts_with(' ') || name.ends_with(' ') {
        return Err(CoreError::bad_request(
            "name cannot start or end with a space",
        ));
    }
    if name.chars().any(|c| MATTER_NAME_FORBIDDEN.contains(&c)) {
        return Err(CoreError::bad_request(format!(
            "name cannot contain any of {}",
            MATTER_NAME_FORBIDDEN.iter().collect::<String>()
        )));
    }
    if name.chars().count() > MATTER_NAME_MAX_LENGTH {
        return Err(CoreError::bad_request(format!(
            "name cannot exceed {MATTER_NAME_MAX_LENGTH} characters"
        )));
    }
    Ok(())
}

/// File extension in lowercase, if any.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_check_rejects_reserved_characters() {
        for bad in ["a/b", "a\\b", "a:b", "a*b", "a?b", "a\"b", "a<b", "a>b", "a|b"] {
            assert!(check_matter_name(bad).is_err(), "{bad} should be rejected");
        }
        assert!(check_matter_name("report.pdf").is_ok());
        assert!(check_matter_name("").is_err());
        assert!(check_matter_name(" padded").is_err());
        assert!(check_matter_name("padded ").is_err());
        assert!(check_matter_name(&"x".repeat(201)).is_err());
        assert!(check_matter_name(&"x".repeat(200)).is_ok());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("photo.JPG"), Some("jpg".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
    }

    #[test]
    fn prop_map_roundtrips_and_tolerates_empty() {
        let space = crate::space::Space::new_for_test("alice");
        let mut matter = Matter::root_of(&space);
        assert!(matter.prop_map().expect("empty map").is_empty());

        matter.prop = String::new();
        assert!(matter.prop_map().expect("blank prop").is_empty());

        let mut map = HashMap::new();
        map.insert("cover".to_string(), "frame-3.jpg".to_string());
        matter.set_prop_map(&map);
        let restored = matter.prop_map().expect("roundtrip");
        assert_eq!(restored.get("cover").map(String::as_str), Some("frame-3.jpg"));

        matter.prop = "not json".to_string();
        assert!(matter.prop_map().is_err());
    }

    #[test]
    fn absolute_path_joins_space_root_and_segments() {
        let space = crate::space::Space::new_for_test("alice");
        let mut matter = Matter::root_of(&space);
        matter.path = "/docs/report.pdf".to_string();
        let abs = matter.absolute_path(std::path::Path::new("/srv/store"));
        assert_eq!(
            abs,
            std::path::Path::new("/srv/store/alice/root/docs/report.pdf")
        );
    }
}
