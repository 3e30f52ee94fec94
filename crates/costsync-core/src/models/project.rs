//! Project documents (quantity take-off side)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A project as stored by the quantity take-off subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_status() -> String {
    "active".to_string()
}

/// Source file information attached to a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    /// ISO-8601 upload time of the source file
    #[serde(default)]
    pub upload_timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// New project document with a deterministic id derived from its name
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            id: Self::id_for_name(&name),
            name,
            status: default_status(),
            metadata: ProjectMetadata::default(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// `"Tower A"` → `"prj-tower-a"`
    pub fn id_for_name(name: &str) -> String {
        let mut slug = String::with_capacity(name.len() + 4);
        slug.push_str("prj-");
        let mut last_dash = true;
        for ch in name.trim().chars() {
            if ch.is_alphanumeric() {
                slug.extend(ch.to_lowercase());
                last_dash = false;
            } else if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        slug
    }

    /// First id derived from `name` that `taken` does not claim.
    ///
    /// Names that slug identically ("Tower A", "tower-a") get `-2`, `-3`...
    pub fn free_id_for_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
        let base = Self::id_for_name(name);
        if !taken(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    /// Case-insensitive exact name comparison
    pub fn has_name(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_for_name() {
        assert_eq!(Project::id_for_name("Tower A"), "prj-tower-a");
        assert_eq!(Project::id_for_name("  Bau / Süd  "), "prj-bau-süd");
    }

    #[test]
    fn test_free_id_skips_taken_slugs() {
        let taken = ["prj-tower-a", "prj-tower-a-2"];
        let id = Project::free_id_for_name("Tower-A", |id| taken.contains(&id));
        assert_eq!(id, "prj-tower-a-3");
        assert_eq!(Project::free_id_for_name("Tower B", |_| false), "prj-tower-b");
    }

    #[test]
    fn test_has_name_case_insensitive() {
        let project = Project::new("Tower A", Utc::now());
        assert!(project.has_name("tower a"));
        assert!(project.has_name(" TOWER A "));
        assert!(!project.has_name("Tower"));
    }

    #[test]
    fn test_metadata_keeps_unknown_fields() {
        let json = r#"{
            "id": "p1",
            "name": "Tower A",
            "metadata": {"filename": "tower.ifc", "file_id": "f1", "uploader": "ana"}
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.status, "active");
        assert_eq!(project.metadata.filename.as_deref(), Some("tower.ifc"));
        assert_eq!(project.metadata.extra["uploader"], "ana");
    }
}
