//! Delivery metadata extracted from a project

use crate::models::Project;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

/// Header fields of every broker message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryMetadata {
    pub project: Option<String>,
    pub filename: Option<String>,
    /// ISO-8601
    pub timestamp: Option<String>,
    pub file_id: Option<String>,
    /// The timestamp was synthesized because the upload time was missing
    pub fallback_used: bool,
}

impl DeliveryMetadata {
    /// Extract from project metadata.
    ///
    /// A missing upload timestamp falls back to the project's last update,
    /// then to `now`; a missing file id falls back to the project id.
    pub fn from_project(project: &Project, now: DateTime<Utc>) -> Self {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut fallback_used = false;
        let timestamp = match non_blank(&project.metadata.upload_timestamp) {
            Some(ts) => ts,
            None => {
                fallback_used = true;
                let fallback = project.updated_at.unwrap_or(now);
                warn!(
                    project = %project.name,
                    fallback = %fallback,
                    "Project has no upload timestamp, using fallback"
                );
                fallback.to_rfc3339_opts(SecondsFormat::Millis, true)
            }
        };

        Self {
            project: Some(project.name.clone()),
            filename: non_blank(&project.metadata.filename),
            timestamp: Some(timestamp),
            file_id: non_blank(&project.metadata.file_id).or_else(|| Some(project.id.clone())),
            fallback_used,
        }
    }

    /// Names of required fields that are absent or blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let blank = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());

        let mut missing = Vec::new();
        if blank(&self.project) {
            missing.push("project");
        }
        if blank(&self.filename) {
            missing.push("filename");
        }
        if blank(&self.timestamp) {
            missing.push("timestamp");
        }
        if blank(&self.file_id) {
            missing.push("fileId");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn project() -> Project {
        let mut project = Project::new("Tower A", Utc::now());
        project.metadata.filename = Some("tower.ifc".into());
        project.metadata.file_id = Some("f-1".into());
        project.metadata.upload_timestamp = Some("2026-03-01T10:00:00Z".into());
        project
    }

    #[test]
    fn test_complete_metadata() {
        let meta = DeliveryMetadata::from_project(&project(), Utc::now());
        assert!(meta.is_complete());
        assert!(!meta.fallback_used);
        assert_eq!(meta.timestamp.as_deref(), Some("2026-03-01T10:00:00Z"));
    }

    #[test]
    fn test_timestamp_falls_back_to_updated_at() {
        let mut project = project();
        project.metadata.upload_timestamp = None;
        project.updated_at = Some(Utc.with_ymd_and_hms(2026, 2, 1, 8, 30, 0).unwrap());

        let meta = DeliveryMetadata::from_project(&project, Utc::now());
        assert!(meta.fallback_used);
        assert_eq!(meta.timestamp.as_deref(), Some("2026-02-01T08:30:00.000Z"));
        assert!(meta.is_complete());
    }

    #[test]
    fn test_file_id_falls_back_to_project_id() {
        let mut project = project();
        project.metadata.file_id = None;

        let meta = DeliveryMetadata::from_project(&project, Utc::now());
        assert_eq!(meta.file_id.as_deref(), Some("prj-tower-a"));
    }

    #[test]
    fn test_missing_filename_reported() {
        let mut project = project();
        project.metadata.filename = Some("  ".into());

        let meta = DeliveryMetadata::from_project(&project, Utc::now());
        assert_eq!(meta.missing_fields(), vec!["filename"]);
    }
}
