// JSON-file saved-object source
//
// One document carries every saved object the engine reads plus the
// relation list and the relational buttons.

use std::path::Path;

use anyhow::{Context, Result};
use relboard_core::{
    IndexPattern, Relation, RelationalButton, SavedDashboard, SavedDashboardGroup,
    SavedObjectSource, SavedSearch,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonObjectSource {
    pub dashboards: Vec<SavedDashboard>,
    pub searches: Vec<SavedSearch>,
    pub groups: Vec<SavedDashboardGroup>,
    pub index_patterns: Vec<IndexPattern>,
    pub relations: Vec<Relation>,
    pub buttons: Vec<RelationalButton>,
}

impl JsonObjectSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read saved objects: {}", path.display()))?;
        let source = Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse saved objects: {}", path.display()))?;
        info!(
            path = %path.display(),
            dashboards = source.dashboards.len(),
            relations = source.relations.len(),
            "Loaded saved objects"
        );
        Ok(source)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

impl SavedObjectSource for JsonObjectSource {
    fn find_dashboards(&self) -> relboard_core::Result<Vec<SavedDashboard>> {
        Ok(self.dashboards.clone())
    }

    fn get_dashboard(&self, id: &str) -> relboard_core::Result<Option<SavedDashboard>> {
        Ok(self.dashboards.iter().find(|d| d.id == id).cloned())
    }

    fn get_search(&self, id: &str) -> relboard_core::Result<Option<SavedSearch>> {
        Ok(self.searches.iter().find(|s| s.id == id).cloned())
    }

    fn find_groups(&self) -> relboard_core::Result<Vec<SavedDashboardGroup>> {
        Ok(self.groups.clone())
    }

    fn find_index_patterns(&self) -> relboard_core::Result<Vec<IndexPattern>> {
        Ok(self.index_patterns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const OBJECTS: &str = r#"{
        "dashboards": [
            { "id": "companies", "title": "Companies", "savedSearchId": "s-companies" },
            { "id": "about", "title": "About" }
        ],
        "searches": [
            {
                "id": "s-companies",
                "title": "Companies",
                "kibanaSavedObjectMeta": { "searchSourceJSON": "{\"index\":\"company\"}" }
            }
        ],
        "index_patterns": [ { "id": "company", "title": "company" } ],
        "relations": [
            {
                "domain": { "indexPatternId": "company", "path": "id" },
                "range": { "indexPatternId": "article", "path": "companyid" }
            }
        ]
    }"#;

    #[test]
    fn test_lookups() {
        let source = JsonObjectSource::from_json_str(OBJECTS).unwrap();
        assert_eq!(source.find_dashboards().unwrap().len(), 2);
        assert!(source.get_dashboard("about").unwrap().is_some());
        assert!(source.get_dashboard("missing").unwrap().is_none());

        let search = source.get_search("s-companies").unwrap().unwrap();
        assert_eq!(search.index_pattern().unwrap().as_deref(), Some("company"));
        assert!(source.find_groups().unwrap().is_empty());
        assert!(source.buttons.is_empty());
        assert_eq!(source.relations[0].id(), "article/companyid/company/id");
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = JsonObjectSource::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse saved objects"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(OBJECTS.as_bytes()).unwrap();
        assert_eq!(JsonObjectSource::load(file.path()).unwrap().dashboards.len(), 2);
    }
}
