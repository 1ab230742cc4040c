use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dates::{self, DateRange};

/// A typed override value. An entry whose value is not resolved yet is still waiting
/// for a human to fill it in.
pub trait MappingValue {
    fn is_resolved(&self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOverride {
    #[serde(rename = "Categories", default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(rename = "Ignore", default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore: bool,
}

impl MappingValue for CategoryOverride {
    fn is_resolved(&self) -> bool {
        self.ignore || !self.categories.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorOverride {
    #[serde(rename = "Creator", default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(rename = "DeathYear", default, skip_serializing_if = "Option::is_none")]
    pub death_year: Option<i32>,
    #[serde(rename = "Anonymous", default, skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
}

impl MappingValue for CreatorOverride {
    fn is_resolved(&self) -> bool {
        self.anonymous || self.creator.as_deref().is_some_and(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOverride {
    #[serde(rename = "Date", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl DateOverride {
    pub fn range(&self) -> DateRange {
        self.date
            .as_deref()
            .map(dates::parse)
            .unwrap_or_else(DateRange::unknown)
    }
}

impl MappingValue for DateOverride {
    fn is_resolved(&self) -> bool {
        self.date.as_deref().is_some_and(|date| !date.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry<T> {
    #[serde(rename = "FromPages", default)]
    pub from_pages: Vec<String>,
    #[serde(flatten)]
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingLookup<'a, T> {
    Mapped(&'a T),
    Pending,
    NeedsMapping,
}

/// Human-maintained overrides keyed by the raw scraped string.
#[derive(Debug, Clone, Default)]
pub struct ManualMapping<T> {
    entries: BTreeMap<String, MappingEntry<T>>,
}

impl<T> ManualMapping<T>
where
    T: MappingValue + Default + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        let entries = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse mapping file {}", path.display()))?;
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered = serde_json::to_string_pretty(&self.entries)
            .context("failed to serialize mapping entries")?;
        fs::write(path, format!("{rendered}\n"))
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn lookup(&self, raw: &str) -> MappingLookup<'_, T> {
        match self.entries.get(raw.trim()) {
            Some(entry) if entry.value.is_resolved() => MappingLookup::Mapped(&entry.value),
            Some(_) => MappingLookup::Pending,
            None => MappingLookup::NeedsMapping,
        }
    }

    /// Record that `page` needs `raw` mapped. Returns `true` when the raw string was
    /// not known before.
    pub fn note_unmapped(&mut self, raw: &str, page: &str) -> bool {
        let key = raw.trim().to_string();
        let is_new = !self.entries.contains_key(&key);
        let entry = self.entries.entry(key).or_insert_with(|| MappingEntry {
            from_pages: Vec::new(),
            value: T::default(),
        });
        if !entry.from_pages.iter().any(|existing| existing == page) {
            entry.from_pages.push(page.to_string());
        }
        if is_new {
            tracing::debug!(raw = raw.trim(), page, "recorded unmapped value");
        }
        is_new
    }

    pub fn insert(&mut self, raw: &str, value: T) {
        let entry = self
            .entries
            .entry(raw.trim().to_string())
            .or_insert_with(|| MappingEntry {
                from_pages: Vec::new(),
                value: T::default(),
            });
        entry.value = value;
    }

    pub fn pending(&self) -> impl Iterator<Item = (&str, &MappingEntry<T>)> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.value.is_resolved())
            .map(|(raw, entry)| (raw.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        CategoryOverride, CreatorOverride, DateOverride, ManualMapping, MappingLookup,
    };
    use crate::dates::DateRange;

    #[test]
    fn lookup_distinguishes_mapped_pending_and_unknown() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("categories.json");
        fs::write(
            &path,
            r#"{
  "Paris, France": {"FromPages": ["File:A.jpg"], "Categories": ["Paris"]},
  "Somewhere": {"FromPages": ["File:B.jpg"]}
}"#,
        )
        .expect("write");

        let mapping = ManualMapping::<CategoryOverride>::load(&path).expect("load");
        match mapping.lookup(" Paris, France ") {
            MappingLookup::Mapped(value) => assert_eq!(value.categories, vec!["Paris"]),
            other => panic!("expected a mapping, got {other:?}"),
        }
        assert_eq!(mapping.lookup("Somewhere"), MappingLookup::Pending);
        assert_eq!(mapping.lookup("Elsewhere"), MappingLookup::NeedsMapping);
        assert_eq!(mapping.pending().count(), 1);
    }

    #[test]
    fn unmapped_values_are_recorded_and_persisted() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("mappings").join("creators.json");

        let mut mapping = ManualMapping::<CreatorOverride>::load(&path).expect("absent file");
        assert!(mapping.is_empty());
        assert!(mapping.note_unmapped("J. Doe", "File:A.jpg"));
        assert!(!mapping.note_unmapped("J. Doe", "File:A.jpg"));
        assert!(!mapping.note_unmapped("J. Doe", "File:B.jpg"));
        mapping.save(&path).expect("save");

        let written = fs::read_to_string(&path).expect("read");
        assert!(written.contains("\"FromPages\""));
        assert!(!written.contains("\"Anonymous\""));

        let mut reloaded = ManualMapping::<CreatorOverride>::load(&path).expect("reload");
        assert_eq!(reloaded.lookup("J. Doe"), MappingLookup::Pending);
        let (_, entry) = reloaded.pending().next().expect("pending entry");
        assert_eq!(entry.from_pages, vec!["File:A.jpg", "File:B.jpg"]);

        reloaded.insert(
            "J. Doe",
            CreatorOverride {
                creator: Some("John Doe".to_string()),
                death_year: Some(1920),
                anonymous: false,
            },
        );
        assert!(matches!(
            reloaded.lookup("J. Doe"),
            MappingLookup::Mapped(CreatorOverride {
                death_year: Some(1920),
                ..
            })
        ));
    }

    #[test]
    fn date_overrides_parse_their_value() {
        let value = DateOverride {
            date: Some("circa 1910".to_string()),
        };
        assert_eq!(value.range().latest_year, 1910);
        assert_eq!(DateOverride::default().range(), DateRange::unknown());
    }

    #[test]
    fn invalid_mapping_files_name_the_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("dates.json");
        fs::write(&path, "{not json").expect("write");
        let error = ManualMapping::<DateOverride>::load(&path).expect_err("invalid json");
        assert!(error.to_string().contains("dates.json"));
    }
}
