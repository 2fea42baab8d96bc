use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

const BUNDLED: &str = include_str!("../../data/measurements_catalog.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTag {
    Front,
    Side,
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageTag::Front => write!(f, "front"),
            ImageTag::Side => write!(f, "side"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDef {
    pub id: String,
    pub label: String,
    pub image: ImageTag,
    pub points: [String; 2],
}

/// Ordered list of measurement definitions. Output order follows this order.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    entries: Vec<MeasurementDef>,
}

impl Catalog {
    pub fn new(entries: Vec<MeasurementDef>) -> Result<Catalog> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::msg(format!("duplicate measurement id {}", entry.id)));
            }
        }

        Ok(Catalog { entries })
    }

    pub fn bundled() -> Result<Catalog> {
        Catalog::from_json(BUNDLED)
    }

    pub fn load(path: &Path) -> Result<Catalog> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading measurement catalog {}", path.display()))?;
        Catalog::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Catalog> {
        let entries: Vec<MeasurementDef> = serde_json::from_str(raw)?;
        Catalog::new(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementDef> {
        self.entries.iter()
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
    use super::*;

    #[test]
    fn test_from_json() {
        let catalog = Catalog::from_json(
            r#"[
                {"id": "ch-ch", "label": "Mouth width", "image": "front", "points": ["Ch_R", "Ch_L"]},
                {"id": "prn-sn", "label": "Tip", "image": "side", "points": ["Prn", "Sn"]}
            ]"#,
        )
        .unwrap();

        let ids: Vec<_> = catalog.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ch-ch", "prn-sn"]);
        assert_eq!(catalog.iter().nth(1).unwrap().image, ImageTag::Side);
    }

    #[test]
    fn test_rejects_bad_entries() {
        // three points
        assert!(Catalog::from_json(
            r#"[{"id": "a", "label": "A", "image": "front", "points": ["N", "Sn", "Me"]}]"#
        )
        .is_err());
        // unknown image
        assert!(Catalog::from_json(
            r#"[{"id": "a", "label": "A", "image": "top", "points": ["N", "Sn"]}]"#
        )
        .is_err());
        // duplicate id
        assert!(Catalog::from_json(
            r#"[{"id": "a", "label": "A", "image": "front", "points": ["N", "Sn"]},
                {"id": "a", "label": "B", "image": "side", "points": ["N", "Sn"]}]"#
        )
        .is_err());
    }

    #[test]
    fn test_bundled() {
        let catalog = Catalog::bundled().unwrap();
        assert!(!catalog.is_empty());
        for id in ["sn-gn", "zy-zy", "n-sn", "al-al", "ch-ch", "ls-sto", "sto-li"] {
            assert!(catalog.iter().any(|m| m.id == id), "missing {id}");
        }
    }
}
