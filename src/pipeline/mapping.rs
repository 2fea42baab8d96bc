use crate::config::SemanticMap;
use crate::shapes::point::{Landmark, MeshPoint, PixelPoint};
use serde::Serialize;
use std::collections::BTreeMap;

// mesh indices averaged into the nose tip
const PRN_IDXS: [usize; 2] = [4, 1];

/// A named landmark resolved in one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappedPoint {
    /// Source mesh index, `None` when the point was synthesized
    pub index: Option<usize>,
    pub pixel: PixelPoint,
    pub normalized: Landmark,
}

impl MappedPoint {
    pub fn from_mesh<P: MeshPoint>(index: usize, p: &P, width: u32, height: u32) -> MappedPoint {
        MappedPoint {
            index: Some(index),
            pixel: p.to_pixel(width, height),
            normalized: Landmark::new(p.x(), p.y(), p.z()),
        }
    }

    /// A 2-D only point given in normalized coordinates.
    pub fn synthesized(x: f64, y: f64, width: u32, height: u32) -> MappedPoint {
        let normalized = Landmark::new(x, y, 0.);
        MappedPoint {
            index: None,
            pixel: normalized.to_pixel(width, height),
            normalized,
        }
    }
}

/// Resolved points of one image keyed by label.
pub type Points = BTreeMap<String, MappedPoint>;

/// One row of the mandatory landmark report. Coordinates are `None` when the
/// label could not be resolved in either image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandmarkEntry {
    pub label: String,
    pub index: Option<usize>,
    pub pixel: Option<PixelPoint>,
    pub normalized: Option<Landmark>,
}

/// Project a face mesh onto the labels of `map`. Labels that cannot be
/// resolved are left out.
pub fn map_points<P: MeshPoint>(mesh: &[P], map: &SemanticMap, width: u32, height: u32) -> Points {
    let mut points = Points::new();

    for (label, index) in map.iter() {
        let Some(index) = index else {
            continue;
        };
        if let Some(p) = mesh.get(index) {
            points.insert(
                label.to_string(),
                MappedPoint::from_mesh(index, p, width, height),
            );
        }
    }

    if map.contains("Prn") && mesh.len() > PRN_IDXS[0] {
        let a = &mesh[PRN_IDXS[0]];
        let b = &mesh[PRN_IDXS[1]];
        let normalized =
            Landmark::new(a.x(), a.y(), a.z()).midpoint(&Landmark::new(b.x(), b.y(), b.z()));
        points.insert(
            "Prn".to_string(),
            MappedPoint {
                index: None,
                pixel: normalized.to_pixel(width, height),
                normalized,
            },
        );
    }

    if !points.contains_key("Sto") {
        if let (Some(ls), Some(li)) = (points.get("Ls"), points.get("Li")) {
            let sto = MappedPoint {
                index: None,
                pixel: ls.pixel.midpoint(&li.pixel),
                normalized: ls.normalized.midpoint(&li.normalized),
            };
            points.insert("Sto".to_string(), sto);
        }
    }

    points
}

/// Every label of `map` exactly once, in map order, taking the front point
/// before the side point.
pub fn mandatory_landmarks(map: &SemanticMap, front: &Points, side: &Points) -> Vec<LandmarkEntry> {
    map.iter()
        .map(|(label, index)| match front.get(label).or_else(|| side.get(label)) {
            Some(p) => LandmarkEntry {
                label: label.to_string(),
                index: p.index,
                pixel: Some(p.pixel),
                normalized: Some(p.normalized),
            },
            None => LandmarkEntry {
                label: label.to_string(),
                index,
                pixel: None,
                normalized: None,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn map(entries: &[(&str, Option<usize>)]) -> SemanticMap {
        SemanticMap::new(
            entries
                .iter()
                .map(|(l, i)| (l.to_string(), *i))
                .collect(),
        )
        .unwrap()
    }

    fn mesh() -> Vec<Landmark> {
        vec![
            Landmark::new(0.0, 0.0, 0.0),
            Landmark::new(0.2, 0.3, 0.1),
            Landmark::new(0.0, 0.0, 0.0),
            Landmark::new(0.0, 0.0, 0.0),
            Landmark::new(0.6, 0.7, 0.5),
        ]
    }

    #[test]
    fn test_prn_midpoint_from_mesh_points() {
        let points = map_points(&mesh(), &map(&[("Prn", Some(4))]), 100, 200);

        let prn = points["Prn"];
        assert_eq!(prn.index, None);
        assert_eq!(prn.pixel, PixelPoint::new(40.0, 100.0));
        assert_eq!(prn.normalized, Landmark::new(0.4, 0.5, 0.3));
    }

    #[test]
    fn test_prn_needs_five_points() {
        let short = &mesh()[..4];
        let points = map_points(short, &map(&[("Prn", None)]), 100, 200);
        assert!(points.get("Prn").is_none());
    }

    #[test]
    fn test_direct_points() {
        let points = map_points(&mesh(), &map(&[("A", Some(1)), ("B", None), ("C", Some(9))]), 100, 200);

        assert_eq!(points.len(), 1);
        let a = points["A"];
        assert_eq!(a.index, Some(1));
        assert_eq!(a.pixel, PixelPoint::new(20.0, 60.0));
        assert_eq!(a.normalized, Landmark::new(0.2, 0.3, 0.1));
    }

    #[test]
    fn test_sto_synthesized_from_lips() {
        let points = map_points(&mesh(), &map(&[("Ls", Some(1)), ("Li", Some(4)), ("Sto", None)]), 100, 200);

        let sto = points["Sto"];
        assert_eq!(sto.index, None);
        assert_eq!(sto.pixel, PixelPoint::new(40.0, 100.0));
        assert_eq!(sto.normalized, Landmark::new(0.4, 0.5, 0.3));
    }

    #[test]
    fn test_sto_direct_wins() {
        let points = map_points(
            &mesh(),
            &map(&[("Ls", Some(1)), ("Li", Some(4)), ("Sto", Some(0))]),
            100,
            200,
        );
        assert_eq!(points["Sto"].index, Some(0));
    }

    #[test]
    fn test_sto_missing_lip() {
        let points = map_points(&mesh(), &map(&[("Ls", Some(1)), ("Li", Some(40))]), 100, 200);
        assert!(points.get("Sto").is_none());
    }

    #[test]
    fn test_mandatory_landmarks() {
        let semantic = map(&[("Tr_R", None), ("N", Some(1)), ("Sn", Some(4)), ("Pg", Some(99))]);
        let front = map_points(&mesh(), &map(&[("N", Some(1))]), 100, 200);
        let side = map_points(&mesh(), &map(&[("N", Some(4)), ("Sn", Some(4))]), 50, 50);

        let entries = mandatory_landmarks(&semantic, &front, &side);
        assert_eq!(entries.len(), semantic.len());
        let labels: HashSet<_> = entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels.len(), entries.len());

        // front first
        assert_eq!(entries[1].pixel, Some(PixelPoint::new(20.0, 60.0)));
        // then side
        assert_eq!(entries[2].pixel, Some(PixelPoint::new(30.0, 35.0)));
        // unresolved keeps the declared index
        assert_eq!(entries[3].index, Some(99));
        assert!(entries[3].pixel.is_none());
        assert!(entries[0].normalized.is_none());
    }
}
