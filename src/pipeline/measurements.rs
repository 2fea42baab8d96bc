use super::mapping::Points;
use crate::config::{Catalog, ImageTag};
use serde::Serialize;
use std::collections::HashMap;

pub const UNIT: &str = "px";
pub const MISSING_LANDMARKS: &str = "Missing required landmarks for this measurement.";
pub const MISSING_MEASUREMENTS: &str = "Missing measurements for ratio.";
pub const ZERO_DENOMINATOR: &str = "Denominator is zero for this ratio.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioDef {
    pub id: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
}

pub const RATIO_DEFS: [RatioDef; 4] = [
    RatioDef {
        id: "face_height_to_width",
        numerator: "sn-gn",
        denominator: "zy-zy",
    },
    RatioDef {
        id: "nose_length_to_width",
        numerator: "n-sn",
        denominator: "al-al",
    },
    RatioDef {
        id: "mouth_to_nose_width",
        numerator: "ch-ch",
        denominator: "al-al",
    },
    RatioDef {
        id: "upper_to_lower_lip",
        numerator: "ls-sto",
        denominator: "sto-li",
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub id: String,
    pub label: String,
    pub image: ImageTag,
    pub points: [String; 2],
    pub value: Option<f64>,
    pub unit: &'static str,
    pub note: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ratio {
    pub id: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
    pub value: Option<f64>,
    pub note: Option<&'static str>,
}

/// Pixel distance for every catalog entry, in catalog order. A value is only
/// present when both endpoints resolved in the entry's own image.
pub fn compute_measurements(catalog: &Catalog, front: &Points, side: &Points) -> Vec<Measurement> {
    catalog
        .iter()
        .map(|def| {
            let points = match def.image {
                ImageTag::Front => front,
                ImageTag::Side => side,
            };
            let [a, b] = &def.points;

            let value = match (points.get(a), points.get(b)) {
                (Some(a), Some(b)) => Some(a.pixel.distance(&b.pixel)),
                _ => None,
            };

            Measurement {
                id: def.id.clone(),
                label: def.label.clone(),
                image: def.image,
                points: def.points.clone(),
                value,
                unit: UNIT,
                note: value.is_none().then_some(MISSING_LANDMARKS),
            }
        })
        .collect()
}

/// Ratios over `RATIO_DEFS`, in definition order.
pub fn compute_ratios(measurements: &[Measurement]) -> Vec<Ratio> {
    compute_ratios_for(&RATIO_DEFS, measurements)
}

pub fn compute_ratios_for(defs: &[RatioDef], measurements: &[Measurement]) -> Vec<Ratio> {
    let by_id: HashMap<&str, &Measurement> =
        measurements.iter().map(|m| (m.id.as_str(), m)).collect();

    defs.iter()
        .map(|def| {
            let numerator = by_id.get(def.numerator).and_then(|m| m.value);
            let denominator = by_id.get(def.denominator).and_then(|m| m.value);

            let (value, note) = match (numerator, denominator) {
                (Some(_), Some(d)) if d == 0. => (None, Some(ZERO_DENOMINATOR)),
                (Some(n), Some(d)) => (Some(n / d), None),
                _ => (None, Some(MISSING_MEASUREMENTS)),
            };

            Ratio {
                id: def.id,
                numerator: def.numerator,
                denominator: def.denominator,
                value,
                note,
            }
        })
        .collect()
}
