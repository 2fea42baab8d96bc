use crate::shapes::point::{MeshPoint, PixelPoint};
use crate::shapes::rect::NormRect;
use tracing::trace;

const IMAGE_CENTER: PixelPoint = PixelPoint { x: 0.5, y: 0.5 };

/// A detected face with the bounds and relevance score used to pick it.
#[derive(Debug, Clone)]
pub struct FaceCandidate<'a, P> {
    pub mesh: &'a [P],
    pub bounds: NormRect,
    pub score: f64,
}

impl<'a, P: MeshPoint> FaceCandidate<'a, P> {
    /// `None` for an empty mesh, which has no bounds to score.
    pub fn new(mesh: &'a [P]) -> Option<FaceCandidate<'a, P>> {
        let bounds = NormRect::from_points(mesh)?;
        let area = bounds.area();
        let dist = bounds.center().distance(&IMAGE_CENTER);

        Some(FaceCandidate {
            mesh,
            bounds,
            score: area - (dist * area * 0.5),
        })
    }
}

/// Pick the largest, most central face. Scoring happens in normalized space so
/// it is independent of image resolution. Ties go to the earlier face.
pub fn select_face<P: MeshPoint>(faces: &[Vec<P>]) -> Option<FaceCandidate<'_, P>> {
    let mut best: Option<FaceCandidate<'_, P>> = None;

    for (idx, face) in faces.iter().enumerate() {
        let Some(candidate) = FaceCandidate::new(face) else {
            trace!("Skipping empty face {idx}");
            continue;
        };
        trace!("Face {idx} scored {}", candidate.score);

        if best.as_ref().is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }

    best
}
