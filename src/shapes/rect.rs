use super::point::{MeshPoint, PixelPoint};

/// Axis aligned bounds in normalized image space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NormRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl NormRect {
    /// Bounds of a point cloud, `None` when there are no points.
    pub fn from_points<P: MeshPoint>(points: &[P]) -> Option<NormRect> {
        let first = points.first()?;
        let init = NormRect {
            min_x: first.x(),
            min_y: first.y(),
            max_x: first.x(),
            max_y: first.y(),
        };

        Some(points.iter().fold(init, |r, p| NormRect {
            min_x: r.min_x.min(p.x()),
            min_y: r.min_y.min(p.y()),
            max_x: r.max_x.max(p.x()),
            max_y: r.max_y.max(p.y()),
        }))
    }

    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).max(0.)
    }

    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).max(0.)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint {
            x: (self.min_x + self.max_x) / 2.,
            y: (self.min_y + self.max_y) / 2.,
        }
    }

    pub fn from_center(xc: f64, yc: f64, w: f64, h: f64) -> NormRect {
        NormRect {
            min_x: xc - w / 2.,
            min_y: yc - h / 2.,
            max_x: xc + w / 2.,
            max_y: yc + h / 2.,
        }
    }

    /// Intersection over union, as a percentage.
    pub fn overlap_pct(&self, other: &NormRect) -> f64 {
        let x_min = self.min_x.max(other.min_x);
        let x_max = self.max_x.min(other.max_x);
        let y_min = self.min_y.max(other.min_y);
        let y_max = self.max_y.min(other.max_y);

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) * (y_max - y_min)
        } else {
            0.
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0. {
            overlap_area / area_delta * 100.
        } else {
            0.
        }
    }
}

/// Pixel box given by inclusive corners, as used for label backgrounds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelRect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> PixelRect {
        PixelRect { x1, y1, x2, y2 }
    }

    /// Clamp every corner into a `width`x`height` image.
    pub fn clamp(&self, width: u32, height: u32) -> PixelRect {
        let max_x = width.saturating_sub(1) as i32;
        let max_y = height.saturating_sub(1) as i32;
        PixelRect {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1 + 1).max(1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1 + 1).max(1) as u32
    }
}

impl From<PixelRect> for imageproc::rect::Rect {
    fn from(r: PixelRect) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(r.x1, r.y1).of_size(r.width(), r.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::point::Landmark;

    #[test]
    fn test_from_points() {
        let points = [
            Landmark::new(0.2, 0.4, 0.),
            Landmark::new(0.6, 0.1, 0.),
            Landmark::new(0.4, 0.9, 0.),
        ];
        let r = NormRect::from_points(&points).unwrap();
        assert_eq!(r.min_x, 0.2);
        assert_eq!(r.max_x, 0.6);
        assert_eq!(r.min_y, 0.1);
        assert_eq!(r.max_y, 0.9);
        assert_eq!(r.center(), PixelPoint::new(0.4, 0.5));
    }

    #[test]
    fn test_from_no_points() {
        let points: [Landmark; 0] = [];
        assert!(NormRect::from_points(&points).is_none());
    }

    #[test]
    fn test_overlap_pct() {
        let a = NormRect::from_center(0.5, 0.5, 0.2, 0.2);
        let b = NormRect::from_center(0.6, 0.5, 0.2, 0.2);
        let far = NormRect::from_center(0.1, 0.1, 0.1, 0.1);

        assert!((a.overlap_pct(&a) - 100.).abs() < 1e-9);
        assert!((a.overlap_pct(&b) - 100. / 3.).abs() < 1e-6);
        assert_eq!(a.overlap_pct(&far), 0.);
    }

    #[test]
    fn test_clamp() {
        let r = PixelRect::new(-4, 95, 120, 130).clamp(100, 100);
        assert_eq!(r, PixelRect::new(0, 95, 99, 99));
        assert_eq!(r.width(), 100);
        assert_eq!(r.height(), 5);

        let collapsed = PixelRect::new(140, 140, 150, 150).clamp(100, 100);
        assert_eq!(collapsed.width(), 1);
        assert_eq!(collapsed.height(), 1);
    }
}
