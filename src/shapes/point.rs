use serde::Serialize;

/// Anything that can stand in for a face mesh point: a position in normalized
/// image space, x and y in [0, 1], z as relative depth.
pub trait MeshPoint {
    fn x(&self) -> f64;
    fn y(&self) -> f64;
    fn z(&self) -> f64;

    fn to_pixel(&self, width: u32, height: u32) -> PixelPoint {
        PixelPoint {
            x: self.x() * width as f64,
            y: self.y() * height as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Landmark {
        Landmark { x, y, z }
    }

    pub fn midpoint(&self, other: &Landmark) -> Landmark {
        Landmark {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
        }
    }
}

impl MeshPoint for Landmark {
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
    fn z(&self) -> f64 {
        self.z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> PixelPoint {
        PixelPoint { x, y }
    }

    pub fn distance(&self, other: &PixelPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &PixelPoint) -> PixelPoint {
        PixelPoint {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }

    /// Integer pixel position, truncated toward zero.
    pub fn truncated(&self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}
