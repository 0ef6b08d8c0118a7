//! Planar geometry shared by the classifier and the deformation planner

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point in the XY plane (mm)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Dot product with a direction vector
    pub fn dot(&self, dir: (f64, f64)) -> f64 {
        self.x * dir.0 + self.y * dir.1
    }
}

/// Axis-aligned planar bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2 {
    pub min: Point2,
    pub max: Point2,
}

impl Bounds2 {
    /// An empty box that any `include` call will replace
    pub fn empty() -> Self {
        Self {
            min: Point2::new(f64::INFINITY, f64::INFINITY),
            max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point2>) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.include(*p);
        }
        bounds
    }

    pub fn include(&mut self, p: Point2) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max.x - self.min.x
        }
    }

    pub fn height(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max.y - self.min.y
        }
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// True when `other` lies inside this box and the two boxes are not identical
    pub fn strictly_contains(&self, other: &Bounds2, tolerance: f64) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let inside = other.min.x >= self.min.x - tolerance
            && other.min.y >= self.min.y - tolerance
            && other.max.x <= self.max.x + tolerance
            && other.max.y <= self.max.y + tolerance;
        inside && self.area() > other.area() + tolerance * tolerance
    }
}

/// Direction along which a sinusoidal offset travels
///
/// Positions are projected onto the unit vector of the direction before the
/// wave is evaluated, so `NegX` runs the same wave mirrored along X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveDirection {
    X,
    Y,
    Xy,
    NegX,
    NegY,
    NegXy,
}

impl WaveDirection {
    /// Unit vector of the direction in the XY plane
    pub fn unit_vector(&self) -> (f64, f64) {
        let d = std::f64::consts::FRAC_1_SQRT_2;
        match self {
            Self::X => (1.0, 0.0),
            Self::Y => (0.0, 1.0),
            Self::Xy => (d, d),
            Self::NegX => (-1.0, 0.0),
            Self::NegY => (0.0, -1.0),
            Self::NegXy => (-d, -d),
        }
    }

    /// Project a point onto this direction (mm along the direction)
    pub fn project(&self, p: &Point2) -> f64 {
        p.dot(self.unit_vector())
    }
}

impl Default for WaveDirection {
    fn default() -> Self {
        Self::X
    }
}

impl fmt::Display for WaveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
            Self::Xy => write!(f, "xy"),
            Self::NegX => write!(f, "negx"),
            Self::NegY => write!(f, "negy"),
            Self::NegXy => write!(f, "negxy"),
        }
    }
}

impl FromStr for WaveDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x" => Ok(Self::X),
            "y" => Ok(Self::Y),
            "xy" => Ok(Self::Xy),
            "negx" | "-x" => Ok(Self::NegX),
            "negy" | "-y" => Ok(Self::NegY),
            "negxy" | "-xy" => Ok(Self::NegXy),
            _ => Err(format!("Unknown wave direction: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_direction_projection() {
        let p = Point2::new(3.0, 4.0);
        assert_relative_eq!(WaveDirection::X.project(&p), 3.0);
        assert_relative_eq!(WaveDirection::NegY.project(&p), -4.0);
        assert_relative_eq!(
            WaveDirection::Xy.project(&p),
            7.0 * std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_direction_parse_roundtrip() {
        for dir in [
            WaveDirection::X,
            WaveDirection::Y,
            WaveDirection::Xy,
            WaveDirection::NegX,
            WaveDirection::NegY,
            WaveDirection::NegXy,
        ] {
            assert_eq!(dir.to_string().parse::<WaveDirection>(), Ok(dir));
        }
        assert!("diagonal".parse::<WaveDirection>().is_err());
    }

    #[test]
    fn test_bounds_containment() {
        let outer = Bounds2::from_points(&[Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)]);
        let inner = Bounds2::from_points(&[Point2::new(1.0, 1.0), Point2::new(9.0, 9.0)]);
        assert!(outer.strictly_contains(&inner, 0.01));
        assert!(!inner.strictly_contains(&outer, 0.01));
        assert!(!outer.strictly_contains(&outer, 0.01));
        assert_relative_eq!(outer.area(), 100.0);
    }

    #[test]
    fn test_empty_bounds() {
        let b = Bounds2::empty();
        assert!(b.is_empty());
        assert_eq!(b.area(), 0.0);
    }
}
