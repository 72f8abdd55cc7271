//! Geodetic bounding rectangles.

use super::{negative_pi_to_pi, Cartographic};
use std::f64::consts::{PI, TAU};

/// Geodetic bounding box in radians.
///
/// `east < west` means the rectangle crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            west.to_radians(),
            south.to_radians(),
            east.to_radians(),
            north.to_radians(),
        )
    }

    /// Longitudinal extent in radians, accounting for antimeridian wrap.
    pub fn width(&self) -> f64 {
        let mut east = self.east;
        if east < self.west {
            east += TAU;
        }
        east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Center of the rectangle at zero height.
    pub fn center(&self) -> Cartographic {
        let mut east = self.east;
        if east < self.west {
            east += TAU;
        }

        let longitude = negative_pi_to_pi((self.west + east) * 0.5);
        let latitude = (self.south + self.north) * 0.5;

        Cartographic::new(longitude, latitude, 0.0)
    }
}

/// Incremental bounding-rectangle builder.
///
/// Tracks both the plain longitude span and the span with negative
/// longitudes shifted into `[π, 2π)`, so that vertex sets straddling the
/// antimeridian get the narrow rectangle. Also tracks the height range.
#[derive(Debug, Clone, Copy)]
pub struct RectangleAccumulator {
    west: f64,
    east: f64,
    west_over_idl: f64,
    east_over_idl: f64,
    south: f64,
    north: f64,
    min_height: f64,
    max_height: f64,
    count: usize,
}

impl Default for RectangleAccumulator {
    fn default() -> Self {
        Self {
            west: f64::MAX,
            east: -f64::MAX,
            west_over_idl: f64::MAX,
            east_over_idl: -f64::MAX,
            south: f64::MAX,
            north: -f64::MAX,
            min_height: f64::MAX,
            max_height: -f64::MAX,
            count: 0,
        }
    }
}

impl RectangleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, position: &Cartographic) {
        let longitude = position.longitude;
        self.west = self.west.min(longitude);
        self.east = self.east.max(longitude);
        self.south = self.south.min(position.latitude);
        self.north = self.north.max(position.latitude);

        let adjusted = if longitude >= 0.0 {
            longitude
        } else {
            longitude + TAU
        };
        self.west_over_idl = self.west_over_idl.min(adjusted);
        self.east_over_idl = self.east_over_idl.max(adjusted);

        self.min_height = self.min_height.min(position.height);
        self.max_height = self.max_height.max(position.height);
        self.count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Vertical extent of everything added so far (0 when empty).
    pub fn height_range(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max_height - self.min_height
        }
    }

    /// The narrower of the plain and antimeridian-adjusted rectangles.
    ///
    /// Returns `None` if nothing was added.
    pub fn rectangle(&self) -> Option<Rectangle> {
        if self.is_empty() {
            return None;
        }

        let mut west = self.west;
        let mut east = self.east;

        if east - west > self.east_over_idl - self.west_over_idl {
            west = self.west_over_idl;
            east = self.east_over_idl;

            if east > PI {
                east -= TAU;
            }
            if west > PI {
                west -= TAU;
            }
        }

        Some(Rectangle::new(west, self.south, east, self.north))
    }
}

/// Computes the smallest rectangle enclosing `positions`.
///
/// Returns `None` for an empty slice.
pub fn rectangle_from_cartographic_array(positions: &[Cartographic]) -> Option<Rectangle> {
    let mut acc = RectangleAccumulator::new();
    for p in positions {
        acc.add(p);
    }
    acc.rectangle()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_simple() {
        let rect = Rectangle::from_degrees(10.0, 20.0, 30.0, 40.0);
        let c = rect.center();
        assert!((c.longitude_degrees() - 20.0).abs() < 1e-9);
        assert!((c.latitude_degrees() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_center_across_antimeridian() {
        let rect = Rectangle::from_degrees(170.0, 0.0, -170.0, 10.0);
        let c = rect.center();
        assert!(
            (c.longitude_degrees().abs() - 180.0).abs() < 1e-9,
            "expected ±180, got {}",
            c.longitude_degrees()
        );
    }

    #[test]
    fn test_rectangle_picks_idl_span() {
        let positions = [
            Cartographic::from_degrees(-179.0, 0.0, 0.0),
            Cartographic::from_degrees(-178.0, 1.0, 0.0),
            Cartographic::from_degrees(179.0, 2.0, 0.0),
        ];
        let rect = rectangle_from_cartographic_array(&positions).unwrap();

        assert!((rect.width().to_degrees() - 3.0).abs() < 1e-9);
        assert!((rect.west.to_degrees() - 179.0).abs() < 1e-9);
        assert!((rect.east.to_degrees() - (-178.0)).abs() < 1e-9);
    }

    #[test]
    fn test_rectangle_idl_narrower_than_naive() {
        let positions = [
            Cartographic::from_degrees(-179.0, 0.0, 0.0),
            Cartographic::from_degrees(179.0, 0.0, 0.0),
        ];
        let rect = rectangle_from_cartographic_array(&positions).unwrap();
        assert!((rect.width().to_degrees() - 2.0).abs() < 1e-9);
        assert!(rect.width().to_degrees() < 358.0);
    }

    #[test]
    fn test_rectangle_keeps_naive_span() {
        let positions = [
            Cartographic::from_degrees(-10.0, -5.0, 0.0),
            Cartographic::from_degrees(10.0, 5.0, 0.0),
        ];
        let rect = rectangle_from_cartographic_array(&positions).unwrap();
        assert!((rect.west.to_degrees() + 10.0).abs() < 1e-9);
        assert!((rect.east.to_degrees() - 10.0).abs() < 1e-9);
        assert!((rect.south.to_degrees() + 5.0).abs() < 1e-9);
        assert!((rect.north.to_degrees() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_array() {
        assert!(rectangle_from_cartographic_array(&[]).is_none());
        assert_eq!(RectangleAccumulator::new().height_range(), 0.0);
    }

    #[test]
    fn test_height_range() {
        let mut acc = RectangleAccumulator::new();
        acc.add(&Cartographic::from_degrees(139.0, 35.0, 3.0));
        acc.add(&Cartographic::from_degrees(139.0, 35.0, 27.5));
        acc.add(&Cartographic::from_degrees(139.0, 35.0, 10.0));
        assert_eq!(acc.len(), 3);
        assert!((acc.height_range() - 24.5).abs() < 1e-12);
    }
}
