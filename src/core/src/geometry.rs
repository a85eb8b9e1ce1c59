use std::fmt;

use geo::{BoundingRect, CoordsIter, HasDimensions};
use geo_types::{Geometry, Rect};

/// Reason a geometry has no usable bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    /// The feature carries no geometry at all.
    Missing,
    /// The geometry has no coordinates (e.g. `GEOMETRYCOLLECTION EMPTY`).
    Empty,
    /// At least one coordinate is NaN or infinite.
    NonFinite,
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsError::Missing => write!(f, "geometry is null"),
            BoundsError::Empty => write!(f, "geometry is empty"),
            BoundsError::NonFinite => write!(f, "geometry has non-finite coordinates"),
        }
    }
}

/// Compute the axis-aligned bounding box of a geometry.
///
/// Unlike [`BoundingRect::bounding_rect`], this rejects geometries whose
/// coordinates contain NaN or infinity.
pub fn geometry_bounds(geometry: Option<&Geometry<f64>>) -> Result<Rect<f64>, BoundsError> {
    let Some(geometry) = geometry else {
        return Err(BoundsError::Missing);
    };
    if geometry
        .coords_iter()
        .any(|coord| !coord.x.is_finite() || !coord.y.is_finite())
    {
        return Err(BoundsError::NonFinite);
    }
    if geometry.is_empty() {
        return Err(BoundsError::Empty);
    }
    geometry.bounding_rect().ok_or(BoundsError::Empty)
}

/// Closed-interval rectangle intersection; boxes sharing only an edge or a
/// corner intersect.
pub fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    let (a_min, a_max) = (a.min(), a.max());
    let (b_min, b_max) = (b.min(), b.max());
    a_min.x <= b_max.x && b_min.x <= a_max.x && a_min.y <= b_max.y && b_min.y <= a_max.y
}
