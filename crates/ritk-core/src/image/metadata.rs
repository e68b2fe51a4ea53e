//! Physical-space geometry of an image, detached from its pixel data.
//!
//! `ImageMetadata` carries origin, spacing and direction and performs the
//! pixel↔physical mapping on the CPU. Estimators that touch every pixel of a
//! slice use it instead of round-tripping coordinates through tensors.

use crate::spatial::{Direction, Point, Spacing, Vector};

/// Image metadata containing physical space information.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMetadata<const D: usize> {
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
    inverse_direction: Direction<D>,
}

impl<const D: usize> ImageMetadata<D> {
    /// Create new image metadata.
    pub fn new(origin: Point<D>, spacing: Spacing<D>, direction: Direction<D>) -> Self {
        Self {
            origin,
            spacing,
            direction,
            inverse_direction: direction.inverse(),
        }
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// `point = origin + Direction * (index ∘ spacing)`
    pub fn index_to_physical(&self, index: &Point<D>) -> Point<D> {
        let mut scaled = Vector::<D>::zeros();
        for i in 0..D {
            scaled[i] = index[i] * self.spacing[i];
        }
        self.origin + self.direction * scaled
    }

    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn physical_to_index(&self, point: &Point<D>) -> Point<D> {
        let rotated = self.inverse_direction * (*point - self.origin);
        let mut index = Point::<D>::origin();
        for i in 0..D {
            index[i] = rotated[i] / self.spacing[i];
        }
        index
    }
}

impl ImageMetadata<3> {
    /// Geometry of axial slice `z`.
    ///
    /// The slice origin is the physical position of pixel `(0, 0, z)`, so the
    /// slice's 2D physical coordinates equal the x/y components of the
    /// volume's physical coordinates.
    pub fn slice(&self, z: usize) -> ImageMetadata<2> {
        let corner = self.index_to_physical(&Point::new([0.0, 0.0, z as f64]));
        ImageMetadata::new(
            Point::new([corner[0], corner[1]]),
            Spacing::new([self.spacing[0], self.spacing[1]]),
            self.direction.in_plane(),
        )
    }
}

impl<const D: usize> Default for ImageMetadata<D> {
    fn default() -> Self {
        Self::new(Point::origin(), Spacing::uniform(1.0), Direction::identity())
    }
}
