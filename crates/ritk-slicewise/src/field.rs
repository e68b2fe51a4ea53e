//! Displacement fields built one z-plane at a time.
//!
//! Each field owns one slot per z. A slot is written at most once, so slices
//! can be estimated in any order, in parallel, without sharing a buffer.

use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;

use crate::error::{Result, SlicewiseError};

/// In-plane displacement of one slice, in physical units, indexed `[[x, y]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementPlane {
    pub dx: Array2<f64>,
    pub dy: Array2<f64>,
}

impl DisplacementPlane {
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self::constant(nx, ny, [0.0, 0.0])
    }

    pub fn constant(nx: usize, ny: usize, value: [f64; 2]) -> Self {
        Self {
            dx: Array2::from_elem((nx, ny), value[0]),
            dy: Array2::from_elem((nx, ny), value[1]),
        }
    }

    /// Plane with `displacement(x, y)` at every pixel.
    pub fn from_fn(nx: usize, ny: usize, mut displacement: impl FnMut(usize, usize) -> [f64; 2]) -> Self {
        let mut plane = Self::zeros(nx, ny);
        for x in 0..nx {
            for y in 0..ny {
                let [dx, dy] = displacement(x, y);
                plane.dx[[x, y]] = dx;
                plane.dy[[x, y]] = dy;
            }
        }
        plane
    }

    pub fn dims(&self) -> [usize; 2] {
        let s = self.dx.shape();
        [s[0], s[1]]
    }

    pub fn at(&self, x: usize, y: usize) -> [f64; 2] {
        [self.dx[[x, y]], self.dy[[x, y]]]
    }
}

/// Dense 2-component displacement over an `(nx, ny, nz)` grid.
#[derive(Debug, Clone)]
pub struct DisplacementField {
    nx: usize,
    ny: usize,
    planes: Vec<Option<DisplacementPlane>>,
}

impl DisplacementField {
    /// Empty field; unwritten planes read as zero displacement.
    pub fn new([nx, ny, nz]: [usize; 3]) -> Self {
        Self {
            nx,
            ny,
            planes: vec![None; nz],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.planes.len()]
    }

    pub fn is_written(&self, z: usize) -> bool {
        self.planes.get(z).is_some_and(Option::is_some)
    }

    pub fn written_slices(&self) -> Vec<usize> {
        (0..self.planes.len()).filter(|&z| self.is_written(z)).collect()
    }

    pub fn plane(&self, z: usize) -> Option<&DisplacementPlane> {
        self.planes.get(z).and_then(Option::as_ref)
    }

    /// Displacement at voxel `(x, y, z)`.
    pub fn at(&self, x: usize, y: usize, z: usize) -> [f64; 2] {
        self.plane(z).map_or([0.0, 0.0], |p| p.at(x, y))
    }

    /// Store the displacement of slice `z`.
    pub fn write(&mut self, z: usize, plane: DisplacementPlane) -> Result<()> {
        let (nx, ny, nz) = (self.nx, self.ny, self.planes.len());
        let slot = self.planes.get_mut(z).ok_or_else(|| SlicewiseError::ShapeMismatch {
            expected: vec![nz],
            actual: vec![z],
        })?;
        store(slot, z, nx, ny, plane)
    }

    /// `(dx, dy)` as `(nx, ny, nz)` arrays.
    pub fn to_components(&self) -> (Array3<f64>, Array3<f64>) {
        let shape = (self.nx, self.ny, self.planes.len());
        let mut dx = Array3::zeros(shape);
        let mut dy = Array3::zeros(shape);
        for (z, plane) in self.planes.iter().enumerate() {
            if let Some(plane) = plane {
                dx.index_axis_mut(Axis(2), z).assign(&plane.dx);
                dy.index_axis_mut(Axis(2), z).assign(&plane.dy);
            }
        }
        (dx, dy)
    }
}

fn store(slot: &mut Option<DisplacementPlane>, z: usize, nx: usize, ny: usize, plane: DisplacementPlane) -> Result<()> {
    if slot.is_some() {
        return Err(SlicewiseError::PlaneAlreadyWritten { z });
    }
    if plane.dims() != [nx, ny] || plane.dy.shape() != plane.dx.shape() {
        return Err(SlicewiseError::ShapeMismatch {
            expected: vec![nx, ny],
            actual: plane.dy.shape().to_vec(),
        });
    }
    *slot = Some(plane);
    Ok(())
}

/// Forward field (destination grid) and inverse field (source grid).
#[derive(Debug, Clone)]
pub struct FieldPair {
    pub forward: DisplacementField,
    pub inverse: DisplacementField,
}

impl FieldPair {
    pub fn new(destination: [usize; 3], source: [usize; 3]) -> Self {
        Self {
            forward: DisplacementField::new(destination),
            inverse: DisplacementField::new(source),
        }
    }

    /// Estimate every slice with `estimate` on the current rayon pool.
    ///
    /// `estimate(z)` returns the `(forward, inverse)` planes of slice `z`,
    /// or `None` to leave the slice at identity.
    pub fn fill_parallel<F>(&mut self, estimate: F) -> Result<()>
    where
        F: Fn(usize) -> Result<Option<(DisplacementPlane, DisplacementPlane)>> + Sync,
    {
        let [fnx, fny, fnz] = self.forward.dims();
        let [inx, iny, inz] = self.inverse.dims();
        if fnz != inz {
            return Err(SlicewiseError::ShapeMismatch {
                expected: vec![fnz],
                actual: vec![inz],
            });
        }
        self.forward
            .planes
            .par_iter_mut()
            .zip(self.inverse.planes.par_iter_mut())
            .enumerate()
            .try_for_each(|(z, (forward, inverse))| {
                if let Some((f, i)) = estimate(z)? {
                    store(forward, z, fnx, fny, f)?;
                    store(inverse, z, inx, iny, i)?;
                }
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_written_once() {
        let mut field = DisplacementField::new([4, 3, 2]);
        field.write(1, DisplacementPlane::constant(4, 3, [1.0, -2.0])).unwrap();
        let err = field.write(1, DisplacementPlane::zeros(4, 3)).unwrap_err();
        assert!(matches!(err, SlicewiseError::PlaneAlreadyWritten { z: 1 }));
        assert_eq!(field.at(3, 2, 1), [1.0, -2.0]);
        assert_eq!(field.at(3, 2, 0), [0.0, 0.0]);
        assert_eq!(field.written_slices(), vec![1]);
    }

    #[test]
    fn test_write_checks_shape() {
        let mut field = DisplacementField::new([4, 3, 2]);
        assert!(matches!(
            field.write(0, DisplacementPlane::zeros(3, 4)),
            Err(SlicewiseError::ShapeMismatch { .. })
        ));
        assert!(field.write(5, DisplacementPlane::zeros(4, 3)).is_err());
        assert!(!field.is_written(0));
    }

    #[test]
    fn test_parallel_fill_matches_index() {
        let mut pair = FieldPair::new([3, 3, 6], [2, 2, 6]);
        pair.fill_parallel(|z| {
            Ok((z % 2 == 0).then(|| {
                (
                    DisplacementPlane::constant(3, 3, [z as f64, 0.0]),
                    DisplacementPlane::constant(2, 2, [-(z as f64), 0.0]),
                )
            }))
        })
        .unwrap();
        assert_eq!(pair.forward.written_slices(), vec![0, 2, 4]);
        assert_eq!(pair.forward.at(1, 1, 4), [4.0, 0.0]);
        assert_eq!(pair.inverse.at(1, 1, 4), [-4.0, 0.0]);

        let (dx, _) = pair.forward.to_components();
        assert_eq!(dx[[2, 2, 2]], 2.0);
        assert_eq!(dx[[2, 2, 3]], 0.0);
    }

    #[test]
    fn test_parallel_fill_propagates_errors() {
        let mut pair = FieldPair::new([2, 2, 3], [2, 2, 3]);
        let err = pair
            .fill_parallel(|z| if z == 1 { Err(SlicewiseError::DegenerateVector("bad".into())) } else { Ok(None) })
            .unwrap_err();
        assert!(matches!(err, SlicewiseError::DegenerateVector(_)));
    }
}
