//! Linear interpolation for 2D and 3D tensors.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use super::trait_::Interpolator;

/// What a sample reads when its neighbours fall outside the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfBounds {
    /// Clamp neighbour indices to the valid range (edge value).
    #[default]
    Clamp,
    /// Out-of-range neighbours contribute zero.
    Zero,
}

/// Linear Interpolator (bilinear for 2D, trilinear for 3D).
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator {
    out_of_bounds: OutOfBounds,
}

impl LinearInterpolator {
    /// Create a new linear interpolator with edge clamping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolator whose out-of-range neighbours read zero.
    pub fn zero_padded() -> Self {
        Self {
            out_of_bounds: OutOfBounds::Zero,
        }
    }
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate<const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        match D {
            3 => self.interpolate_3d(data, indices),
            2 => self.interpolate_2d(data, indices),
            // Only planes and volumes are sampled in this workspace.
            _ => {
                let [n, _] = indices.dims();
                Tensor::<B, 1>::zeros([n], &indices.device())
            }
        }
    }
}

/// Integer neighbour index clamped to `[0, size - 1]` and, for zero padding,
/// a 0/1 weight telling whether the unclamped index was inside.
struct Neighbour<B: Backend> {
    index: Tensor<B, 1, Int>,
    inside: Option<Tensor<B, 1>>,
}

impl LinearInterpolator {
    fn neighbour<B: Backend>(&self, coord: Tensor<B, 1>, size: usize) -> Neighbour<B> {
        let max = (size - 1) as f64;
        let inside = match self.out_of_bounds {
            OutOfBounds::Clamp => None,
            OutOfBounds::Zero => {
                let lower = coord.clone().greater_equal_elem(0.0).float();
                let upper = coord.clone().lower_equal_elem(max).float();
                Some(lower * upper)
            }
        };
        Neighbour {
            index: coord.clamp(0.0, max).int(),
            inside,
        }
    }

    fn gather<B: Backend>(flat: &Tensor<B, 1>, index: Tensor<B, 1, Int>, masks: &[&Neighbour<B>]) -> Tensor<B, 1> {
        let mut values = flat.clone().gather(0, index);
        for n in masks {
            if let Some(inside) = &n.inside {
                values = values * inside.clone();
            }
        }
        values
    }

    fn interpolate_3d<B: Backend, const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let dims = data.dims();
        let (d0, d1, d2) = (dims[0], dims[1], dims[2]); // Z, Y, X

        let x = indices.clone().narrow(1, 0, 1).squeeze::<1>(1);
        let y = indices.clone().narrow(1, 1, 1).squeeze::<1>(1);
        let z = indices.narrow(1, 2, 1).squeeze::<1>(1);

        let x0 = x.clone().floor();
        let y0 = y.clone().floor();
        let z0 = z.clone().floor();
        let wx = x - x0.clone();
        let wy = y - y0.clone();
        let wz = z - z0.clone();

        let nx0 = self.neighbour(x0.clone(), d2);
        let nx1 = self.neighbour(x0 + 1.0, d2);
        let ny0 = self.neighbour(y0.clone(), d1);
        let ny1 = self.neighbour(y0 + 1.0, d1);
        let nz0 = self.neighbour(z0.clone(), d0);
        let nz1 = self.neighbour(z0 + 1.0, d0);

        let stride_z = (d1 * d2) as i32;
        let stride_y = d2 as i32;
        let flat = data.clone().reshape([d0 * d1 * d2]);

        let at = |nx: &Neighbour<B>, ny: &Neighbour<B>, nz: &Neighbour<B>| {
            let idx = nz.index.clone() * stride_z + ny.index.clone() * stride_y + nx.index.clone();
            Self::gather(&flat, idx, &[nx, ny, nz])
        };

        let c00 = at(&nx0, &ny0, &nz0) * (-wx.clone() + 1.0) + at(&nx1, &ny0, &nz0) * wx.clone();
        let c01 = at(&nx0, &ny0, &nz1) * (-wx.clone() + 1.0) + at(&nx1, &ny0, &nz1) * wx.clone();
        let c10 = at(&nx0, &ny1, &nz0) * (-wx.clone() + 1.0) + at(&nx1, &ny1, &nz0) * wx.clone();
        let c11 = at(&nx0, &ny1, &nz1) * (-wx.clone() + 1.0) + at(&nx1, &ny1, &nz1) * wx;

        let c0 = c00 * (-wy.clone() + 1.0) + c10 * wy.clone();
        let c1 = c01 * (-wy.clone() + 1.0) + c11 * wy;

        c0 * (-wz.clone() + 1.0) + c1 * wz
    }

    fn interpolate_2d<B: Backend, const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let dims = data.dims();
        let (d0, d1) = (dims[0], dims[1]); // Y, X

        let x = indices.clone().narrow(1, 0, 1).squeeze::<1>(1);
        let y = indices.narrow(1, 1, 1).squeeze::<1>(1);

        let x0 = x.clone().floor();
        let y0 = y.clone().floor();
        let wx = x - x0.clone();
        let wy = y - y0.clone();

        let nx0 = self.neighbour(x0.clone(), d1);
        let nx1 = self.neighbour(x0 + 1.0, d1);
        let ny0 = self.neighbour(y0.clone(), d0);
        let ny1 = self.neighbour(y0 + 1.0, d0);

        let stride_y = d1 as i32;
        let flat = data.clone().reshape([d0 * d1]);

        let at = |nx: &Neighbour<B>, ny: &Neighbour<B>| {
            let idx = ny.index.clone() * stride_y + nx.index.clone();
            Self::gather(&flat, idx, &[nx, ny])
        };

        let c0 = at(&nx0, &ny0) * (-wx.clone() + 1.0) + at(&nx1, &ny0) * wx.clone();
        let c1 = at(&nx0, &ny1) * (-wx.clone() + 1.0) + at(&nx1, &ny1) * wx;

        c0 * (-wy.clone() + 1.0) + c1 * wy
    }
}
