//! Symmetry axis from the gradient-orientation histogram of a slice.
//!
//! Orientations are weighted by gradient magnitude and by a Gaussian window
//! around the structure's center of mass. An image symmetric about the axis
//! at angle `a` has a histogram satisfying `h(t) = h(2a - t)`, so the
//! circular autoconvolution of the histogram peaks at offset `2a`.

use std::f64::consts::PI;

use crate::config::HistogramSmoothing;
use crate::error::{Result, SlicewiseError};
use crate::plane::Plane;

#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryOptions {
    /// Half-width of the searched angle window, radians.
    pub capture_range: f64,
    /// Histogram bins over the full circle, rounded up to an even count.
    pub bins: usize,
    /// Standard deviation of the spatial weighting window, mm.
    pub sigma_mm: f64,
    pub smoothing: HistogramSmoothing,
    /// Median width or Gaussian sigma in bins; also the peak neighbourhood.
    pub smoothing_width: usize,
}

impl Default for SymmetryOptions {
    fn default() -> Self {
        Self {
            capture_range: 20f64.to_radians(),
            bins: 360,
            sigma_mm: 10.0,
            smoothing: HistogramSmoothing::Median,
            smoothing_width: 5,
        }
    }
}

impl SymmetryOptions {
    pub fn with_capture_range(mut self, capture_range: f64) -> Self {
        self.capture_range = capture_range;
        self
    }

    pub fn with_smoothing(mut self, smoothing: HistogramSmoothing) -> Self {
        self.smoothing = smoothing;
        self
    }

    fn bin_count(&self) -> usize {
        let n = self.bins.max(4);
        n + n % 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryEstimate {
    /// Symmetry axis angle, radians.
    pub angle: f64,
    /// Top autoconvolution peak over the runner-up (or over the mean).
    pub confidence: f64,
    /// Offset of the peak inside the searched window, in half bins.
    pub peak_offset: i64,
}

/// Estimate the symmetry axis of `plane` around `center_of_mass` (pixels).
pub fn symmetry_angle(
    plane: &Plane<'_>,
    center_of_mass: [f64; 2],
    options: &SymmetryOptions,
) -> Result<SymmetryEstimate> {
    let not_found = SlicewiseError::AngleNotFound { z: plane.z };
    let n = options.bin_count();
    let bin_width = 2.0 * PI / n as f64;

    let histogram = orientation_histogram(plane, center_of_mass, options.sigma_mm, n).ok_or(not_found)?;
    let histogram = match options.smoothing {
        HistogramSmoothing::Median => circular_median(&histogram, options.smoothing_width),
        HistogramSmoothing::Gaussian => circular_gaussian(&histogram, options.smoothing_width as f64),
    };
    let conv = circular_autoconvolution(&histogram);

    // Offset j in [-m, m] is the axis angle j * w / 2.
    let m = ((2.0 * options.capture_range / bin_width).floor() as i64).min(n as i64 / 2 - 1);

    // The peak is the highest local maximum of the window. A window edge
    // still climbing towards an angle outside the range is not a peak.
    let maxima = local_maxima(&conv, m, options.smoothing_width.max(1));
    let (peak, top) = maxima
        .iter()
        .copied()
        .reduce(|best, (j, v)| if v > best.1 { (j, v) } else { best })
        .ok_or(SlicewiseError::AngleNotFound { z: plane.z })?;

    let runner_up = maxima
        .iter()
        .filter(|&&(j, _)| j != peak)
        .map(|&(_, v)| v)
        .fold(f64::NEG_INFINITY, f64::max);
    let confidence = if runner_up > 0.0 {
        top / runner_up
    } else {
        top / (conv.iter().sum::<f64>() / n as f64)
    };

    Ok(SymmetryEstimate {
        angle: peak as f64 * bin_width / 2.0,
        confidence,
        peak_offset: peak,
    })
}

/// Weighted orientation histogram; `None` when no pixel carries weight.
fn orientation_histogram(plane: &Plane<'_>, center: [f64; 2], sigma_mm: f64, bins: usize) -> Option<Vec<f64>> {
    let [nx, ny] = plane.dims();
    if nx == 0 || ny == 0 {
        return None;
    }
    let mut values: Vec<f64> = plane.data.iter().map(|&v| v as f64).collect();
    let scale = {
        let median = median(&values);
        if median > 0.0 { median } else { values.iter().copied().fold(0.0, f64::max) }
    };
    if !(scale > 0.0) {
        return None;
    }
    values.iter_mut().for_each(|v| *v /= scale);

    // Pixel (x, y) lives at x * ny + y.
    let at = |x: i64, y: i64| {
        let x = x.clamp(0, nx as i64 - 1) as usize;
        let y = y.clamp(0, ny as i64 - 1) as usize;
        values[x * ny + y]
    };
    const SMOOTH: [f64; 3] = [0.25, 0.5, 0.25];

    let mut gradients = Vec::with_capacity(nx * ny);
    let mut max_magnitude = 0.0f64;
    for x in 0..nx as i64 {
        for y in 0..ny as i64 {
            let (mut gx, mut gy) = (0.0, 0.0);
            for (k, w) in (-1..=1).zip(SMOOTH) {
                gx += w * (at(x + 1, y + k) - at(x - 1, y + k)) / 2.0;
                gy += w * (at(x + k, y + 1) - at(x + k, y - 1)) / 2.0;
            }
            let magnitude = gx.hypot(gy);
            max_magnitude = max_magnitude.max(magnitude);
            gradients.push((x, y, gy.atan2(gx), magnitude));
        }
    }
    if !(max_magnitude > 0.0) {
        return None;
    }

    let spacing = plane.geometry.spacing();
    let sx = sigma_mm / spacing[0];
    let sy = sigma_mm / spacing[1];
    let bin_width = 2.0 * PI / bins as f64;

    let mut histogram = vec![0.0; bins];
    let mut total = 0.0;
    for (x, y, orientation, magnitude) in gradients {
        if magnitude == 0.0 {
            continue;
        }
        let dx = x as f64 - center[0];
        let dy = y as f64 - center[1];
        let window = (-(dx * dx / (2.0 * sx * sx) + dy * dy / (2.0 * sy * sy))).exp();
        let weight = window * magnitude / max_magnitude;
        let bin = (((orientation + PI) / bin_width).floor() as i64).rem_euclid(bins as i64) as usize;
        histogram[bin] += weight;
        total += weight;
    }
    (total > 0.0).then_some(histogram)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn circular_median(histogram: &[f64], width: usize) -> Vec<f64> {
    let n = histogram.len() as i64;
    let half = (width / 2) as i64;
    (0..n)
        .map(|i| {
            let neighbourhood: Vec<f64> = (-half..=half)
                .map(|k| histogram[(i + k).rem_euclid(n) as usize])
                .collect();
            median(&neighbourhood)
        })
        .collect()
}

fn circular_gaussian(histogram: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return histogram.to_vec();
    }
    let n = histogram.len() as i64;
    let radius = ((4.0 * sigma).ceil() as i64).min(n / 2);
    let kernel: Vec<f64> = (-radius..=radius).map(|k| (-(k * k) as f64 / (2.0 * sigma * sigma)).exp()).collect();
    let norm: f64 = kernel.iter().sum();
    (0..n)
        .map(|i| {
            (-radius..=radius)
                .zip(&kernel)
                .map(|(k, w)| w * histogram[(i + k).rem_euclid(n) as usize])
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// `conv[k] = sum_i h[i] h[(k - i) mod n]`
fn circular_autoconvolution(histogram: &[f64]) -> Vec<f64> {
    let n = histogram.len();
    (0..n)
        .map(|k| (0..n).map(|i| histogram[i] * histogram[(k + n - i) % n]).sum())
        .collect()
}

/// Offsets in `[-m, m]` whose autoconvolution value, read from bin
/// `n - 1 + j`, is strictly greater than its `order` circular neighbours on
/// each side. Neighbours outside the window still count.
fn local_maxima(conv: &[f64], m: i64, order: usize) -> Vec<(i64, f64)> {
    let n = conv.len() as i64;
    let at = |j: i64| conv[(n - 1 + j).rem_euclid(n) as usize];
    (-m..=m)
        .filter(|&j| (1..=order as i64).all(|k| at(j) > at(j + k) && at(j) > at(j - k)))
        .map(|j| (j, at(j)))
        .collect()
}
