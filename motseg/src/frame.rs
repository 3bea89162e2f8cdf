//! # Pixel grid substrate
//!
//! All per-pixel data is held in dense row-major [`nalgebra`] matrices indexed
//! `(row, col)`. The free functions in this module are the shared numeric
//! vocabulary of the pipeline: Gaussian smoothing, pyramid reduce/expand,
//! bilinear warping and Scharr derivatives. Filters handle borders by
//! reflect-101 sampling; the warp reads zero outside image bounds.

use nalgebra::DMatrix;

/// Single real-valued image channel.
pub type Plane = DMatrix<f32>;

/// Boolean per-pixel grid.
pub type BoolMask = DMatrix<bool>;

/// One aligned colour + depth frame.
///
/// Colour channels are normalised to `[0, 1]`, depth is in meters. Depth NaNs
/// are cleaned to zero on construction, so downstream stages never see them.
#[derive(Clone)]
pub struct Frame {
    pub color: [Plane; 3],
    pub depth: Plane,
}

impl Frame {
    /// Create a new frame from colour channels and depth.
    ///
    /// # Arguments
    ///
    /// * `color` - 3 colour planes, all of equal dimensions.
    /// * `depth` - depth plane of the same dimensions, NaNs allowed.
    pub fn new(color: [Plane; 3], depth: Plane) -> Self {
        let depth = depth.map(|d| if d.is_nan() { 0.0 } else { d });
        Self { color, depth }
    }

    /// Get `(rows, cols)` of the frame.
    pub fn dim(&self) -> (usize, usize) {
        (self.depth.nrows(), self.depth.ncols())
    }

    /// Rec.601 luma of the colour channels.
    pub fn intensity(&self) -> Plane {
        let (rows, cols) = self.dim();
        Plane::from_fn(rows, cols, |r, c| {
            0.299 * self.color[0][(r, c)] + 0.587 * self.color[1][(r, c)] + 0.114 * self.color[2][(r, c)]
        })
    }

    /// Smooth all channels with the fixed 3x3 Gaussian.
    pub fn smoothed(&self) -> Self {
        Self {
            color: [
                gaussian3(&self.color[0]),
                gaussian3(&self.color[1]),
                gaussian3(&self.color[2]),
            ],
            depth: gaussian3(&self.depth),
        }
    }

    /// Halve resolution `passes` times with the pyramid reduce filter.
    pub fn downsample(&self, passes: usize) -> Self {
        let mut out = self.clone();
        for _ in 0..passes {
            out = Self {
                color: [
                    reduce(&out.color[0]),
                    reduce(&out.color[1]),
                    reduce(&out.color[2]),
                ],
                depth: reduce(&out.depth),
            };
        }
        out
    }
}

/// Reflect-101 index mapping, e.g. `-1 -> 1` and `n -> n - 2`.
///
/// A single-pixel axis has nothing to reflect over and always maps to 0.
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * (n - 1) - i;
        }
    }
    i as usize
}

/// Apply a separable odd-length kernel along both axes.
fn filter_separable(input: &Plane, kernel: &[f32]) -> Plane {
    let (rows, cols) = (input.nrows(), input.ncols());
    let radius = kernel.len() as isize / 2;

    // Horizontal pass.
    let mut tmp = Plane::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (i, k) in kernel.iter().enumerate() {
                let cc = reflect(c as isize + i as isize - radius, cols);
                acc += k * input[(r, cc)];
            }
            tmp[(r, c)] = acc;
        }
    }

    // Vertical pass.
    let mut out = Plane::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (i, k) in kernel.iter().enumerate() {
                let rr = reflect(r as isize + i as isize - radius, rows);
                acc += k * tmp[(rr, c)];
            }
            out[(r, c)] = acc;
        }
    }
    out
}

/// Normalised 3-tap Gaussian kernel for a given sigma.
fn gaussian3_kernel(sigma: f32) -> [f32; 3] {
    let side = (-1.0 / (2.0 * sigma * sigma) as f32).exp();
    let sum = 1.0 + 2.0 * side;
    [side / sum, 1.0 / sum, side / sum]
}

/// 3x3 Gaussian smoothing, sigma 2.0.
///
/// This is the fixed noise-suppression filter applied to every frame before
/// storage or comparison.
pub fn gaussian3(input: &Plane) -> Plane {
    filter_separable(input, &gaussian3_kernel(2.0))
}

/// 5-tap binomial kernel used by the pyramid filters.
const PYR_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Pyramid-down: low-pass then 2x decimation, `(n + 1) / 2` rounding.
pub fn reduce(input: &Plane) -> Plane {
    let blurred = filter_separable(input, &PYR_KERNEL);
    let (rows, cols) = ((input.nrows() + 1) / 2, (input.ncols() + 1) / 2);
    Plane::from_fn(rows, cols, |r, c| blurred[(r * 2, c * 2)])
}

/// Pyramid-up to an explicit target size via bilinear resampling.
pub fn expand(input: &Plane, rows: usize, cols: usize) -> Plane {
    Plane::from_fn(rows, cols, |r, c| {
        sample_clamped(input, c as f32 / 2.0, r as f32 / 2.0)
    })
}

/// One reduce-then-expand pass.
///
/// Low-passes the field in pyramid space; applied to accumulated flow fields
/// between levels.
pub fn smooth_field(input: &Plane) -> Plane {
    let small = reduce(input);
    expand(&small, input.nrows(), input.ncols())
}

/// Bilinear sample with coordinates clamped to the image rectangle.
fn sample_clamped(input: &Plane, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (input.ncols() - 1) as f32);
    let y = y.clamp(0.0, (input.nrows() - 1) as f32);
    bilinear(input, x, y)
}

fn bilinear(input: &Plane, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(input.ncols() - 1);
    let y1 = (y0 + 1).min(input.nrows() - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = input[(y0, x0)] * (1.0 - fx) + input[(y0, x1)] * fx;
    let bot = input[(y1, x0)] * (1.0 - fx) + input[(y1, x1)] * fx;
    top * (1.0 - fy) + bot * fy
}

/// Warp `input` forward by the displacement field `(u, v)`.
///
/// Each output pixel reads `input` at `(c - u, r - v)` with bilinear
/// resampling, so warping the previous frame by the forward motion field
/// approximates the current frame. Samples falling outside the image read
/// zero.
pub fn warp_bilinear(input: &Plane, u: &Plane, v: &Plane) -> Plane {
    let (rows, cols) = (input.nrows(), input.ncols());
    Plane::from_fn(rows, cols, |r, c| {
        let x = c as f32 - u[(r, c)];
        let y = r as f32 - v[(r, c)];
        if x < 0.0 || y < 0.0 || x > (cols - 1) as f32 || y > (rows - 1) as f32 {
            0.0
        } else {
            bilinear(input, x, y)
        }
    })
}

/// Separable normalised Scharr derivative along x.
pub fn scharr_x(input: &Plane) -> Plane {
    scharr(input, true)
}

/// Separable normalised Scharr derivative along y.
pub fn scharr_y(input: &Plane) -> Plane {
    scharr(input, false)
}

fn scharr(input: &Plane, horizontal: bool) -> Plane {
    const SMOOTH: [f32; 3] = [3.0 / 16.0, 10.0 / 16.0, 3.0 / 16.0];
    const DERIV: [f32; 3] = [-0.5, 0.0, 0.5];

    let (rows, cols) = (input.nrows(), input.ncols());
    let (row_kernel, col_kernel) = if horizontal {
        (DERIV, SMOOTH)
    } else {
        (SMOOTH, DERIV)
    };

    let mut tmp = Plane::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (i, k) in row_kernel.iter().enumerate() {
                let cc = reflect(c as isize + i as isize - 1, cols);
                acc += k * input[(r, cc)];
            }
            tmp[(r, c)] = acc;
        }
    }

    let mut out = Plane::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (i, k) in col_kernel.iter().enumerate() {
                let rr = reflect(r as isize + i as isize - 1, rows);
                acc += k * tmp[(rr, c)];
            }
            out[(r, c)] = acc;
        }
    }
    out
}

/// Downsample a boolean mask `passes` times by nearest sampling.
pub fn downsample_mask(mask: &BoolMask, passes: usize) -> BoolMask {
    let mut out = mask.clone();
    for _ in 0..passes {
        let (rows, cols) = ((out.nrows() + 1) / 2, (out.ncols() + 1) / 2);
        let prev = out;
        out = BoolMask::from_fn(rows, cols, |r, c| prev[(r * 2, c * 2)]);
    }
    out
}

/// Restrict a colour image to mask pixels; everything else reads zero.
pub fn mask_color(color: &[Plane; 3], mask: &DMatrix<u8>) -> [Plane; 3] {
    let select = |p: &Plane| {
        Plane::from_fn(p.nrows(), p.ncols(), |r, c| {
            if mask[(r, c)] != 0 {
                p[(r, c)]
            } else {
                0.0
            }
        })
    };
    [select(&color[0]), select(&color[1]), select(&color[2])]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn gaussian_preserves_constant() {
        let input = Plane::repeat(8, 8, 0.7);
        let out = gaussian3(&input);
        for v in out.iter() {
            assert_approx_eq!(*v, 0.7, 1e-5);
        }
    }

    #[test]
    fn filters_handle_single_extent_axes() {
        // Reduce all the way down: 5 -> 3 -> 2 -> 1 on the short axis.
        let mut plane = Plane::repeat(5, 12, 0.3);
        for _ in 0..4 {
            plane = reduce(&plane);
        }
        assert_eq!(plane.nrows(), 1);
        let out = gaussian3(&plane);
        assert_eq!((out.nrows(), out.ncols()), (plane.nrows(), plane.ncols()));
        for v in out.iter() {
            assert_approx_eq!(*v, 0.3, 1e-5);
        }
        // And a 1x1 plane passes through every filter unchanged.
        let single = reduce(&Plane::repeat(1, 1, 0.9));
        assert_approx_eq!(single[(0, 0)], 0.9, 1e-5);
    }

    #[test]
    fn reduce_dimensions_round_up() {
        let input = Plane::zeros(9, 13);
        let out = reduce(&input);
        assert_eq!((out.nrows(), out.ncols()), (5, 7));
    }

    #[test]
    fn expand_hits_target_size() {
        let input = Plane::zeros(5, 7);
        let out = expand(&input, 9, 13);
        assert_eq!((out.nrows(), out.ncols()), (9, 13));
    }

    #[test]
    fn warp_identity_with_zero_field() {
        let input = Plane::from_fn(6, 6, |r, c| (r * 6 + c) as f32);
        let zero = Plane::zeros(6, 6);
        let out = warp_bilinear(&input, &zero, &zero);
        for (a, b) in input.iter().zip(out.iter()) {
            assert_approx_eq!(*a, *b, 1e-6);
        }
    }

    #[test]
    fn warp_out_of_bounds_reads_zero() {
        let input = Plane::repeat(4, 4, 1.0);
        let u = Plane::repeat(4, 4, 10.0);
        let v = Plane::zeros(4, 4);
        let out = warp_bilinear(&input, &u, &v);
        for val in out.iter() {
            assert_approx_eq!(*val, 0.0, 1e-6);
        }
    }

    #[test]
    fn scharr_recovers_linear_gradient() {
        // I(x, y) = 2x + 3y has Ix = 2, Iy = 3 away from borders.
        let input = Plane::from_fn(10, 10, |r, c| 2.0 * c as f32 + 3.0 * r as f32);
        let ix = scharr_x(&input);
        let iy = scharr_y(&input);
        for r in 2..8 {
            for c in 2..8 {
                assert_approx_eq!(ix[(r, c)], 2.0, 1e-4);
                assert_approx_eq!(iy[(r, c)], 3.0, 1e-4);
            }
        }
    }

    #[test]
    fn frame_cleans_depth_nans() {
        let color = [Plane::zeros(2, 2), Plane::zeros(2, 2), Plane::zeros(2, 2)];
        let mut depth = Plane::repeat(2, 2, 1.5);
        depth[(0, 1)] = f32::NAN;
        let frame = Frame::new(color, depth);
        assert_eq!(frame.depth[(0, 1)], 0.0);
        assert_eq!(frame.depth[(0, 0)], 1.5);
    }
}
