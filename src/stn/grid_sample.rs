//! Bilinear grid sampling with zero padding.
//!
//! Normalized coordinates are rescaled with corners aligned,
//! `px = (x + 1) / 2 * (W_in - 1)`. Each of the four integer neighbours of
//! `(px, py)` contributes its bilinear weight times its value, and a
//! neighbour outside the source image contributes zero. The same policy
//! holds in the backward pass, so gradients vanish smoothly at the border.

use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::shape::ImageShape;
use rayon::prelude::*;

/// Neighbourhood of one sampling location.
#[derive(Debug, Clone, Copy)]
struct BilinearTap {
    x0: isize,
    y0: isize,
    wx1: f32,
    wy1: f32,
}

impl BilinearTap {
    #[inline]
    fn new(x: f32, y: f32, src: &ImageShape) -> Self {
        // Beyond one pixel past the border every tap reads zero anyway; the
        // clamp keeps neighbour indices small for huge coordinates.
        let px = (x + 1.0) * 0.5 * (src.width as f32 - 1.0);
        let py = (y + 1.0) * 0.5 * (src.height as f32 - 1.0);
        let px = px.clamp(-2.0, src.width as f32 + 1.0);
        let py = py.clamp(-2.0, src.height as f32 + 1.0);
        let fx = px.floor();
        let fy = py.floor();
        Self {
            x0: fx as isize,
            y0: fy as isize,
            wx1: px - fx,
            wy1: py - fy,
        }
    }

    /// Pixel offset (channel 0) of neighbour `(dy, dx)`, or `None` when it
    /// falls outside the source.
    #[inline]
    fn offset(&self, dy: isize, dx: isize, src: &ImageShape) -> Option<usize> {
        let (yy, xx) = (self.y0 + dy, self.x0 + dx);
        if yy < 0 || xx < 0 || yy >= src.height as isize || xx >= src.width as isize {
            None
        } else {
            Some(src.offset(yy as usize, xx as usize, 0))
        }
    }

    /// `[v00, v01, v10, v11]` offsets, row index first.
    #[inline]
    fn corners(&self, src: &ImageShape) -> [Option<usize>; 4] {
        [
            self.offset(0, 0, src),
            self.offset(0, 1, src),
            self.offset(1, 0, src),
            self.offset(1, 1, src),
        ]
    }

    #[inline]
    fn weights(&self) -> [f32; 4] {
        let (wx0, wy0) = (1.0 - self.wx1, 1.0 - self.wy1);
        [wy0 * wx0, wy0 * self.wx1, self.wy1 * wx0, self.wy1 * self.wx1]
    }
}

fn check_inputs(
    input: &Matrix,
    in_shape: &ImageShape,
    grid: &Matrix,
    out_shape: &ImageShape,
) -> Result<()> {
    in_shape.check("grid_sample input", input)?;
    if in_shape.is_empty() {
        return Err(StnError::shape("grid_sample input", &[1, 1, 1], &in_shape.dims()));
    }
    if out_shape.channels != in_shape.channels {
        return Err(StnError::shape(
            "grid_sample channels",
            &[in_shape.channels],
            &[out_shape.channels],
        ));
    }
    let expected = [input.number_of_row(), out_shape.pixels() * 2];
    if grid.shape() != (expected[0], expected[1]) {
        return Err(StnError::shape(
            "grid_sample grid",
            &[expected[0], out_shape.height, out_shape.width, 2],
            &[grid.number_of_row(), grid.number_of_col()],
        ));
    }
    Ok(())
}

/// Resamples `input` at the grid locations. The result has `out_shape`
/// geometry, whose channel count must match the input.
pub fn grid_sample(
    input: &Matrix,
    in_shape: ImageShape,
    grid: &Matrix,
    out_shape: ImageShape,
) -> Result<Matrix> {
    check_inputs(input, &in_shape, grid, &out_shape)?;
    let c = in_shape.channels;
    let mut ret = Matrix::new(input.number_of_row(), out_shape.len());
    ret.par_rows_mut()
        .zip(input.par_rows())
        .zip(grid.par_rows())
        .for_each(|((dst, src), g)| {
            for p in 0..out_shape.pixels() {
                let tap = BilinearTap::new(g[2 * p], g[2 * p + 1], &in_shape);
                let out = &mut dst[p * c..(p + 1) * c];
                for (corner, w) in tap.corners(&in_shape).iter().zip(tap.weights()) {
                    if let Some(o) = corner {
                        out.iter_mut()
                            .zip(&src[*o..*o + c])
                            .for_each(|(d, v)| *d += w * *v);
                    }
                }
            }
        });
    Ok(ret)
}

/// Backward pass of [`grid_sample`]: returns the loss gradient w.r.t. the
/// input image and w.r.t. the grid, given the gradient w.r.t. the output.
///
/// The grid gradient goes through the bilinear weights themselves:
/// `d out / d px = wy0 (v01 - v00) + wy1 (v11 - v10)` and symmetrically for
/// `py`, scaled by the `(size - 1) / 2` rescale factor.
pub fn grid_sample_backward(
    input: &Matrix,
    in_shape: ImageShape,
    grid: &Matrix,
    out_shape: ImageShape,
    d_out: &Matrix,
) -> Result<(Matrix, Matrix)> {
    check_inputs(input, &in_shape, grid, &out_shape)?;
    if d_out.shape() != (input.number_of_row(), out_shape.len()) {
        return Err(StnError::shape(
            "grid_sample gradient",
            &[input.number_of_row(), out_shape.len()],
            &[d_out.number_of_row(), d_out.number_of_col()],
        ));
    }
    let c = in_shape.channels;
    let scale_x = (in_shape.width as f32 - 1.0) * 0.5;
    let scale_y = (in_shape.height as f32 - 1.0) * 0.5;
    let n = input.number_of_row();
    let mut d_input = Matrix::new(n, in_shape.len());
    let mut d_grid = Matrix::new(n, out_shape.pixels() * 2);

    d_input
        .par_rows_mut()
        .zip(d_grid.par_rows_mut())
        .zip(input.par_rows())
        .zip(grid.par_rows())
        .zip(d_out.par_rows())
        .for_each(|((((di, dg), src), g), go)| {
            for p in 0..out_shape.pixels() {
                let tap = BilinearTap::new(g[2 * p], g[2 * p + 1], &in_shape);
                let corners = tap.corners(&in_shape);
                let weights = tap.weights();
                let grad = &go[p * c..(p + 1) * c];

                for (corner, w) in corners.iter().zip(weights) {
                    if let Some(o) = corner {
                        di[*o..*o + c]
                            .iter_mut()
                            .zip(grad)
                            .for_each(|(d, gv)| *d += w * *gv);
                    }
                }

                let (wx0, wy0) = (1.0 - tap.wx1, 1.0 - tap.wy1);
                let value = |k: usize, ch: usize| corners[k].map_or(0.0, |o| src[o + ch]);
                let (mut d_px, mut d_py) = (0.0f32, 0.0f32);
                for (ch, gv) in grad.iter().enumerate() {
                    let (v00, v01, v10, v11) =
                        (value(0, ch), value(1, ch), value(2, ch), value(3, ch));
                    d_px += gv * (wy0 * (v01 - v00) + tap.wy1 * (v11 - v10));
                    d_py += gv * (wx0 * (v10 - v00) + tap.wx1 * (v11 - v01));
                }
                dg[2 * p] = d_px * scale_x;
                dg[2 * p + 1] = d_py * scale_y;
            }
        });
    Ok((d_input, d_grid))
}
