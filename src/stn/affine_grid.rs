//! Affine grid generation.
//!
//! Theta is stored one sample per row as `[a11 a12 a13 a21 a22 a23]`. The
//! grid holds, for every output pixel in row-major order, the normalized
//! `(x, y)` source coordinate it samples from.

use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::shape::ImageShape;
use rayon::prelude::*;

pub const THETA_LEN: usize = 6;

/// The transform that leaves an image unchanged.
pub const IDENTITY_THETA: [f32; THETA_LEN] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

/// Normalized coordinate of index `i` along an axis of `size` samples.
/// The first and last sample map to -1 and 1; a single sample sits at 0.
#[inline]
pub fn normalized_coord(i: usize, size: usize) -> f32 {
    if size <= 1 {
        0.0
    } else {
        -1.0 + 2.0 * i as f32 / (size - 1) as f32
    }
}

fn check_output(out: &ImageShape) -> Result<()> {
    if out.height == 0 || out.width == 0 || out.channels == 0 {
        return Err(StnError::shape(
            "affine_grid output size",
            &[1, 1, 1],
            &out.dims(),
        ));
    }
    Ok(())
}

fn check_theta(theta: &Matrix, batch: usize) -> Result<()> {
    if theta.shape() != (batch, THETA_LEN) {
        return Err(StnError::shape(
            "affine_grid theta",
            &[batch, 2, 3],
            &[theta.number_of_row(), theta.number_of_col()],
        ));
    }
    Ok(())
}

/// Builds a `batch x (H_out * W_out * 2)` sampling grid from `batch x 6` theta.
pub fn affine_grid(theta: &Matrix, batch: usize, out: ImageShape) -> Result<Matrix> {
    check_theta(theta, batch)?;
    check_output(&out)?;
    let mut grid = Matrix::new(batch, out.pixels() * 2);
    grid.par_rows_mut()
        .zip(theta.par_rows())
        .for_each(|(dst, t)| {
            for i in 0..out.height {
                let y = normalized_coord(i, out.height);
                for j in 0..out.width {
                    let x = normalized_coord(j, out.width);
                    let p = (i * out.width + j) * 2;
                    dst[p] = t[0] * x + t[1] * y + t[2];
                    dst[p + 1] = t[3] * x + t[4] * y + t[5];
                }
            }
        });
    Ok(grid)
}

/// Gradient of a loss w.r.t. theta given its gradient w.r.t. the grid.
pub fn affine_grid_backward(d_grid: &Matrix, out: ImageShape) -> Result<Matrix> {
    check_output(&out)?;
    if d_grid.number_of_col() != out.pixels() * 2 {
        return Err(StnError::shape(
            "affine_grid gradient",
            &[d_grid.number_of_row(), out.height, out.width, 2],
            &[d_grid.number_of_row(), d_grid.number_of_col()],
        ));
    }
    let mut d_theta = Matrix::new(d_grid.number_of_row(), THETA_LEN);
    d_theta
        .par_rows_mut()
        .zip(d_grid.par_rows())
        .for_each(|(dt, g)| {
            for i in 0..out.height {
                let y = normalized_coord(i, out.height);
                for j in 0..out.width {
                    let x = normalized_coord(j, out.width);
                    let p = (i * out.width + j) * 2;
                    let (gx, gy) = (g[p], g[p + 1]);
                    dt[0] += gx * x;
                    dt[1] += gx * y;
                    dt[2] += gx;
                    dt[3] += gy * x;
                    dt[4] += gy * y;
                    dt[5] += gy;
                }
            }
        });
    Ok(d_theta)
}

/// `batch x 6` theta with every row set to the identity transform.
pub fn identity_theta(batch: usize) -> Matrix {
    let mut theta = Matrix::new(batch, THETA_LEN);
    theta
        .par_rows_mut()
        .for_each(|row| row.copy_from_slice(&IDENTITY_THETA));
    theta
}
