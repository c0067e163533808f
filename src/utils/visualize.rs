use crate::error::{Result, StnError};
use crate::utils::cifar::Normalization;
use crate::utils::mat::Matrix;
use crate::utils::shape::ImageShape;
use image::{Rgb, RgbImage};
use std::path::Path;
use tracing::info;

const GAP: u32 = 2;

/// Lays out two batches side by side: inputs across the top row, their
/// transformed versions underneath.
pub fn comparison_image(
    originals: &Matrix,
    transformed: &Matrix,
    shape: ImageShape,
    norm: &Normalization,
) -> Result<RgbImage> {
    shape.check("comparison originals", originals)?;
    shape.check("comparison transformed", transformed)?;
    if originals.number_of_row() != transformed.number_of_row() {
        return Err(StnError::shape(
            "comparison batch",
            &[originals.number_of_row()],
            &[transformed.number_of_row()],
        ));
    }
    if shape.channels != 1 && shape.channels != 3 {
        return Err(StnError::shape("comparison channels", &[3], &[shape.channels]));
    }
    let n = originals.number_of_row() as u32;
    let (h, w) = (shape.height as u32, shape.width as u32);
    let mut canvas = RgbImage::from_pixel(
        n * (w + GAP) + GAP,
        2 * (h + GAP) + GAP,
        Rgb([255, 255, 255]),
    );
    for (band, batch) in [originals, transformed].iter().enumerate() {
        let top = GAP + band as u32 * (h + GAP);
        for b in 0..n {
            let left = GAP + b * (w + GAP);
            let row = batch.row(b as usize);
            for y in 0..shape.height {
                for x in 0..shape.width {
                    let px = |c: usize| {
                        let ch = if shape.channels == 1 { 0 } else { c };
                        norm.invert(row[shape.offset(y, x, ch)], ch)
                    };
                    canvas.put_pixel(left + x as u32, top + y as u32, Rgb([px(0), px(1), px(2)]));
                }
            }
        }
    }
    Ok(canvas)
}

pub fn save_comparison(
    path: impl AsRef<Path>,
    originals: &Matrix,
    transformed: &Matrix,
    shape: ImageShape,
    norm: &Normalization,
) -> Result<()> {
    let canvas = comparison_image(originals, transformed, shape, norm)?;
    canvas.save(path.as_ref())?;
    info!(path = %path.as_ref().display(), samples = originals.number_of_row(), "saved transformed samples");
    Ok(())
}
