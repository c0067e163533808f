use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::Layer;
use crate::utils::shape::ImageShape;
use rayon::prelude::*;

/// 2x2 max pooling with stride 2. An odd trailing row or column is dropped.
pub struct MaxPool2x2 {
    pub input: ImageShape,
    pub output: ImageShape,
    /// Input offset of the winning element for each output element.
    max_mask: Vec<usize>,
    last_batch: usize,
}

impl MaxPool2x2 {
    pub fn new(input: ImageShape) -> Result<Self> {
        if input.height < 2 || input.width < 2 {
            return Err(StnError::shape(
                "maxpool input",
                &[input.channels, 2, 2],
                &input.dims(),
            ));
        }
        Ok(Self {
            input,
            output: ImageShape::new(input.channels, input.height / 2, input.width / 2),
            max_mask: Vec::new(),
            last_batch: 0,
        })
    }
}

impl Layer for MaxPool2x2 {
    fn forward(&mut self, input: Matrix) -> Result<Matrix> {
        self.input.check("maxpool input", &input)?;
        let n = input.number_of_row();
        let (inp, out) = (self.input, self.output);
        let mut ret = Matrix::new(n, out.len());
        let mut mask = vec![0usize; n * out.len()];
        ret.par_rows_mut()
            .zip(mask.par_chunks_mut(out.len().max(1)))
            .enumerate()
            .for_each(|(batch_index, (dst, mask_row))| {
                let src = input.row(batch_index);
                for i in 0..out.height {
                    for j in 0..out.width {
                        for c in 0..out.channels {
                            let mut best = inp.offset(2 * i, 2 * j, c);
                            for (di, dj) in [(0, 1), (1, 0), (1, 1)] {
                                let o = inp.offset(2 * i + di, 2 * j + dj, c);
                                if src[o] > src[best] {
                                    best = o;
                                }
                            }
                            let d = out.offset(i, j, c);
                            dst[d] = src[best];
                            mask_row[d] = best;
                        }
                    }
                }
            });
        self.max_mask = mask;
        self.last_batch = n;
        Ok(ret)
    }

    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix> {
        self.output.check("maxpool gradient", &d_loss)?;
        if d_loss.number_of_row() != self.last_batch {
            return Err(StnError::shape(
                "maxpool gradient batch",
                &[self.last_batch],
                &[d_loss.number_of_row()],
            ));
        }
        let out_len = self.output.len();
        let mut ret = Matrix::new(self.last_batch, self.input.len());
        ret.par_rows_mut().enumerate().for_each(|(x, dst)| {
            let src = d_loss.row(x);
            let mask = &self.max_mask[x * out_len..(x + 1) * out_len];
            for (g, &o) in src.iter().zip(mask) {
                dst[o] += *g;
            }
        });
        Ok(ret)
    }
}
