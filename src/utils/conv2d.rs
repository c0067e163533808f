use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Layer, Param};
use crate::utils::shape::ImageShape;
use rand::Rng;
use rayon::prelude::*;

/// Square-kernel, stride 1 convolution lowered to a matrix product via im2col.
pub struct Conv2d {
    pub kernel: usize,
    pub padding: usize,
    pub input: ImageShape,
    pub output: ImageShape,

    pub weight: Param,
    pub bias: Param,

    im2col_cache: Matrix,
    last_batch: usize,
}

impl Conv2d {
    pub fn new<R: Rng>(
        input: ImageShape,
        out_channels: usize,
        kernel: usize,
        padding: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if kernel == 0
            || input.height + 2 * padding < kernel
            || input.width + 2 * padding < kernel
        {
            return Err(StnError::shape(
                "conv2d kernel",
                &[kernel, kernel],
                &[input.height + 2 * padding, input.width + 2 * padding],
            ));
        }
        let output = ImageShape::new(
            out_channels,
            input.height + 2 * padding - kernel + 1,
            input.width + 2 * padding - kernel + 1,
        );
        let fan_in = kernel * kernel * input.channels;
        let bound = 1.0 / (fan_in as f32).sqrt();
        let mut weight = Matrix::new(fan_in, out_channels);
        let mut bias = Matrix::new(1, out_channels);
        weight.uniform_init(bound, rng);
        bias.uniform_init(bound, rng);
        Ok(Self {
            kernel,
            padding,
            input,
            output,
            weight: Param::new(weight, true),
            bias: Param::new(bias, false),
            im2col_cache: Matrix::new(0, fan_in),
            last_batch: 0,
        })
    }

    fn patch_len(&self) -> usize {
        self.kernel * self.kernel * self.input.channels
    }

    /// Walks the receptive field of output pixel `(oy, ox)`, handing each
    /// in-bounds input offset and its patch column to `f`.
    #[inline]
    fn for_each_tap<F: FnMut(usize, usize)>(&self, oy: usize, ox: usize, mut f: F) {
        let c = self.input.channels;
        let pad = self.padding as isize;
        for ky in 0..self.kernel {
            let iy = oy as isize + ky as isize - pad;
            if iy < 0 || iy >= self.input.height as isize {
                continue;
            }
            for kx in 0..self.kernel {
                let ix = ox as isize + kx as isize - pad;
                if ix < 0 || ix >= self.input.width as isize {
                    continue;
                }
                let src = self.input.offset(iy as usize, ix as usize, 0);
                let dst = (ky * self.kernel + kx) * c;
                for dz in 0..c {
                    f(src + dz, dst + dz);
                }
            }
        }
    }

    // B*HWC => BH'W'*kkC
    fn im2col(&mut self, input: &Matrix) {
        let n = input.number_of_row();
        let pixels = self.output.pixels();
        let mut cols = Matrix::new(n * pixels, self.patch_len());
        let this = &*self;
        cols.par_rows_mut().enumerate().for_each(|(h_index, dst)| {
            let batch = h_index / pixels;
            let left = h_index - batch * pixels;
            let (oy, ox) = (left / this.output.width, left % this.output.width);
            let src = input.row(batch);
            this.for_each_tap(oy, ox, |s, d| dst[d] = src[s]);
        });
        self.im2col_cache = cols;
    }

    // BH'W'*C => B*H'W'C, rows are already in (batch, y, x) order
    fn col2im(&self, x: Matrix, n: usize) -> Result<Matrix> {
        Matrix::from_vec(n, self.output.len(), x.into_vec())
    }

    // B*H'W'C => BH'W'*C
    fn split_loss(&self, d_loss: Matrix) -> Result<Matrix> {
        let n = d_loss.number_of_row();
        Matrix::from_vec(
            n * self.output.pixels(),
            self.output.channels,
            d_loss.into_vec(),
        )
    }

    // BH'W'*kkC => B*HWC, overlapping taps accumulate
    fn merge_loss(&self, d_cols: &Matrix) -> Matrix {
        let pixels = self.output.pixels();
        let mut ret = Matrix::new(self.last_batch, self.input.len());
        ret.par_rows_mut().enumerate().for_each(|(batch, dst)| {
            for p in 0..pixels {
                let src = d_cols.row(batch * pixels + p);
                let (oy, ox) = (p / self.output.width, p % self.output.width);
                self.for_each_tap(oy, ox, |s, d| dst[s] += src[d]);
            }
        });
        ret
    }
}

impl Layer for Conv2d {
    fn forward(&mut self, input: Matrix) -> Result<Matrix> {
        self.input.check("conv2d input", &input)?;
        let n = input.number_of_row();
        self.last_batch = n;
        self.im2col(&input);
        let mut res = self.im2col_cache.mul(&self.weight.value)?;
        res.add_with_vector_(&self.bias.value)?;
        self.col2im(res, n)
    }

    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix> {
        self.output.check("conv2d gradient", &d_loss)?;
        if d_loss.number_of_row() != self.last_batch {
            return Err(StnError::shape(
                "conv2d gradient batch",
                &[self.last_batch],
                &[d_loss.number_of_row()],
            ));
        }
        let split = self.split_loss(d_loss)?;
        self.bias.grad = split.sum_rows();
        self.weight.grad = self.im2col_cache.transpose().mul(&split)?;
        let d_cols = split.mul(&self.weight.value.transpose())?;
        Ok(self.merge_loss(&d_cols))
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn output_geometry_follows_kernel_and_padding() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(ImageShape::new(3, 32, 32), 8, 7, 0, &mut rng).unwrap();
        assert_eq!(conv.output, ImageShape::new(8, 26, 26));
        let conv = Conv2d::new(ImageShape::new(3, 5, 5), 4, 3, 1, &mut rng).unwrap();
        assert_eq!(conv.output, ImageShape::new(4, 5, 5));
        assert!(Conv2d::new(ImageShape::new(1, 2, 2), 1, 5, 0, &mut rng).is_err());
    }

    #[test]
    fn single_tap_kernel_is_a_per_pixel_linear_map() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut conv = Conv2d::new(ImageShape::new(2, 2, 2), 1, 1, 0, &mut rng).unwrap();
        conv.weight.value = Matrix::from_vec(2, 1, vec![2.0, -1.0]).unwrap();
        conv.bias.value = Matrix::from_vec(1, 1, vec![0.5]).unwrap();
        let x = Matrix::from_vec(1, 8, vec![1.0, 1.0, 2.0, 0.0, 0.0, 3.0, 1.0, 1.0]).unwrap();
        let y = conv.forward(x).unwrap();
        assert_eq!(y.as_slice(), &[1.5, 4.5, -2.5, 1.5]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let shape = ImageShape::new(2, 4, 3);
        let mut conv = Conv2d::new(shape, 3, 3, 1, &mut rng).unwrap();
        let mut x = Matrix::new(2, shape.len());
        x.uniform_init(1.0, &mut rng);
        let mut probe = Matrix::new(2, conv.output.len());
        probe.uniform_init(1.0, &mut rng);

        let objective = |conv: &mut Conv2d, x: &Matrix| -> f64 {
            let y = conv.forward(x.clone()).unwrap();
            y.as_slice()
                .iter()
                .zip(probe.as_slice())
                .map(|(a, b)| (*a as f64) * (*b as f64))
                .sum()
        };

        objective(&mut conv, &x);
        let d_x = conv.backward(probe.clone()).unwrap();
        let d_w = conv.weight.grad.clone();

        let eps = 1e-2;
        for idx in [0usize, 5, 11, 17, 23] {
            let mut plus = x.clone();
            plus.as_mut_slice()[idx] += eps;
            let mut minus = x.clone();
            minus.as_mut_slice()[idx] -= eps;
            let numeric = (objective(&mut conv, &plus) - objective(&mut conv, &minus))
                / (2.0 * eps as f64);
            approx::assert_abs_diff_eq!(numeric as f32, d_x.as_slice()[idx], epsilon = 2e-3);
        }
        for idx in [0usize, 4, 9, 20, 53] {
            let base = conv.weight.value.clone();
            conv.weight.value.as_mut_slice()[idx] += eps;
            let f_plus = objective(&mut conv, &x);
            conv.weight.value = base.clone();
            conv.weight.value.as_mut_slice()[idx] -= eps;
            let f_minus = objective(&mut conv, &x);
            conv.weight.value = base;
            let numeric = (f_plus - f_minus) / (2.0 * eps as f64);
            approx::assert_abs_diff_eq!(numeric as f32, d_w.as_slice()[idx], epsilon = 2e-3);
        }
    }
}
