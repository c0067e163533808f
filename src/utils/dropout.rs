use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::Layer;
use crate::utils::shape::ImageShape;
use rand::rngs::StdRng;
use rand::Rng;

/// Which elements share one keep/drop decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropoutMode {
    Element,
    /// Whole feature maps are zeroed together.
    Channel(ImageShape),
}

/// Inverted dropout: kept values are scaled by `1 / (1 - p)` while training,
/// evaluation mode passes values through untouched.
pub struct Dropout {
    p: f32,
    mode: DropoutMode,
    training: bool,
    rng: StdRng,
    mask: Option<Matrix>,
}

impl Dropout {
    pub fn new(p: f32, mode: DropoutMode, rng: StdRng) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(StnError::config(format!(
                "dropout probability must be in [0, 1), got {}",
                p
            )));
        }
        Ok(Self {
            p,
            mode,
            training: true,
            rng,
            mask: None,
        })
    }

    fn sample_mask(&mut self, n: usize, len: usize) -> Matrix {
        let scale = 1.0 / (1.0 - self.p);
        let mut mask = Matrix::new(n, len);
        for i in 0..n {
            let row = mask.row_mut(i);
            match self.mode {
                DropoutMode::Element => {
                    for v in row.iter_mut() {
                        *v = if self.rng.gen::<f32>() < self.p { 0.0 } else { scale };
                    }
                }
                DropoutMode::Channel(shape) => {
                    let keep = (0..shape.channels)
                        .map(|_| if self.rng.gen::<f32>() < self.p { 0.0 } else { scale })
                        .collect::<Vec<_>>();
                    for (o, v) in row.iter_mut().enumerate() {
                        *v = keep[o % shape.channels];
                    }
                }
            }
        }
        mask
    }
}

impl Layer for Dropout {
    fn forward(&mut self, mut input: Matrix) -> Result<Matrix> {
        if let DropoutMode::Channel(shape) = self.mode {
            shape.check("dropout input", &input)?;
        }
        if !self.training || self.p == 0.0 {
            self.mask = None;
            return Ok(input);
        }
        let (n, len) = input.shape();
        let mask = self.sample_mask(n, len);
        input
            .as_mut_slice()
            .iter_mut()
            .zip(mask.as_slice())
            .for_each(|(v, m)| *v *= *m);
        self.mask = Some(mask);
        Ok(input)
    }

    fn backward(&mut self, mut d_loss: Matrix) -> Result<Matrix> {
        if let Some(mask) = &self.mask {
            if mask.shape() != d_loss.shape() {
                return Err(StnError::shape(
                    "dropout gradient",
                    &[mask.number_of_row(), mask.number_of_col()],
                    &[d_loss.number_of_row(), d_loss.number_of_col()],
                ));
            }
            d_loss
                .as_mut_slice()
                .iter_mut()
                .zip(mask.as_slice())
                .for_each(|(g, m)| *g *= *m);
        }
        Ok(d_loss)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn eval_mode_is_identity() {
        let mut d = Dropout::new(0.5, DropoutMode::Element, StdRng::seed_from_u64(0)).unwrap();
        d.set_training(false);
        let x = Matrix::filled(2, 3, 1.5);
        assert_eq!(d.forward(x.clone()).unwrap(), x);
    }

    #[test]
    fn channel_mode_drops_whole_maps() {
        let shape = ImageShape::new(4, 3, 3);
        let mut d =
            Dropout::new(0.5, DropoutMode::Channel(shape), StdRng::seed_from_u64(9)).unwrap();
        let y = d.forward(Matrix::filled(2, shape.len(), 1.0)).unwrap();
        for b in 0..2 {
            let row = y.row(b);
            for c in 0..shape.channels {
                let first = row[c];
                assert!(first == 0.0 || first == 2.0);
                for p in 0..shape.pixels() {
                    assert_eq!(row[p * shape.channels + c], first);
                }
            }
        }
    }

    #[test]
    fn rejects_probability_of_one() {
        assert!(Dropout::new(1.0, DropoutMode::Element, StdRng::seed_from_u64(0)).is_err());
    }
}
