use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::Layer;
use rayon::prelude::*;

#[derive(Default)]
pub struct ReluLayer {
    last_input: Option<Matrix>,
}

impl ReluLayer {
    pub fn new() -> Self {
        Self { last_input: None }
    }
}

impl Layer for ReluLayer {
    fn forward(&mut self, mut input: Matrix) -> Result<Matrix> {
        self.last_input = Some(input.clone());
        input
            .as_mut_slice()
            .par_iter_mut()
            .for_each(|v| *v = (*v).max(0.0));
        Ok(input)
    }

    fn backward(&mut self, mut d_loss: Matrix) -> Result<Matrix> {
        if let Some(last) = &self.last_input {
            if last.shape() != d_loss.shape() {
                return Err(StnError::shape(
                    "relu gradient",
                    &[last.number_of_row(), last.number_of_col()],
                    &[d_loss.number_of_row(), d_loss.number_of_col()],
                ));
            }
            d_loss
                .as_mut_slice()
                .par_iter_mut()
                .zip(last.as_slice().par_iter())
                .for_each(|(g, x)| {
                    if *x <= 0.0 {
                        *g = 0.0;
                    }
                });
        }
        Ok(d_loss)
    }
}
