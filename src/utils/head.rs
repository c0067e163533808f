use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Head, Layer};
use rayon::prelude::*;

/// Row-wise `log(softmax(x))`, computed with the max-shift for stability.
#[derive(Default)]
pub struct LogSoftmax {
    last_output: Option<Matrix>,
}

impl LogSoftmax {
    pub fn new() -> Self {
        Self { last_output: None }
    }
}

impl Layer for LogSoftmax {
    fn forward(&mut self, mut input: Matrix) -> Result<Matrix> {
        input.par_rows_mut().for_each(|row| {
            let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let sum: f32 = row.iter().map(|v| (v - max_val).exp()).sum();
            let log_sum = max_val + sum.ln();
            row.iter_mut().for_each(|v| *v -= log_sum);
        });
        self.last_output = Some(input.clone());
        Ok(input)
    }

    // dx = g - softmax * sum(g)
    fn backward(&mut self, mut d_loss: Matrix) -> Result<Matrix> {
        let out = self
            .last_output
            .as_ref()
            .ok_or_else(|| StnError::shape("log_softmax backward before forward", &[1], &[0]))?;
        if out.shape() != d_loss.shape() {
            return Err(StnError::shape(
                "log_softmax gradient",
                &[out.number_of_row(), out.number_of_col()],
                &[d_loss.number_of_row(), d_loss.number_of_col()],
            ));
        }
        d_loss
            .par_rows_mut()
            .zip(out.par_rows())
            .for_each(|(g, logp)| {
                let total: f32 = g.iter().sum();
                g.iter_mut()
                    .zip(logp)
                    .for_each(|(gi, lp)| *gi -= lp.exp() * total);
            });
        Ok(d_loss)
    }
}

/// Negative log-likelihood over log-probabilities with one-hot targets,
/// averaged over the batch.
#[derive(Default)]
pub struct NllLoss {
    pub grad: Option<Matrix>,
}

impl NllLoss {
    pub fn new() -> Self {
        Self { grad: None }
    }
}

impl Head for NllLoss {
    fn forward(&mut self, input: &Matrix, target: &Matrix) -> Result<Matrix> {
        if input.shape() != target.shape() {
            return Err(StnError::shape(
                "nll target",
                &[input.number_of_row(), input.number_of_col()],
                &[target.number_of_row(), target.number_of_col()],
            ));
        }
        let (h, _) = input.shape();
        let mut ret = Matrix::new(h, 1);
        ret.par_rows_mut()
            .zip(input.par_rows())
            .zip(target.par_rows())
            .for_each(|((loss, logp), t)| {
                loss[0] = -logp.iter().zip(t).map(|(l, t)| l * t).sum::<f32>();
            });
        let scale = -1.0 / h.max(1) as f32;
        self.grad = Some(target.mul_with_numeric(scale));
        Ok(ret)
    }

    fn backward(&mut self) -> Matrix {
        self.grad.clone().unwrap_or_else(|| Matrix::new(0, 0))
    }

    fn eval_forward(&self, input: &Matrix) -> Vec<usize> {
        input
            .par_rows()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |a, (i, &v)| if a.1 < v { (i, v) } else { a })
                    .0
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn log_softmax_rows_exponentiate_to_one() {
        let mut layer = LogSoftmax::new();
        let x = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 100.0, 0.0, -100.0]).unwrap();
        let y = layer.forward(x).unwrap();
        for i in 0..2 {
            let total: f32 = y.row(i).iter().map(|v| v.exp()).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn fused_gradient_is_softmax_minus_target() {
        let mut layer = LogSoftmax::new();
        let mut head = NllLoss::new();
        let x = Matrix::from_vec(1, 3, vec![0.5, -1.0, 2.0]).unwrap();
        let t = Matrix::from_vec(1, 3, vec![0.0, 1.0, 0.0]).unwrap();
        let logp = layer.forward(x).unwrap();
        let loss = head.forward(&logp, &t).unwrap();
        assert_abs_diff_eq!(loss.at(0, 0), -logp.at(0, 1), epsilon = 1e-6);
        let dx = layer.backward(head.backward()).unwrap();
        for j in 0..3 {
            let expected = logp.at(0, j).exp() - t.at(0, j);
            assert_abs_diff_eq!(dx.at(0, j), expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn eval_forward_picks_argmax() {
        let head = NllLoss::new();
        let x = Matrix::from_vec(2, 3, vec![0.1, 0.7, 0.2, 0.9, 0.05, 0.05]).unwrap();
        assert_eq!(head.eval_forward(&x), vec![1, 0]);
    }
}
