use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Layer, Param};
use rand::Rng;

pub struct LinearLayer {
    last_input: Option<Matrix>,
    /// `in_channels x out_channels`, so that `y = x W + b`.
    pub weight: Param,
    pub bias: Param,
}

impl LinearLayer {
    pub fn new<R: Rng>(in_channels: usize, out_channels: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_channels.max(1) as f32).sqrt();
        let mut weight = Matrix::new(in_channels, out_channels);
        let mut bias = Matrix::new(1, out_channels);
        weight.uniform_init(bound, rng);
        bias.uniform_init(bound, rng);
        Self::from_parts(weight, bias)
    }

    /// All-zero weight with a caller-chosen bias, so the output starts as
    /// `bias` for every input.
    pub fn with_bias(in_channels: usize, bias: &[f32]) -> Result<Self> {
        let bias = Matrix::from_vec(1, bias.len(), bias.to_vec())?;
        Ok(Self::from_parts(Matrix::new(in_channels, bias.number_of_col()), bias))
    }

    fn from_parts(weight: Matrix, bias: Matrix) -> Self {
        Self {
            last_input: None,
            weight: Param::new(weight, true),
            bias: Param::new(bias, false),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.value.number_of_row()
    }

    pub fn out_channels(&self) -> usize {
        self.weight.value.number_of_col()
    }
}

impl Layer for LinearLayer {
    fn forward(&mut self, input: Matrix) -> Result<Matrix> {
        if input.number_of_col() != self.in_channels() {
            return Err(StnError::shape(
                "linear input",
                &[input.number_of_row(), self.in_channels()],
                &[input.number_of_row(), input.number_of_col()],
            ));
        }
        let mut now = input.mul(&self.weight.value)?;
        now.add_with_vector_(&self.bias.value)?;
        self.last_input = Some(input);
        Ok(now)
    }

    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix> {
        let last_input = self
            .last_input
            .as_ref()
            .ok_or_else(|| StnError::shape("linear backward before forward", &[1], &[0]))?;
        if d_loss.shape() != (last_input.number_of_row(), self.out_channels()) {
            return Err(StnError::shape(
                "linear gradient",
                &[last_input.number_of_row(), self.out_channels()],
                &[d_loss.number_of_row(), d_loss.number_of_col()],
            ));
        }
        self.bias.grad = d_loss.sum_rows();
        self.weight.grad = last_input.transpose().mul(&d_loss)?;
        d_loss.mul(&self.weight.value.transpose())
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
    fn with_bias_ignores_the_input() {
        let mut layer = LinearLayer::with_bias(4, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = Matrix::new(3, 4);
        x.uniform_init(10.0, &mut rng);
        let y = layer.forward(x).unwrap();
        for i in 0..3 {
            assert_eq!(y.row(i), &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        }
    }

    #[test]
    fn backward_produces_outer_product_gradients() {
        let mut layer = LinearLayer::with_bias(2, &[0.0, 0.0]).unwrap();
        layer.weight.value = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let x = Matrix::from_vec(1, 2, vec![1.0, -1.0]).unwrap();
        layer.forward(x).unwrap();
        let d = Matrix::from_vec(1, 2, vec![0.5, 1.0]).unwrap();
        let dx = layer.backward(d).unwrap();
        assert_eq!(layer.weight.grad.as_slice(), &[0.5, 1.0, -0.5, -1.0]);
        assert_eq!(layer.bias.grad.as_slice(), &[0.5, 1.0]);
        assert_eq!(dx.as_slice(), &[2.5, 5.5]);
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = LinearLayer::new(3, 2, &mut rng);
        assert!(matches!(
            layer.forward(Matrix::new(1, 4)),
            Err(StnError::ShapeMismatch { .. })
        ));
    }
}
