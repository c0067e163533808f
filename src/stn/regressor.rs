use crate::context::ExecutionContext;
use crate::error::Result;
use crate::stn::affine_grid::IDENTITY_THETA;
use crate::utils::linear::LinearLayer;
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Layer, Param};
use crate::utils::relu::ReluLayer;

pub const REGRESSOR_HIDDEN: usize = 32;

/// Maps localization features to theta. The last layer starts with zero
/// weights and the identity as bias, so every input initially maps to the
/// identity transform.
pub struct AffineRegressor {
    pub(crate) fc1: LinearLayer,
    relu: ReluLayer,
    pub(crate) fc2: LinearLayer,
}

impl AffineRegressor {
    pub fn new(features: usize, ctx: &mut ExecutionContext) -> Result<Self> {
        Ok(Self {
            fc1: LinearLayer::new(features, REGRESSOR_HIDDEN, ctx.rng()),
            relu: ReluLayer::new(),
            fc2: LinearLayer::with_bias(REGRESSOR_HIDDEN, &IDENTITY_THETA)?,
        })
    }

    /// The layer producing theta.
    pub fn last_layer(&self) -> &LinearLayer {
        &self.fc2
    }
}

impl Layer for AffineRegressor {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let x = self.fc1.forward(x)?;
        let x = self.relu.forward(x)?;
        self.fc2.forward(x)
    }

    fn backward(&mut self, d_theta: Matrix) -> Result<Matrix> {
        let d = self.fc2.backward(d_theta)?;
        let d = self.relu.backward(d)?;
        self.fc1.backward(d)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.fc1.params_mut();
        params.extend(self.fc2.params_mut());
        params
    }
}
