use crate::error::Result;
use crate::utils::mat::Matrix;
use crate::utils::misc::check_abnormal;
use crate::utils::nn_trait::{Head, Layer, Optimizer};

/// A model paired with its loss head: the unit the training loop drives.
pub struct Network<M: Layer> {
    model: M,
    loss_fn: Box<dyn Head>,
}

impl<M: Layer> Network<M> {
    pub fn new(model: M, loss_fn: Box<dyn Head>) -> Self {
        Self { model, loss_fn }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        self.model.forward(x)
    }

    /// Per-sample loss; fails if it is not finite.
    pub fn calc_loss(&mut self, pred: &Matrix, target: &Matrix) -> Result<Matrix> {
        let loss = self.loss_fn.forward(pred, target)?;
        check_abnormal("loss", &loss)?;
        Ok(loss)
    }

    pub fn get_result(&self, pred: &Matrix) -> Vec<usize> {
        self.loss_fn.eval_forward(pred)
    }

    pub fn backward(&mut self) -> Result<()> {
        let d = self.loss_fn.backward();
        self.model.backward(d)?;
        Ok(())
    }

    pub fn update_parameters(&mut self, optimizer: &dyn Optimizer) -> Result<()> {
        for param in self.model.params_mut() {
            optimizer.step(param)?;
        }
        Ok(())
    }

    pub fn set_training(&mut self, training: bool) {
        self.model.set_training(training);
    }
}
