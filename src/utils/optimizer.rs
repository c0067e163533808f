use crate::error::Result;
use crate::utils::nn_trait::{Optimizer, Param};

/// SGD with momentum and L2 weight decay. The velocity is clamped to keep a
/// single bad batch from throwing the weights far off.
pub struct Sgd {
    rate: f32,
    momentum: f32,
    decay: f32,
}

impl Sgd {
    pub fn new(rate: f32, momentum: f32, decay: f32) -> Self {
        Self {
            rate,
            momentum,
            decay,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Optimizer for Sgd {
    fn step(&self, param: &mut Param) -> Result<()> {
        // v = momentum * v - rate * (grad + decay * w); w += v
        let mut go = if param.decay && self.decay != 0.0 {
            let mut g = param.value.mul_with_numeric(self.decay);
            g.add_(&param.grad)?;
            g
        } else {
            param.grad.clone()
        };
        go.mul_with_numeric_(-self.rate);
        let mut velocity = match param.velocity.take() {
            Some(mut v) => {
                v.mul_with_numeric_(self.momentum);
                v.add_(&go)?;
                v
            }
            None => go,
        };
        velocity.clamp_(-100.0, 100.0);
        param.value.add_(&velocity)?;
        param.velocity = Some(velocity);
        Ok(())
    }
}
