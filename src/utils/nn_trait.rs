use crate::error::Result;
use crate::utils::mat::Matrix;

/// A trainable tensor with its gradient and optimizer state.
#[derive(Debug, Clone)]
pub struct Param {
    pub value: Matrix,
    pub grad: Matrix,
    pub velocity: Option<Matrix>,
    /// Weight decay is skipped for biases.
    pub decay: bool,
}

impl Param {
    pub fn new(value: Matrix, decay: bool) -> Self {
        let (h, w) = value.shape();
        Self {
            value,
            grad: Matrix::new(h, w),
            velocity: None,
            decay,
        }
    }
}

/// Batched layer with a hand-derived backward pass.
///
/// `forward` caches whatever `backward` needs; `backward` receives the loss
/// gradient w.r.t. the layer output and returns it w.r.t. the layer input,
/// storing parameter gradients along the way.
pub trait Layer: Send {
    fn forward(&mut self, input: Matrix) -> Result<Matrix>;
    fn backward(&mut self, d_loss: Matrix) -> Result<Matrix>;
    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }
    fn set_training(&mut self, _training: bool) {}
}

pub trait Head: Send {
    /// Per-sample loss as an `N x 1` matrix.
    fn forward(&mut self, input: &Matrix, target: &Matrix) -> Result<Matrix>;
    fn backward(&mut self) -> Matrix;
    fn eval_forward(&self, input: &Matrix) -> Vec<usize>;
}

pub trait Optimizer {
    fn step(&self, param: &mut Param) -> Result<()>;
}

pub trait DataSet: Sync {
    fn dim(&self) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn fetch_item(&self, idx: usize) -> Result<(&[f32], u8)>;
}
