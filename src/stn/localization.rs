use crate::context::ExecutionContext;
use crate::error::Result;
use crate::utils::conv2d::Conv2d;
use crate::utils::mat::Matrix;
use crate::utils::maxpool2x2::MaxPool2x2;
use crate::utils::nn_trait::{Layer, Param};
use crate::utils::relu::ReluLayer;
use crate::utils::shape::ImageShape;

pub const LOC_CHANNELS: [usize; 2] = [8, 12];
pub const LOC_KERNELS: [usize; 2] = [7, 5];

/// conv -> pool -> relu, twice. The output row is the flattened feature map.
pub struct Localization {
    pub(crate) conv1: Conv2d,
    pool1: MaxPool2x2,
    relu1: ReluLayer,
    conv2: Conv2d,
    pool2: MaxPool2x2,
    relu2: ReluLayer,
    pub input: ImageShape,
    pub output: ImageShape,
}

impl Localization {
    pub fn new(input: ImageShape, ctx: &mut ExecutionContext) -> Result<Self> {
        let conv1 = Conv2d::new(input, LOC_CHANNELS[0], LOC_KERNELS[0], 0, ctx.rng())?;
        let pool1 = MaxPool2x2::new(conv1.output)?;
        let conv2 = Conv2d::new(pool1.output, LOC_CHANNELS[1], LOC_KERNELS[1], 0, ctx.rng())?;
        let pool2 = MaxPool2x2::new(conv2.output)?;
        let output = pool2.output;
        Ok(Self {
            conv1,
            pool1,
            relu1: ReluLayer::new(),
            conv2,
            pool2,
            relu2: ReluLayer::new(),
            input,
            output,
        })
    }

    /// Length of the flattened feature vector.
    pub fn features(&self) -> usize {
        self.output.len()
    }
}

impl Layer for Localization {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let x = self.conv1.forward(x)?;
        let x = self.pool1.forward(x)?;
        let x = self.relu1.forward(x)?;
        let x = self.conv2.forward(x)?;
        let x = self.pool2.forward(x)?;
        self.relu2.forward(x)
    }

    fn backward(&mut self, d: Matrix) -> Result<Matrix> {
        let d = self.relu2.backward(d)?;
        let d = self.pool2.backward(d)?;
        let d = self.conv2.backward(d)?;
        let d = self.relu1.backward(d)?;
        let d = self.pool1.backward(d)?;
        self.conv1.backward(d)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.conv1.params_mut();
        params.extend(self.conv2.params_mut());
        params
    }
}
