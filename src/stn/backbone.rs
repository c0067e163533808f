use crate::context::ExecutionContext;
use crate::error::Result;
use crate::utils::conv2d::Conv2d;
use crate::utils::dropout::{Dropout, DropoutMode};
use crate::utils::head::LogSoftmax;
use crate::utils::linear::LinearLayer;
use crate::utils::mat::Matrix;
use crate::utils::maxpool2x2::MaxPool2x2;
use crate::utils::nn_trait::{Layer, Param};
use crate::utils::relu::ReluLayer;
use crate::utils::shape::ImageShape;

pub const BACKBONE_CHANNELS: [usize; 2] = [10, 20];
pub const BACKBONE_KERNEL: usize = 5;
pub const BACKBONE_HIDDEN: usize = 50;
pub const DROPOUT_P: f32 = 0.5;

/// Two conv blocks and two fully connected layers ending in log-softmax.
pub struct Classifier {
    conv1: Conv2d,
    pool1: MaxPool2x2,
    relu1: ReluLayer,
    conv2: Conv2d,
    drop2: Dropout,
    pool2: MaxPool2x2,
    relu2: ReluLayer,
    fc1: LinearLayer,
    relu3: ReluLayer,
    drop3: Dropout,
    fc2: LinearLayer,
    log_softmax: LogSoftmax,
    pub input: ImageShape,
    pub num_classes: usize,
}

impl Classifier {
    pub fn new(input: ImageShape, num_classes: usize, ctx: &mut ExecutionContext) -> Result<Self> {
        let conv1 = Conv2d::new(input, BACKBONE_CHANNELS[0], BACKBONE_KERNEL, 0, ctx.rng())?;
        let pool1 = MaxPool2x2::new(conv1.output)?;
        let conv2 = Conv2d::new(
            pool1.output,
            BACKBONE_CHANNELS[1],
            BACKBONE_KERNEL,
            0,
            ctx.rng(),
        )?;
        let drop2 = Dropout::new(DROPOUT_P, DropoutMode::Channel(conv2.output), ctx.fork_rng())?;
        let pool2 = MaxPool2x2::new(conv2.output)?;
        let flat = pool2.output.len();
        let fc1 = LinearLayer::new(flat, BACKBONE_HIDDEN, ctx.rng());
        let drop3 = Dropout::new(DROPOUT_P, DropoutMode::Element, ctx.fork_rng())?;
        let fc2 = LinearLayer::new(BACKBONE_HIDDEN, num_classes, ctx.rng());
        Ok(Self {
            conv1,
            pool1,
            relu1: ReluLayer::new(),
            conv2,
            drop2,
            pool2,
            relu2: ReluLayer::new(),
            fc1,
            relu3: ReluLayer::new(),
            drop3,
            fc2,
            log_softmax: LogSoftmax::new(),
            input,
            num_classes,
        })
    }
}

impl Layer for Classifier {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let x = self.conv1.forward(x)?;
        let x = self.pool1.forward(x)?;
        let x = self.relu1.forward(x)?;
        let x = self.conv2.forward(x)?;
        let x = self.drop2.forward(x)?;
        let x = self.pool2.forward(x)?;
        let x = self.relu2.forward(x)?;
        let x = self.fc1.forward(x)?;
        let x = self.relu3.forward(x)?;
        let x = self.drop3.forward(x)?;
        let x = self.fc2.forward(x)?;
        self.log_softmax.forward(x)
    }

    fn backward(&mut self, d: Matrix) -> Result<Matrix> {
        let d = self.log_softmax.backward(d)?;
        let d = self.fc2.backward(d)?;
        let d = self.drop3.backward(d)?;
        let d = self.relu3.backward(d)?;
        let d = self.fc1.backward(d)?;
        let d = self.relu2.backward(d)?;
        let d = self.pool2.backward(d)?;
        let d = self.drop2.backward(d)?;
        let d = self.conv2.backward(d)?;
        let d = self.relu1.backward(d)?;
        let d = self.pool1.backward(d)?;
        self.conv1.backward(d)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.conv1.params_mut();
        params.extend(self.conv2.params_mut());
        params.extend(self.fc1.params_mut());
        params.extend(self.fc2.params_mut());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.drop2.set_training(training);
        self.drop3.set_training(training);
    }
}
