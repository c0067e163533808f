use crate::context::ExecutionContext;
use crate::error::Result;
use crate::stn::backbone::Classifier;
use crate::stn::transformer::SpatialTransformer;
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Layer, Param};
use crate::utils::shape::ImageShape;
use tracing::debug;

pub const CIFAR_SHAPE: ImageShape = ImageShape::new(3, 32, 32);
pub const CIFAR_CLASSES: usize = 10;

/// Spatial transformer followed by the classifier; outputs class
/// log-probabilities.
pub struct SpatialTransformerNet {
    pub transformer: SpatialTransformer,
    pub classifier: Classifier,
}

impl SpatialTransformerNet {
    pub fn new(input: ImageShape, num_classes: usize, ctx: &mut ExecutionContext) -> Result<Self> {
        let transformer = SpatialTransformer::new(input, ctx)?;
        let classifier = Classifier::new(input, num_classes, ctx)?;
        let mut net = Self {
            transformer,
            classifier,
        };
        let parameters = net.parameter_count();
        let localization_features = net.transformer.localization.features();
        debug!(
            input = %input,
            num_classes,
            localization_features,
            parameters,
            "built spatial transformer network"
        );
        net.set_training(true);
        Ok(net)
    }

    /// The reference configuration: 3x32x32 colour images, 10 classes.
    pub fn cifar(ctx: &mut ExecutionContext) -> Result<Self> {
        Self::new(CIFAR_SHAPE, CIFAR_CLASSES, ctx)
    }

    pub fn input_shape(&self) -> ImageShape {
        self.transformer.shape
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes
    }

    /// Runs only the spatial transformer, returning the resampled batch.
    pub fn transform(&mut self, x: Matrix) -> Result<Matrix> {
        self.transformer.forward(x)
    }

    pub fn parameter_count(&mut self) -> usize {
        self.params_mut()
            .iter()
            .map(|p| p.value.number_of_row() * p.value.number_of_col())
            .sum()
    }
}

impl Layer for SpatialTransformerNet {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        let x = self.transformer.forward(x)?;
        self.classifier.forward(x)
    }

    fn backward(&mut self, d: Matrix) -> Result<Matrix> {
        let d = self.classifier.backward(d)?;
        self.transformer.backward(d)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.transformer.params_mut();
        params.extend(self.classifier.params_mut());
        params
    }

    fn set_training(&mut self, training: bool) {
        self.transformer.set_training(training);
        self.classifier.set_training(training);
    }
}
