//! A spatial transformer network in front of a small CNN classifier, with a
//! from-scratch tensor runtime and hand-derived backward passes.
//!
//! The transformer predicts an affine `theta` per image, turns it into a
//! sampling grid ([`stn::affine_grid`]) and bilinearly resamples the image
//! through it ([`stn::grid_sample`]); gradients flow back through both into
//! the localization network.

pub mod config;
pub mod context;
pub mod error;
pub mod stn;
pub mod utils;

pub use context::ExecutionContext;
pub use error::{Result, StnError};
pub use stn::model::SpatialTransformerNet;
pub use utils::mat::Matrix;
pub use utils::shape::ImageShape;
