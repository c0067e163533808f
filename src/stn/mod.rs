pub mod affine_grid;
pub mod grid_sample;

pub mod backbone;
pub mod localization;
pub mod model;
pub mod regressor;
pub mod transformer;
