pub mod cifar;
pub mod dataloader;
pub mod mat;
pub mod nn_trait;
pub mod shape;

pub mod conv2d;
pub mod dropout;
pub mod head;
pub mod linear;
pub mod maxpool2x2;
pub mod network;
pub mod optimizer;
pub mod relu;

pub mod misc;
pub mod visualize;
