//! Network topology and the pretrained weight format.

mod layers;
mod net;
pub mod zoo;

pub use net::{ConvNet, NetConfig, CLASSIFIER_LAYER, LAYER_NAMES};
