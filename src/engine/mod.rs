//! Layer-level API: configuration, parameter initialization and the
//! convolution engine itself.

pub mod config;
pub mod conv;
pub mod filler;

pub use config::ConvParams;
pub use conv::{ConvolutionEngine, FeatureMap};
pub use filler::FillerConfig;
