pub mod classifier;
pub mod consumer;
pub mod control;
pub mod error;
pub mod hid;
pub mod logging;
pub mod model_store;
pub mod monitor;
pub mod myo;
pub mod pipeline;
pub mod projector;
pub mod recorder;
pub mod recording;
pub mod smoothing;
pub mod source;
pub mod svm;
pub mod training;
pub mod types;

#[cfg(test)]
mod integration_tests;
