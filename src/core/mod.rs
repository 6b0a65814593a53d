pub mod config;
pub mod model_resolver;

// Per-frame pipeline
pub mod preprocess;
pub mod predict;
pub mod cropping;
pub mod processor;

// Live estimation
pub mod pose_estimator;
pub mod pose_stream;
