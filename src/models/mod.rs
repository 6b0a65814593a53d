// Data models for frames and pose estimation

pub mod frame;
pub mod pose;
