// Inference runtime integration

pub mod inference;
