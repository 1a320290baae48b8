// src/evaluation/mod.rs
pub mod aggregate;
pub mod pipeline;
pub mod repair;

pub use aggregate::DocumentResult;
pub use pipeline::{DocumentEvaluator, EvaluatedDocument};
