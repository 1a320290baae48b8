// src/rubric/mod.rs
pub mod model;
pub mod prompt;

pub use model::Rubric;
