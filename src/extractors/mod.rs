// src/extractors/mod.rs
pub mod rows;
pub mod section;

// Re-export key extraction types for convenience
pub use section::SectionSegmenter;
