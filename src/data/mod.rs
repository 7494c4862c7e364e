//! Data loading and train/test split preparation

pub mod loader;
mod service;

pub use loader::{load_frame, load_xy, DataFormat};
pub use service::{split_indices, DataService, ProcessSummary, SplitIndices};
