//! Diagnostics for the buffer → parse → replay pipeline: stage capture and
//! analysis, failure classification, and the systematic test runner.

pub mod classifier;
pub mod config;
pub mod inspector;
pub mod matrix;
pub mod runner;

pub use classifier::FailureClassifier;
pub use inspector::StageInspector;
pub use runner::{Pipeline, SuiteRunner};
