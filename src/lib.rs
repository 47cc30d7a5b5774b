//! Title matching library - links catalog records to external videos.

pub mod catalog;
pub mod config;
pub mod error;
pub mod linker;
pub mod matcher;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod report;
pub mod safety;
pub mod scoring;

pub use error::{Error, Result};
