//! Mock transport implementations for testing and development.
//!
//! This module provides simulated readers that can be controlled
//! programmatically without requiring physical hardware.

pub mod reader;

// Re-export commonly used types
pub use reader::{MockReaderStats, MockReaders, MockReadersHandle};
