//! Built-in adapters, so the server is useful without external backends.

pub mod data;
pub mod file;

pub use data::{DataAdapter, DATA_PROTOCOL};
pub use file::{FileAdapter, FILE_PROTOCOL};
