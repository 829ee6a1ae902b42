//! Shared JSON-document persistence.

pub mod json_file;

pub use json_file::JsonFile;
