//! Viitjee client utility functions and helpers.

pub mod config;
mod path_processing;

pub use path_processing::expand_tilde;
