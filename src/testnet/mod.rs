//! Test fixtures: throwaway chains in temp directories.

pub mod test_utils;

pub use test_utils::*;
