// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod clear;
pub mod memoize;
pub mod method;
pub mod serializer;
pub mod utils;

pub use utils::*;
