// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod cancellation;
pub mod loading;
pub mod utils;

pub use utils::*;
