pub mod error;

pub use error::{TetherError, TetherResult};
