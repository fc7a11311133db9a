pub mod resolution;
pub mod service;

pub use resolution::{ResolutionAction, ResolutionResult};
pub use service::LinkingService;
