pub mod codec;
pub mod errors;
pub mod events;
pub mod fusion;
pub mod relay;

pub use errors::{FusionError, FusionResultExt};
