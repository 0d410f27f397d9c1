//! Image availability: reference parsing, registry credentials and the
//! resolver that pulls missing images.

pub mod credentials;
pub mod reference;
pub mod resolver;

pub use resolver::{EngineImageResolver, ImageResolver, PullError};
