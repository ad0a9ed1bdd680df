// Models module - rows owned by the forum registry and the voting engine
pub mod forum_models;

pub use forum_models::*;
