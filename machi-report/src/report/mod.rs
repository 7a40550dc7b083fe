//! Report text composition

pub mod narrative;

pub use narrative::compose_narrative;
