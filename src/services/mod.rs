//! Facilitator persona and the text generation seam behind it.

pub mod facilitator;
pub mod generator;
