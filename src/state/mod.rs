//! Workshop stage ordering and budget tables.

pub mod stages;

pub use stages::{Stage, StageSchedule, advance};
