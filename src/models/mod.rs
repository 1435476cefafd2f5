//! Domain model module declarations.

pub mod hang;
pub mod outcome;
pub mod pattern;
pub mod task;
