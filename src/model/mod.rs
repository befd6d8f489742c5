//! Projections of the character and crew domains.

pub mod character;
pub mod crew;

pub use character::{Character, MAX_STRESS};
pub use crew::Crew;
