//! Tracked symbol universe.

mod symbols_model;
mod symbols_traits;

pub use symbols_model::*;
pub use symbols_traits::*;
