//! API handlers module

pub mod artifacts;
pub mod health;
pub mod login;
pub mod ratings;
