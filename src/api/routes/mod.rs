//! Route handlers, grouped by resource

pub mod agent;
pub mod health;
pub mod hosts;
pub mod stats;
pub mod tasks;
