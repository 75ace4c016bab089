//! Request guards for the API

pub mod auth;
