//! HTTP routes

pub mod pipeline;
