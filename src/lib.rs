//! Mailcast — email batches in, narrated podcast episodes out.

pub mod artifacts;
pub mod assemble;
pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod filter;
pub mod mail;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod script;
