//! inbox-warden — automated moderation for a virtualized host inbox.

pub mod cache;
pub mod config;
pub mod decision;
pub mod detector;
pub mod error;
pub mod executor;
pub mod gate;
pub mod markers;
pub mod orchestrator;
pub mod remote;
pub mod surface;
