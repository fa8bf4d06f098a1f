//! Remote change handling.

pub mod event;
pub mod merger;
pub mod pending;
pub mod subscription;
