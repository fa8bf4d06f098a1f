pub mod board;
pub mod config;
pub mod mutator;
pub mod notice;
pub mod position;
pub mod remote;
pub mod search;
pub mod session;
pub mod sync;
pub mod types;
