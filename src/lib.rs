// src/lib.rs

pub mod api;
pub mod app_state;
pub mod blob;
pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod logging;
pub mod quota;
pub mod service;
pub mod stats;
