// src/lib.rs

pub mod api;
pub mod app_state;
pub mod byte_range;
pub mod config;
pub mod error;
pub mod metadata;
pub mod protocol;
pub mod storage;
