//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

pub mod mock_uploader;
pub mod recorder;
