//! Utility modules: retry and polling.

pub mod poll;
pub mod retry;
