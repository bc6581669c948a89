//! Snapshot presentation: grouped and tree text, JSON.

pub mod json;
pub mod text;
