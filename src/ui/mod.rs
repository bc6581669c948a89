//! TUI components.

pub mod app;
pub mod render;
pub mod worker;

pub use app::{App, TreeItem};
pub use render::render;
pub use worker::{RefreshEvent, RefreshWorker};
