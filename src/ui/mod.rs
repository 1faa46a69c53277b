//! UI module for the Ratatui-based status dashboard.

mod app;
mod render;

pub use app::App;
pub use render::render;
