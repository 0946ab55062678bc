// SPDX-License-Identifier: CEPL-1.0
//! Window creation on top of winit. Everything else in the workspace reaches
//! winit through the re-export below so the version is pinned in one place.
pub use winit;

use anyhow::{Context, Result};
use tracing::info;
use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    window::{Window, WindowAttributes},
};

pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
}

pub fn create_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    width: u32,
    height: u32,
) -> Result<Window> {
    let window = event_loop
        .create_window(window_attributes(title, width, height))
        .context("create_window")?;
    let size = window.inner_size();
    info!("window \"{}\" created ({}x{})", title, size.width, size.height);
    Ok(window)
}

/// Current drawable size in physical pixels. Zero while minimized.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}
