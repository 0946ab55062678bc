// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic rendering types: sizes, the opaque UI texture handle, the
//! sprite registry and the bookkeeping that drives frame pacing and surface
//! recreation. Nothing in here talks to a GPU.
use anyhow::Result;

mod frame;
mod sprite;
mod surface;

pub use frame::{FrameCursor, FrameOutcome, DEFAULT_FRAMES_IN_FLIGHT};
pub use sprite::{
    validate_rgba8, AssetError, DecodedImage, FileDecoder, GpuTexture, ImageDecoder, Sprite,
    SpriteId, SpriteRegistry, TextureUploader,
};
pub use surface::{PresentStatus, SurfaceState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero dimension; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Opaque handle the UI library uses to refer to a registered texture.
///
/// The backend decides what the raw value means (for Vulkan it is the
/// descriptor set handle); callers only pass it back to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UiTexture(u64);

impl UiTexture {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

pub trait Renderer {
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Blocks until the GPU has drained all submitted work.
    fn wait_idle(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_empty() {
        assert!(RenderSize::new(0, 720).is_empty());
        assert!(RenderSize::new(1280, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }

    #[test]
    fn ui_texture_round_trips_raw_handle() {
        let tex = UiTexture::from_raw(0xdead_beef_0000_0001);
        assert_eq!(tex.raw(), 0xdead_beef_0000_0001);
    }
}
