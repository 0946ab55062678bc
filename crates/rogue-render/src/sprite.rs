// SPDX-License-Identifier: CEPL-1.0
//! Sprite storage.
//!
//! Sprites live in an append-only list and are addressed by their index. Removing
//! a sprite releases its GPU texture and leaves an inert, zeroed record behind so
//! ids handed out earlier never start pointing at a different texture.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use glam::Vec2;
use thiserror::Error;
use tracing::{debug, info};

use crate::UiTexture;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpriteId(usize);

impl SpriteId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SpriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to load image: {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("pixel buffer is {len} bytes, expected {expected} for a {width}x{height} RGBA8 image")]
    InvalidPixels {
        width: u32,
        height: u32,
        len: usize,
        expected: usize,
    },
    #[error("failed to upload texture for {label}")]
    Upload {
        label: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Checks the RGBA8 precondition shared by every uploader: non-zero extent and
/// exactly four bytes per pixel.
pub fn validate_rgba8(pixels: &[u8], width: u32, height: u32) -> Result<(), AssetError> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .unwrap_or(usize::MAX);
    if width == 0 || height == 0 || pixels.len() != expected {
        return Err(AssetError::InvalidPixels {
            width,
            height,
            len: pixels.len(),
            expected,
        });
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub pixels: Vec<u8>,
}

pub trait ImageDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, AssetError>;
}

/// Decodes image files from disk with the `image` crate, converting to RGBA8.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileDecoder;

impl ImageDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, AssetError> {
        let rgba = image::open(path)
            .map_err(|source| AssetError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

/// A texture living on the GPU and registered with the UI.
pub trait GpuTexture {
    fn ui_texture(&self) -> UiTexture;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

pub trait TextureUploader {
    type Texture: GpuTexture;

    /// Copies `width * height` RGBA8 pixels into a sampled GPU image.
    fn upload(&mut self, pixels: &[u8], width: u32, height: u32) -> anyhow::Result<Self::Texture>;

    /// Unregisters the texture from the UI and frees its GPU objects.
    fn release(&mut self, texture: Self::Texture);
}

/// One registry slot. `texture` is `None` once the sprite has been removed;
/// all GPU handles go away together.
#[derive(Debug)]
pub struct Sprite<T> {
    texture: Option<T>,
    width: u32,
    height: u32,
    position: Vec2,
    size: Vec2,
    visible: bool,
}

impl<T> Sprite<T> {
    fn tombstone() -> Self {
        Self {
            texture: None,
            width: 0,
            height: 0,
            position: Vec2::ZERO,
            size: Vec2::ZERO,
            visible: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.texture.is_some()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    pub fn is_visible(&self) -> bool {
        self.visible && self.texture.is_some()
    }
}

impl<T: GpuTexture> Sprite<T> {
    /// Fresh sprites are hidden at the origin with their native size.
    fn loaded(texture: T) -> Self {
        let (width, height) = (texture.width(), texture.height());
        Self {
            texture: Some(texture),
            width,
            height,
            position: Vec2::ZERO,
            size: Vec2::new(width as f32, height as f32),
            visible: false,
        }
    }

    pub fn ui_texture(&self) -> Option<UiTexture> {
        self.texture.as_ref().map(GpuTexture::ui_texture)
    }
}

/// Not thread safe; the registry is owned by the render thread.
pub struct SpriteRegistry<U: TextureUploader, D: ImageDecoder = FileDecoder> {
    uploader: U,
    decoder: D,
    sprites: Vec<Sprite<U::Texture>>,
    by_path: HashMap<PathBuf, SpriteId>,
}

impl<U: TextureUploader> SpriteRegistry<U, FileDecoder> {
    pub fn new(uploader: U) -> Self {
        Self::with_decoder(uploader, FileDecoder)
    }
}

impl<U: TextureUploader, D: ImageDecoder> SpriteRegistry<U, D> {
    pub fn with_decoder(uploader: U, decoder: D) -> Self {
        Self {
            uploader,
            decoder,
            sprites: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Returns the id already produced for `path`, or decodes and uploads it.
    pub fn get_or_load(&mut self, path: impl AsRef<Path>) -> Result<SpriteId, AssetError> {
        let path = path.as_ref();
        if let Some(&id) = self.by_path.get(path) {
            debug!("sprite {} reused for {}", id, path.display());
            return Ok(id);
        }

        let image = self.decoder.decode(path)?;
        let label = path.display().to_string();
        let id = self.push(&label, &image.pixels, image.width, image.height)?;
        self.by_path.insert(path.to_path_buf(), id);
        info!(
            "sprite {} loaded from {} ({}x{})",
            id, label, image.width, image.height
        );
        Ok(id)
    }

    /// Uploads raw RGBA8 pixels that did not come from a file. Never cached.
    pub fn load_pixels(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<SpriteId, AssetError> {
        self.push("<pixels>", pixels, width, height)
    }

    fn push(
        &mut self,
        label: &str,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<SpriteId, AssetError> {
        validate_rgba8(pixels, width, height)?;
        let texture =
            self.uploader
                .upload(pixels, width, height)
                .map_err(|e| AssetError::Upload {
                    label: label.to_owned(),
                    source: e.into(),
                })?;
        let id = SpriteId(self.sprites.len());
        self.sprites.push(Sprite::loaded(texture));
        Ok(id)
    }

    pub fn sprite(&self, id: SpriteId) -> Option<&Sprite<U::Texture>> {
        self.sprites.get(id.0)
    }

    /// Positions a loaded sprite in screen space and makes it visible.
    /// Returns `false` for unknown or removed ids.
    pub fn place(&mut self, id: SpriteId, position: Vec2, size: Vec2) -> bool {
        match self.sprites.get_mut(id.0) {
            Some(s) if s.is_loaded() => {
                s.position = position;
                s.size = size;
                s.visible = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_visible(&mut self, id: SpriteId, visible: bool) -> bool {
        match self.sprites.get_mut(id.0) {
            Some(s) if s.is_loaded() => {
                s.visible = visible;
                true
            }
            _ => false,
        }
    }

    /// Releases the sprite's GPU texture and zeroes its slot. The id stays
    /// allocated and is never handed out again. Unknown or already removed
    /// ids are ignored.
    pub fn remove(&mut self, id: SpriteId) {
        let Some(slot) = self.sprites.get_mut(id.0) else {
            return;
        };
        let old = std::mem::replace(slot, Sprite::tombstone());
        if let Some(texture) = old.texture {
            self.uploader.release(texture);
            self.by_path.retain(|_, cached| *cached != id);
            debug!("sprite {} removed", id);
        }
    }

    /// Removes every sprite. Slots are kept as tombstones.
    pub fn clear(&mut self) {
        for index in 0..self.sprites.len() {
            self.remove(SpriteId(index));
        }
        self.by_path.clear();
    }

    /// Number of ids handed out, removed ones included.
    pub fn len(&self) -> usize {
        self.sprites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprites.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.sprites.iter().filter(|s| s.is_loaded()).count()
    }

    pub fn visible(&self) -> impl Iterator<Item = (SpriteId, &Sprite<U::Texture>)> + '_ {
        self.sprites
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_visible())
            .map(|(i, s)| (SpriteId(i), s))
    }

    pub fn uploader_mut(&mut self) -> &mut U {
        &mut self.uploader
    }
}

impl<U: TextureUploader, D: ImageDecoder> Drop for SpriteRegistry<U, D> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct FakeTexture {
        handle: u64,
        width: u32,
        height: u32,
    }

    impl GpuTexture for FakeTexture {
        fn ui_texture(&self) -> UiTexture {
            UiTexture::from_raw(self.handle)
        }
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
    }

    #[derive(Default)]
    struct Log {
        uploads: usize,
        released: Vec<u64>,
    }

    #[derive(Default)]
    struct CountingUploader {
        log: Rc<RefCell<Log>>,
        fail: bool,
    }

    impl TextureUploader for CountingUploader {
        type Texture = FakeTexture;

        fn upload(&mut self, _pixels: &[u8], width: u32, height: u32) -> anyhow::Result<FakeTexture> {
            if self.fail {
                anyhow::bail!("device lost");
            }
            let mut log = self.log.borrow_mut();
            log.uploads += 1;
            Ok(FakeTexture {
                handle: 100 + log.uploads as u64,
                width,
                height,
            })
        }

        fn release(&mut self, texture: FakeTexture) {
            self.log.borrow_mut().released.push(texture.handle);
        }
    }

    /// Every path decodes to a 2x3 image except ones named `missing.png`.
    struct FakeDecoder;

    impl ImageDecoder for FakeDecoder {
        fn decode(&self, path: &Path) -> Result<DecodedImage, AssetError> {
            if path.ends_with("missing.png") {
                return Err(AssetError::Decode {
                    path: path.to_path_buf(),
                    source: image::ImageError::IoError(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no such file",
                    )),
                });
            }
            Ok(DecodedImage {
                width: 2,
                height: 3,
                pixels: vec![255; 2 * 3 * 4],
            })
        }
    }

    fn registry() -> (
        SpriteRegistry<CountingUploader, FakeDecoder>,
        Rc<RefCell<Log>>,
    ) {
        let uploader = CountingUploader::default();
        let log = uploader.log.clone();
        (SpriteRegistry::with_decoder(uploader, FakeDecoder), log)
    }

    #[test]
    fn same_path_is_uploaded_once() {
        let (mut reg, log) = registry();
        let a = reg.get_or_load("assets/characters/angel.png").unwrap();
        let b = reg.get_or_load("assets/characters/angel.png").unwrap();
        assert_eq!(a, b);
        assert_eq!(log.borrow().uploads, 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn distinct_paths_get_distinct_ids() {
        let (mut reg, log) = registry();
        let hero = reg.get_or_load("hero.png").unwrap();
        let angel = reg.get_or_load("angel.png").unwrap();
        assert_ne!(hero, angel);
        assert_eq!(hero.index(), 0);
        assert_eq!(angel.index(), 1);
        assert_eq!(log.borrow().uploads, 2);
    }

    #[test]
    fn loaded_sprite_matches_decoded_extent() {
        let (mut reg, _log) = registry();
        let id = reg.get_or_load("hero.png").unwrap();
        let s = reg.sprite(id).unwrap();
        assert!(s.is_loaded());
        assert_eq!((s.width(), s.height()), (2, 3));
        assert_eq!(s.size(), Vec2::new(2.0, 3.0));
        assert!(!s.is_visible());
        assert!(s.ui_texture().is_some());
    }

    #[test]
    fn removed_sprite_reads_as_zeroed() {
        let (mut reg, log) = registry();
        let id = reg.get_or_load("hero.png").unwrap();
        reg.place(id, Vec2::new(10.0, 20.0), Vec2::splat(64.0));
        reg.remove(id);

        let s = reg.sprite(id).unwrap();
        assert!(!s.is_loaded());
        assert!(!s.is_visible());
        assert!(s.ui_texture().is_none());
        assert_eq!((s.width(), s.height()), (0, 0));
        assert_eq!(s.position(), Vec2::ZERO);
        assert_eq!(log.borrow().released, vec![101]);
    }

    #[test]
    fn remove_twice_or_out_of_range_is_a_no_op() {
        let (mut reg, log) = registry();
        let id = reg.get_or_load("hero.png").unwrap();
        reg.remove(id);
        reg.remove(id);
        reg.remove(SpriteId(42));
        assert_eq!(log.borrow().released.len(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn ids_are_never_reused_after_remove() {
        let (mut reg, log) = registry();
        let first = reg.get_or_load("hero.png").unwrap();
        reg.remove(first);
        let second = reg.get_or_load("hero.png").unwrap();
        assert_ne!(first, second);
        assert_eq!(log.borrow().uploads, 2);
        assert!(!reg.sprite(first).unwrap().is_loaded());
        assert!(reg.sprite(second).unwrap().is_loaded());
    }

    #[test]
    fn decode_failure_carries_path_and_appends_nothing() {
        let (mut reg, log) = registry();
        let err = reg.get_or_load("assets/missing.png").unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
        assert!(err.to_string().contains("assets/missing.png"));
        assert!(reg.is_empty());
        assert_eq!(log.borrow().uploads, 0);
    }

    #[test]
    fn upload_failure_is_reported_and_not_cached() {
        let uploader = CountingUploader {
            fail: true,
            ..Default::default()
        };
        let mut reg = SpriteRegistry::with_decoder(uploader, FakeDecoder);
        let err = reg.get_or_load("hero.png").unwrap_err();
        assert!(matches!(err, AssetError::Upload { .. }));
        assert!(reg.is_empty());

        reg.uploader_mut().fail = false;
        assert!(reg.get_or_load("hero.png").is_ok());
    }

    #[test]
    fn raw_pixels_must_match_extent() {
        let (mut reg, log) = registry();
        let err = reg.load_pixels(&[0; 15], 2, 2).unwrap_err();
        assert!(matches!(
            err,
            AssetError::InvalidPixels {
                len: 15,
                expected: 16,
                ..
            }
        ));
        assert!(reg.load_pixels(&[], 0, 0).is_err());
        assert_eq!(log.borrow().uploads, 0);

        let id = reg.load_pixels(&[0; 16], 2, 2).unwrap();
        assert_eq!(reg.sprite(id).unwrap().width(), 2);
    }

    #[test]
    fn only_placed_live_sprites_are_visible() {
        let (mut reg, _log) = registry();
        let hero = reg.get_or_load("hero.png").unwrap();
        let angel = reg.get_or_load("angel.png").unwrap();
        assert_eq!(reg.visible().count(), 0);

        assert!(reg.place(hero, Vec2::new(256.0, 256.0), Vec2::splat(64.0)));
        assert!(reg.place(angel, Vec2::new(400.0, 256.0), Vec2::splat(64.0)));
        reg.set_visible(angel, false);
        let ids: Vec<SpriteId> = reg.visible().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![hero]);

        reg.remove(hero);
        assert!(!reg.place(hero, Vec2::ZERO, Vec2::ONE));
        assert!(!reg.set_visible(hero, true));
        assert_eq!(reg.visible().count(), 0);
    }

    #[test]
    fn clear_and_drop_release_everything_once() {
        let (mut reg, log) = registry();
        reg.get_or_load("hero.png").unwrap();
        let angel = reg.get_or_load("angel.png").unwrap();
        reg.remove(angel);
        reg.clear();
        assert_eq!(log.borrow().released.len(), 2);
        assert_eq!(reg.live_count(), 0);
        assert_eq!(reg.len(), 2);

        reg.get_or_load("hero.png").unwrap();
        drop(reg);
        assert_eq!(log.borrow().released.len(), 3);
    }
}
