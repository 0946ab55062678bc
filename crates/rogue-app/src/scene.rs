// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use glam::Vec2;
use rogue_render::{ImageDecoder, SpriteId, SpriteRegistry, TextureUploader, UiTexture};
use rogue_render_vk::{draw_image, FrameHandler, VkSprites};
use tracing::info;

use crate::config::{EntityCfg, SceneCfg};

/// Something drawn by the world pass. Several entities may share one sprite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entity {
    pub sprite: SpriteId,
    pub position: Vec2,
    pub size: Vec2,
}

/// Application state handed to the frame loop every frame.
#[derive(Debug)]
pub struct Scene {
    player: Option<SpriteId>,
    entities: Vec<Entity>,
    pub show_window: bool,
    pub show_demo: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            player: None,
            entities: Vec::new(),
            show_window: true,
            show_demo: true,
        }
    }
}

impl Scene {
    /// Loads every sprite the scene needs. Any asset failure aborts setup.
    pub fn setup<U, D>(sprites: &mut SpriteRegistry<U, D>, cfg: &SceneCfg) -> Result<Self>
    where
        U: TextureUploader,
        D: ImageDecoder,
    {
        let mut scene = Scene::default();
        if let Some(p) = &cfg.player {
            let id = sprites
                .get_or_load(&p.path)
                .with_context(|| format!("load player sprite {}", p.path.display()))?;
            sprites.place(id, Vec2::new(p.x, p.y), extent(p));
            scene.player = Some(id);
        }
        for e in &cfg.entities {
            scene.spawn(sprites, e)?;
        }
        info!(
            "scene: {} entities, {} textures",
            scene.entities.len(),
            sprites.live_count()
        );
        Ok(scene)
    }

    pub fn spawn<U, D>(&mut self, sprites: &mut SpriteRegistry<U, D>, cfg: &EntityCfg) -> Result<()>
    where
        U: TextureUploader,
        D: ImageDecoder,
    {
        let sprite = sprites
            .get_or_load(&cfg.path)
            .with_context(|| format!("spawn entity from {}", cfg.path.display()))?;
        self.entities.push(Entity {
            sprite,
            position: Vec2::new(cfg.x, cfg.y),
            size: extent(cfg),
        });
        Ok(())
    }

    pub fn player(&self) -> Option<SpriteId> {
        self.player
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Textured quads for the world pass. Entities whose sprite was removed are skipped.
    pub fn world_quads<'a, U, D>(
        &'a self,
        sprites: &'a SpriteRegistry<U, D>,
    ) -> impl Iterator<Item = (UiTexture, Vec2, Vec2)> + 'a
    where
        U: TextureUploader,
        D: ImageDecoder,
    {
        self.entities.iter().filter_map(move |e| {
            let tex = sprites.sprite(e.sprite)?.ui_texture()?;
            Some((tex, e.position, e.size))
        })
    }
}

fn extent(cfg: &EntityCfg) -> Vec2 {
    Vec2::new(cfg.width as f32, cfg.height as f32)
}

impl FrameHandler for Scene {
    fn draw_world(&mut self, ui: &imgui::Ui, sprites: &VkSprites) {
        for (tex, position, size) in self.world_quads(sprites) {
            draw_image(ui, tex, position, size);
        }
    }

    fn draw_ui(&mut self, ui: &imgui::Ui) {
        if self.show_window {
            let show_demo = &mut self.show_demo;
            let mut close = false;
            ui.window("Hello, ImGui + Vulkan")
                .size([320.0, 120.0], imgui::Condition::FirstUseEver)
                .build(|| {
                    ui.text("Dear ImGui on a Vulkan swapchain.");
                    ui.text(format!("{:.1} fps", ui.io().framerate));
                    ui.checkbox("Show demo", show_demo);
                    close = ui.button("Close");
                });
            if close {
                self.show_window = false;
            }
        }
        if self.show_demo {
            ui.show_demo_window(&mut self.show_demo);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use rogue_render::{AssetError, DecodedImage, GpuTexture};

    use super::*;

    struct FakeTexture(u64);

    impl GpuTexture for FakeTexture {
        fn ui_texture(&self) -> UiTexture {
            UiTexture::from_raw(self.0)
        }
        fn width(&self) -> u32 {
            64
        }
        fn height(&self) -> u32 {
            64
        }
    }

    #[derive(Default)]
    struct Uploader {
        uploads: Rc<Cell<u64>>,
    }

    impl TextureUploader for Uploader {
        type Texture = FakeTexture;

        fn upload(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> anyhow::Result<FakeTexture> {
            self.uploads.set(self.uploads.get() + 1);
            Ok(FakeTexture(self.uploads.get()))
        }

        fn release(&mut self, _texture: FakeTexture) {}
    }

    /// Paths containing "broken" decode to a buffer of the wrong length.
    struct Decoder;

    impl ImageDecoder for Decoder {
        fn decode(&self, path: &Path) -> Result<DecodedImage, AssetError> {
            let len = if path.to_string_lossy().contains("broken") { 3 } else { 64 * 64 * 4 };
            Ok(DecodedImage {
                width: 64,
                height: 64,
                pixels: vec![0; len],
            })
        }
    }

    fn registry() -> (SpriteRegistry<Uploader, Decoder>, Rc<Cell<u64>>) {
        let uploader = Uploader::default();
        let uploads = uploader.uploads.clone();
        (SpriteRegistry::with_decoder(uploader, Decoder), uploads)
    }

    #[test]
    fn default_scene_shares_the_angel_texture() {
        let (mut sprites, uploads) = registry();
        let scene = Scene::setup(&mut sprites, &SceneCfg::default()).unwrap();

        assert_eq!(uploads.get(), 2);
        assert_eq!(scene.entities().len(), 2);
        assert_eq!(scene.entities()[0].sprite, scene.entities()[1].sprite);
        assert_ne!(Some(scene.entities()[0].sprite), scene.player());
        assert_eq!(scene.entities()[1].position, Vec2::new(400.0, 400.0));
    }

    #[test]
    fn player_is_placed_and_visible() {
        let (mut sprites, _) = registry();
        let scene = Scene::setup(&mut sprites, &SceneCfg::default()).unwrap();
        let player = scene.player().unwrap();

        let visible: Vec<_> = sprites.visible().map(|(id, _)| id).collect();
        assert_eq!(visible, vec![player]);
        let s = sprites.sprite(player).unwrap();
        assert_eq!(s.position(), Vec2::new(256.0, 256.0));
        assert_eq!(s.size(), Vec2::splat(64.0));
    }

    #[test]
    fn both_windows_are_open_on_startup() {
        let scene = Scene::default();
        assert!(scene.show_window);
        assert!(scene.show_demo);

        let (mut sprites, _) = registry();
        let scene = Scene::setup(&mut sprites, &SceneCfg::default()).unwrap();
        assert!(scene.show_demo);
    }

    #[test]
    fn world_quads_skip_removed_sprites() {
        let (mut sprites, _) = registry();
        let mut scene = Scene::default();
        let angel = EntityCfg {
            path: PathBuf::from("angel.png"),
            x: 1.0,
            y: 2.0,
            width: 32,
            height: 48,
        };
        let imp = EntityCfg {
            path: PathBuf::from("imp.png"),
            ..angel.clone()
        };
        scene.spawn(&mut sprites, &angel).unwrap();
        scene.spawn(&mut sprites, &imp).unwrap();
        assert_eq!(scene.world_quads(&sprites).count(), 2);

        sprites.remove(scene.entities()[1].sprite);
        let quads: Vec<_> = scene.world_quads(&sprites).collect();
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].1, Vec2::new(1.0, 2.0));
        assert_eq!(quads[0].2, Vec2::new(32.0, 48.0));
    }

    #[test]
    fn bad_asset_aborts_setup_with_path_in_message() {
        let (mut sprites, uploads) = registry();
        let cfg = SceneCfg {
            player: None,
            entities: vec![EntityCfg {
                path: PathBuf::from("assets/broken.png"),
                x: 0.0,
                y: 0.0,
                width: 64,
                height: 64,
            }],
        };
        let err = Scene::setup(&mut sprites, &cfg).unwrap_err();
        assert!(format!("{err:#}").contains("assets/broken.png"));
        assert_eq!(uploads.get(), 0);
    }
}
