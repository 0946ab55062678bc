// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rogue_render::DEFAULT_FRAMES_IN_FLIGHT;
use rogue_render_vk::{VkConfig, VkVsyncMode};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub scene: SceneCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "RogueLikeGame".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncMode,
    pub frames_in_flight: usize,
    /// Unset: on in debug builds, off in release builds.
    pub validation: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync_mode: VsyncMode::Mailbox,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            validation: None,
        }
    }
}

impl RenderCfg {
    pub fn to_vk(&self) -> VkConfig {
        VkConfig {
            clear_color: self.clear_color,
            vsync_mode: match self.vsync_mode {
                VsyncMode::Fifo => VkVsyncMode::Fifo,
                VsyncMode::Mailbox => VkVsyncMode::Mailbox,
            },
            frames_in_flight: self.frames_in_flight.max(1),
            validation: self.validation.unwrap_or(cfg!(debug_assertions)),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.10, 0.15, 0.20, 1.0]
}

/// One sprite on screen: which image, where, how big.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EntityCfg {
    pub path: PathBuf,
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_extent")]
    pub width: u32,
    #[serde(default = "default_extent")]
    pub height: u32,
}

fn default_extent() -> u32 {
    64
}

impl EntityCfg {
    fn new(path: &str, x: f32, y: f32) -> Self {
        Self {
            path: PathBuf::from(path),
            x,
            y,
            width: default_extent(),
            height: default_extent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SceneCfg {
    pub player: Option<EntityCfg>,
    pub entities: Vec<EntityCfg>,
}

impl Default for SceneCfg {
    fn default() -> Self {
        Self {
            player: Some(EntityCfg::new("assets/characters/hero.png", 256.0, 256.0)),
            entities: vec![
                EntityCfg::new("assets/characters/angel.png", 400.0, 256.0),
                EntityCfg::new("assets/characters/angel.png", 400.0, 400.0),
            ],
        }
    }
}

pub fn parse(s: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(s)
}

/// Missing file means defaults. A broken file is reported and also means defaults.
pub fn load(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config {} ignored: {}", path.display(), e);
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("config {} unreadable: {}", path.display(), e);
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.window.title, "RogueLikeGame");
        assert_eq!(cfg.render.clear_color, [0.10, 0.15, 0.20, 1.0]);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.scene.entities.len(), 2);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse(
            r#"
            [window]
            title = "dungeon"

            [render]
            vsync_mode = "fifo"
            validation = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "dungeon");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.render.vsync_mode, VsyncMode::Fifo);
        assert_eq!(cfg.render.frames_in_flight, 2);

        let vk = cfg.render.to_vk();
        assert_eq!(vk.vsync_mode, VkVsyncMode::Fifo);
        assert!(!vk.validation);
    }

    #[test]
    fn scene_entities_default_to_64px() {
        let cfg = parse(
            r#"
            [scene]
            entities = [{ path = "assets/characters/angel.png", x = 10.0, y = 20.0 }]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scene.entities.len(), 1);
        let e = &cfg.scene.entities[0];
        assert_eq!((e.width, e.height), (64, 64));
        assert_eq!((e.x, e.y), (10.0, 20.0));
        // player untouched by a scene table that does not mention it
        assert!(cfg.scene.player.is_some());
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let cfg = parse("[render]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(cfg.render.to_vk().frames_in_flight, 1);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse("[render]\nvsync_mode = \"sometimes\"\n").is_err());
        assert!(parse("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = load(Path::new("definitely/not/here/rogue.toml"));
        assert_eq!(cfg, AppCfg::default());
    }
}
