// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use trigen_render::{ComputeSettings, FramePacing, PresentMode, RenderSettings, SceneSettings};

/// Each point yields three `u32` indices.
const MAX_POINTS: u32 = u32::MAX / 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compute-generated triangles drawn with Vulkan", long_about = None)]
pub struct Args {
    /// Configuration file; missing means built-in defaults
    #[arg(long, default_value = "trigen.toml")]
    pub config: PathBuf,
    /// Number of points (and triangles) the compute pass generates
    #[arg(long)]
    pub points: Option<u32>,
    /// Fixed seed for the point cloud
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, value_enum)]
    pub present_mode: Option<PresentModeCfg>,
    /// Skip the Khronos validation layer
    #[arg(long)]
    pub no_validation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Immediate,
    Mailbox,
    Fifo,
}

impl From<PresentModeCfg> for PresentMode {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::Immediate => PresentMode::Immediate,
            PresentModeCfg::Mailbox => PresentMode::Mailbox,
            PresentModeCfg::Fifo => PresentMode::Fifo,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePacingCfg {
    #[default]
    QueueIdle,
    InFlight,
}

impl From<FramePacingCfg> for FramePacing {
    fn from(pacing: FramePacingCfg) -> Self {
        match pacing {
            FramePacingCfg::QueueIdle => FramePacing::QueueIdle,
            FramePacingCfg::InFlight => FramePacing::InFlight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: "Vulkan Triangles Compute/Graphics Demo".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeCfg {
    pub point_count: u32,
    pub scale: u32,
    pub seed: Option<u64>,
}

impl Default for ComputeCfg {
    fn default() -> Self {
        Self {
            point_count: 500,
            scale: 50,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub fov_y_degrees: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub compute_offset: [f32; 3],
    pub show_cube: bool,
    pub cube_offset: [f32; 3],
    pub present_mode: PresentModeCfg,
    pub frame_pacing: FramePacingCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.23, 0.9, 1.0],
            fov_y_degrees: 70.0,
            z_near: 0.01,
            z_far: 1000.0,
            compute_offset: [0.0, 0.0, -50.0],
            show_cube: true,
            cube_offset: [0.0, 0.0, -5.0],
            present_mode: PresentModeCfg::default(),
            frame_pacing: FramePacingCfg::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub validation: bool,
    pub log_filter: String,
    pub shader_dir: PathBuf,
    pub window: WindowCfg,
    pub compute: ComputeCfg,
    pub render: RenderCfg,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            log_filter: "info".to_owned(),
            shader_dir: PathBuf::from("shaders"),
            window: WindowCfg::default(),
            compute: ComputeCfg::default(),
            render: RenderCfg::default(),
        }
    }
}

/// Where the configuration came from, for the startup log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// Reads `path`. A missing file yields the defaults; anything else that goes
/// wrong is an error.
pub fn load(path: &Path) -> Result<(AppConfig, ConfigSource)> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let config = parse(&text).with_context(|| format!("invalid config {}", path.display()))?;
            Ok((config, ConfigSource::File(path.to_owned())))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok((AppConfig::default(), ConfigSource::Defaults)),
        Err(e) => Err(e).with_context(|| format!("reading config {}", path.display())),
    }
}

pub fn parse(text: &str) -> Result<AppConfig> {
    Ok(toml::from_str(text)?)
}

impl AppConfig {
    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(points) = args.points {
            self.compute.point_count = points;
        }
        if let Some(seed) = args.seed {
            self.compute.seed = Some(seed);
        }
        if let Some(mode) = args.present_mode {
            self.render.present_mode = mode;
        }
        if args.no_validation {
            self.validation = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.compute.point_count > 0, "compute.point_count must be positive");
        ensure!(
            self.compute.point_count <= MAX_POINTS,
            "compute.point_count ({}) must be at most {MAX_POINTS}",
            self.compute.point_count
        );
        ensure!(self.compute.scale > 0, "compute.scale must be positive");
        ensure!(
            self.render.z_near > 0.0 && self.render.z_near < self.render.z_far,
            "render.z_near ({}) must be positive and below render.z_far ({})",
            self.render.z_near,
            self.render.z_far
        );
        ensure!(
            self.render.fov_y_degrees > 0.0 && self.render.fov_y_degrees < 180.0,
            "render.fov_y_degrees ({}) must be inside (0, 180)",
            self.render.fov_y_degrees
        );
        ensure!(
            self.window.width > 0 && self.window.height > 0,
            "window size must be non-zero"
        );
        Ok(())
    }

    pub fn to_render_settings(&self) -> RenderSettings {
        RenderSettings {
            validation: self.validation,
            present_mode: self.render.present_mode.into(),
            pacing: self.render.frame_pacing.into(),
            shader_dir: self.shader_dir.clone(),
            scene: SceneSettings {
                fov_y_degrees: self.render.fov_y_degrees,
                z_near: self.render.z_near,
                z_far: self.render.z_far,
                compute_offset: self.render.compute_offset,
                cube_offset: self.render.show_cube.then_some(self.render.cube_offset),
            },
            compute: ComputeSettings {
                point_count: self.compute.point_count,
                scale: self.compute.scale,
                seed: self.compute.seed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("trigen").chain(extra.iter().copied()))
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.compute.point_count, 500);
        assert_eq!(config.render.present_mode, PresentModeCfg::Immediate);
        assert_eq!(config.render.frame_pacing, FramePacingCfg::QueueIdle);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            log_filter = "debug"

            [compute]
            point_count = 64
            seed = 9

            [render]
            present_mode = "fifo"
            frame_pacing = "in_flight"
            show_cube = false
            "#,
        )
        .unwrap();
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.compute.point_count, 64);
        assert_eq!(config.compute.scale, 50);
        assert_eq!(config.compute.seed, Some(9));
        assert_eq!(config.render.fov_y_degrees, 70.0);

        let settings = config.to_render_settings();
        assert_eq!(settings.present_mode, PresentMode::Fifo);
        assert_eq!(settings.pacing, FramePacing::InFlight);
        assert_eq!(settings.scene.cube_offset, None);
        assert_eq!(settings.compute.seed, Some(9));
    }

    #[test]
    fn malformed_or_unknown_keys_are_rejected() {
        assert!(parse("[compute]\npoint_count = \"many\"").is_err());
        assert!(parse("[render]\nvsync = true").is_err());
        assert!(parse("[render]\npresent_mode = \"sometimes\"").is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let (config, source) = load(Path::new("definitely/not/here/trigen.toml")).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn cli_flags_override_file_values() {
        let mut config = parse("validation = true\n[compute]\npoint_count = 10").unwrap();
        config.apply_overrides(&args(&[
            "--points",
            "4096",
            "--seed",
            "3",
            "--present-mode",
            "mailbox",
            "--no-validation",
        ]));
        assert_eq!(config.compute.point_count, 4096);
        assert_eq!(config.compute.seed, Some(3));
        assert_eq!(config.render.present_mode, PresentModeCfg::Mailbox);
        assert!(!config.validation);
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let mut config = parse("validation = true").unwrap();
        let before = config.clone();
        config.apply_overrides(&args(&[]));
        assert_eq!(config, before);
    }

    #[test]
    fn validation_rules() {
        assert!(AppConfig::default().validate().is_ok());

        let mut c = AppConfig::default();
        c.compute.point_count = 0;
        assert!(c.validate().is_err());

        let mut c = AppConfig::default();
        c.compute.point_count = 1_431_655_765;
        assert!(c.validate().is_ok());
        c.compute.point_count = 1_431_655_766;
        assert!(c.validate().is_err());

        let mut c = AppConfig::default();
        c.compute.scale = 0;
        assert!(c.validate().is_err());

        let mut c = AppConfig::default();
        c.render.z_near = 10.0;
        c.render.z_far = 1.0;
        assert!(c.validate().is_err());

        let mut c = AppConfig::default();
        c.render.fov_y_degrees = 180.0;
        assert!(c.validate().is_err());
    }
}
