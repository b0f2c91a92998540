// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Preferred presentation mode. FIFO is the fallback whenever the surface
/// does not offer the preferred one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentMode {
    #[default]
    Immediate,
    Mailbox,
    Fifo,
}

/// How far the host may run ahead of the GPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePacing {
    /// Wait for the graphics queue to go idle after every submit.
    #[default]
    QueueIdle,
    /// Rely on the per-slot fences only; up to one frame per swapchain image in flight.
    InFlight,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneSettings {
    pub fov_y_degrees: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub compute_offset: [f32; 3],
    /// `None` skips the cube.
    pub cube_offset: Option<[f32; 3]>,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            fov_y_degrees: 70.0,
            z_near: 0.01,
            z_far: 1000.0,
            compute_offset: [0.0, 0.0, -50.0],
            cube_offset: Some([0.0, 0.0, -5.0]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeSettings {
    pub point_count: u32,
    /// Coordinates are drawn from `[-scale, scale)`.
    pub scale: u32,
    pub seed: Option<u64>,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            point_count: 500,
            scale: 50,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub validation: bool,
    pub present_mode: PresentMode,
    pub pacing: FramePacing,
    pub shader_dir: PathBuf,
    pub scene: SceneSettings,
    pub compute: ComputeSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            present_mode: PresentMode::default(),
            pacing: FramePacing::default(),
            shader_dir: PathBuf::from("shaders"),
            scene: SceneSettings::default(),
            compute: ComputeSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The surface went out of date; the swapchain was rebuilt and the frame dropped or
    /// presented on the old chain.
    SwapchainRebuilt,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Current swapchain extent.
    fn size(&self) -> RenderSize;
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn wait_idle(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sizes() {
        assert!(RenderSize { width: 0, height: 1 }.is_empty());
        assert!(!RenderSize { width: 1024, height: 768 }.is_empty());
    }

    #[test]
    fn defaults_match_demo_scene() {
        let s = RenderSettings::default();
        assert_eq!(s.compute.point_count, 500);
        assert_eq!(s.compute.scale, 50);
        assert_eq!(s.scene.compute_offset, [0.0, 0.0, -50.0]);
        assert_eq!(s.present_mode, PresentMode::Immediate);
        assert_eq!(s.pacing, FramePacing::QueueIdle);
        assert_eq!(s.shader_dir, PathBuf::from("shaders"));
    }
}
