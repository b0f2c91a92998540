// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: a one-shot compute pass generates a triangle cloud which
//! is then drawn every frame, together with an optional cube, through a
//! depth-tested forward pass.

pub mod command;
pub mod compute;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod model;
pub mod pipeline;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

use std::sync::Arc;

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use trigen_render::{FrameOutcome, FramePacing, RenderSettings, RenderSize, Renderer};

use crate::command::CommandRecorder;
use crate::device::Device;
use crate::error::VkResult;
use crate::frame::FrameDirector;
use crate::instance::Instance;
use crate::model::{ComputeModel, StaticModel};
use crate::pipeline::MeshPipeline;
use crate::render_pass::RenderPass;
use crate::renderer::{Draw, SceneRenderer};
use crate::shader::ShaderCompiler;
use crate::surface::Surface;
use crate::swapchain::Swapchain;

pub use crate::error::VkError;

/// Fields drop top to bottom once `Drop` has idled the device, so everything
/// built on the swapchain goes before it and the device goes last.
pub struct VkRenderer {
    scene: SceneRenderer,
    cube: Option<StaticModel>,
    compute: ComputeModel,
    director: FrameDirector,
    recorder: CommandRecorder,
    swapchain: Swapchain,
    render_pass: RenderPass,
    device: Arc<Device>,
    _surface: Arc<Surface>,
    _instance: Arc<Instance>,
    pacing: FramePacing,
    requested: RenderSize,
    slot: usize,
}

impl VkRenderer {
    fn build(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> VkResult<Self> {
        let display_raw = display.display_handle()?.as_raw();
        let window_raw = window.window_handle()?.as_raw();

        let instance = Instance::new(display_raw, settings.validation)?;
        let surface = Surface::new(&instance, display_raw, window_raw)?;
        let device = Device::select(&instance, &surface)?;
        let compiler = ShaderCompiler::new()?;

        let compute = compute::run_once(&device, &compiler, &settings.shader_dir, &settings.compute)?;

        let render_pass = RenderPass::new(&device, &surface)?;
        let swapchain = Swapchain::new(&device, &surface, &render_pass, size, settings.present_mode)?;
        let image_count = swapchain.image_count();
        let recorder = CommandRecorder::new(&device, device.graphics_queue().family, image_count)?;
        let director = FrameDirector::new(&device, image_count)?;

        let cube = match settings.scene.cube_offset {
            Some(_) => Some(StaticModel::cube(&device, &recorder, device.graphics_queue())?),
            None => None,
        };
        let pipeline = MeshPipeline::new(&device, &render_pass, &compiler, &settings.shader_dir)?;
        let scene = SceneRenderer::new(pipeline, settings.scene.clone());

        Ok(Self {
            scene,
            cube,
            compute,
            director,
            recorder,
            swapchain,
            render_pass,
            device,
            _surface: surface,
            _instance: instance,
            pacing: settings.pacing,
            requested: size,
            slot: 0,
        })
    }

    /// Device idle, rebuild the swapchain for `size`, fresh per-slot sync and
    /// command buffers, restart at slot 0.
    fn rebuild(&mut self, size: RenderSize) -> VkResult<()> {
        self.device.wait_idle()?;
        self.swapchain.recreate(&self.render_pass, size)?;
        let count = self.swapchain.image_count();
        if count != self.recorder.len() {
            self.recorder.resize(count)?;
        }
        // Same slot count: keep the director so a slot claimed by a dropped
        // frame is not waited on again.
        if count != self.director.len() {
            self.director = FrameDirector::new(&self.device, count)?;
            self.slot = 0;
        }
        Ok(())
    }

    fn draw_frame(&mut self) -> VkResult<FrameOutcome> {
        let slot = self.director.wait_for_slot(self.slot)?;
        let acquired = self
            .swapchain
            .acquire(self.director.sync(&slot).image_acquired.raw())?;
        let Some(image_index) = acquired else {
            debug!("Swapchain out of date on acquire");
            self.rebuild(self.requested)?;
            return Ok(FrameOutcome::SwapchainRebuilt);
        };
        self.director.ensure_recordable(&slot)?;

        let scene = self.scene.scene();
        let mut draws = vec![Draw {
            model: &self.compute,
            offset: scene.compute_offset,
        }];
        if let (Some(cube), Some(offset)) = (&self.cube, scene.cube_offset) {
            draws.push(Draw { model: cube, offset });
        }
        let framebuffer = self.swapchain.framebuffer(image_index);
        let extent = self.swapchain.extent();
        let render_pass = self.render_pass.raw();
        self.recorder.record(slot.index(), |d, cmd| {
            self.scene.record(d, cmd, render_pass, framebuffer, extent, &draws);
            Ok(())
        })?;

        let needs_rebuild = self.swapchain.submit_and_present(
            self.device.graphics_queue(),
            self.recorder.get(slot.index()),
            self.director.sync(&slot),
            image_index,
            self.pacing == FramePacing::QueueIdle,
        )?;
        self.director.submitted(slot)?;
        self.slot = (self.slot + 1) % self.director.len();

        if needs_rebuild {
            debug!("Swapchain out of date on present");
            self.rebuild(self.requested)?;
            return Ok(FrameOutcome::SwapchainRebuilt);
        }
        Ok(FrameOutcome::Presented)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let r = Self::build(window, display, size, settings).context("Vulkan renderer setup")?;
        let extent = r.swapchain.extent();
        info!(
            "Vulkan renderer ready ({}x{}, {} frame slots)",
            extent.width,
            extent.height,
            r.director.len()
        );
        Ok(r)
    }

    fn size(&self) -> RenderSize {
        let extent = self.swapchain.extent();
        RenderSize {
            width: extent.width,
            height: extent.height,
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            return Ok(());
        }
        self.requested = size;
        self.rebuild(size).context("swapchain recreate")
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        self.draw_frame().context("render frame")
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.scene.set_clear_color(rgba);
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle().context("device wait idle")
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        info!("Freeing renderer");
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Device wait idle failed during teardown: {e}");
        }
    }
}
