// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};

use trigen_core::init_tracing;
use trigen_platform::{FramebufferSize, GameWindow};
use trigen_render::{FrameOutcome, RenderSize, Renderer};
use trigen_render_vk::VkRenderer;

use config::{AppConfig, Args, ConfigSource};

// Sleep between polls while minimised instead of spinning.
const IDLE_POLL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameAction {
    /// Zero-sized framebuffer; nothing can be presented.
    Skip,
    /// The framebuffer no longer matches the last size handed to the renderer.
    Resize(RenderSize),
    Draw,
}

fn frame_action(size: FramebufferSize, requested: RenderSize) -> FrameAction {
    if !size.is_renderable() {
        return FrameAction::Skip;
    }
    let size = RenderSize {
        width: size.width,
        height: size.height,
    };
    if size != requested {
        FrameAction::Resize(size)
    } else {
        FrameAction::Draw
    }
}

/// Counts presented frames and reports the count roughly once per second.
struct FrameCounter {
    frames: u32,
    total: u64,
    since: Instant,
}

impl FrameCounter {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            total: 0,
            since: now,
        }
    }

    /// Returns the frames of the last window once a second has passed.
    fn frame(&mut self, now: Instant) -> Option<u32> {
        self.frames = self.frames.saturating_add(1);
        self.total += 1;
        if now.duration_since(self.since) >= Duration::from_secs(1) {
            let frames = self.frames;
            self.frames = 0;
            self.since = now;
            Some(frames)
        } else {
            None
        }
    }
}

struct LoopState {
    requested: RenderSize,
    counter: FrameCounter,
}

fn tick<R: Renderer>(window: &mut GameWindow, renderer: &mut R, state: &mut LoopState) -> Result<LoopControl> {
    window.poll_events();
    if window.should_close() {
        return Ok(LoopControl::Exit);
    }

    match frame_action(window.framebuffer_size(), state.requested) {
        FrameAction::Skip => {
            std::thread::sleep(IDLE_POLL);
            return Ok(LoopControl::Continue);
        }
        FrameAction::Resize(size) => {
            info!("Framebuffer resized to {}x{}", size.width, size.height);
            renderer.resize(size)?;
            state.requested = size;
        }
        FrameAction::Draw => {}
    }

    match renderer.render()? {
        FrameOutcome::Presented => {
            if let Some(fps) = state.counter.frame(Instant::now()) {
                debug!("fps ~ {fps}");
            }
        }
        FrameOutcome::SwapchainRebuilt => debug!("Frame dropped for swapchain rebuild"),
    }
    Ok(LoopControl::Continue)
}

fn run(config: &AppConfig) -> Result<()> {
    let mut window = GameWindow::create(config.window.width, config.window.height, &config.window.title)
        .context("window creation")?;
    let fb = window.framebuffer_size();
    let size = RenderSize {
        width: fb.width.max(1),
        height: fb.height.max(1),
    };

    let settings = config.to_render_settings();
    let mut renderer = VkRenderer::new(window.window(), window.window(), size, &settings)?;
    renderer.set_clear_color(config.render.clear_color);
    let drawn = renderer.size();
    info!("Renderer ready at {}x{}", drawn.width, drawn.height);
    window.show();
    info!("Entering main loop");

    let mut state = LoopState {
        requested: size,
        counter: FrameCounter::new(Instant::now()),
    };
    while tick(&mut window, &mut renderer, &mut state)? == LoopControl::Continue {}

    info!("Leaving main loop after {} frames", state.counter.total);
    renderer.wait_idle()?;
    drop(renderer);
    info!("Closing window");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut config, source) = config::load(&args.config)?;
    config.apply_overrides(&args);
    init_tracing(&config.log_filter);
    match &source {
        ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
        ConfigSource::Defaults => info!("No config at {}, using defaults", args.config.display()),
    }
    config.validate()?;

    run(&config).inspect_err(|e| error!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUESTED: RenderSize = RenderSize {
        width: 1024,
        height: 768,
    };

    #[test]
    fn minimised_window_skips_the_frame() {
        let zero = FramebufferSize { width: 0, height: 0 };
        assert_eq!(frame_action(zero, REQUESTED), FrameAction::Skip);
        let flat = FramebufferSize { width: 1024, height: 0 };
        assert_eq!(frame_action(flat, REQUESTED), FrameAction::Skip);
    }

    #[test]
    fn changed_size_requests_a_resize() {
        let fb = FramebufferSize { width: 800, height: 600 };
        assert_eq!(
            frame_action(fb, REQUESTED),
            FrameAction::Resize(RenderSize { width: 800, height: 600 })
        );
    }

    #[test]
    fn unchanged_size_draws() {
        let fb = FramebufferSize { width: 1024, height: 768 };
        assert_eq!(frame_action(fb, REQUESTED), FrameAction::Draw);
    }

    #[test]
    fn counter_reports_once_per_second() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);
        assert_eq!(counter.frame(start + Duration::from_millis(100)), None);
        assert_eq!(counter.frame(start + Duration::from_millis(500)), None);
        assert_eq!(counter.frame(start + Duration::from_millis(1000)), Some(3));
        assert_eq!(counter.frame(start + Duration::from_millis(1500)), None);
        assert_eq!(counter.total, 4);
    }
}
