// SPDX-License-Identifier: CEPL-1.0
//! Polling window for a render loop that owns its own control flow.
//!
//! winit normally drives the application through `run_app`. The demo instead
//! pumps pending events once per frame, so the window wraps the event loop and
//! exposes a GLFW-shaped surface: `poll_events`, `should_close`,
//! `framebuffer_size` and `show`.
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

pub use winit;

// Some platforms need more than one pump before `resumed` fires.
const RESUME_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("event loop: {0}")]
    EventLoop(#[from] EventLoopError),
    #[error("window creation failed: {0}")]
    Os(#[from] OsError),
    #[error("event loop exited with code {0} before the window was created")]
    Exited(i32),
    #[error("platform never resumed the application; no window was created")]
    NotResumed,
}

/// Framebuffer size in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferSize {
    pub width: u32,
    pub height: u32,
}

impl FramebufferSize {
    /// Minimised windows report a zero dimension and cannot back a swapchain.
    pub fn is_renderable(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl From<PhysicalSize<u32>> for FramebufferSize {
    fn from(size: PhysicalSize<u32>) -> Self {
        Self {
            width: size.width,
            height: size.height,
        }
    }
}

struct Launcher {
    attributes: WindowAttributes,
    window: Option<Window>,
    error: Option<OsError>,
}

impl ApplicationHandler for Launcher {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(window),
            Err(e) => self.error = Some(e),
        }
    }

    fn window_event(&mut self, _: &ActiveEventLoop, _: WindowId, _: WindowEvent) {}
}

#[derive(Default)]
struct Events {
    id: Option<WindowId>,
    close_requested: bool,
}

impl ApplicationHandler for Events {
    fn resumed(&mut self, _: &ActiveEventLoop) {}

    fn window_event(&mut self, _: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.id.is_some_and(|id| id != window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Resized → {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }
}

pub struct GameWindow {
    window: Window,
    events: Events,
    event_loop: EventLoop<()>,
}

impl GameWindow {
    /// Creates a hidden, resizable window. Call [`GameWindow::show`] once the
    /// renderer is ready.
    pub fn create(width: u32, height: u32, title: &str) -> Result<Self, WindowError> {
        let mut event_loop = EventLoop::new()?;
        let mut launcher = Launcher {
            attributes: Window::default_attributes()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .with_resizable(true)
                .with_visible(false),
            window: None,
            error: None,
        };

        for _ in 0..RESUME_ATTEMPTS {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::ZERO), &mut launcher)
            {
                return Err(WindowError::Exited(code));
            }
            if let Some(e) = launcher.error.take() {
                return Err(e.into());
            }
            if launcher.window.is_some() {
                break;
            }
        }

        let window = launcher.window.take().ok_or(WindowError::NotResumed)?;
        info!("Created game window {width}x{height} \"{title}\"");
        Ok(Self {
            events: Events {
                id: Some(window.id()),
                close_requested: false,
            },
            window,
            event_loop,
        })
    }

    /// Drains pending events without blocking.
    pub fn poll_events(&mut self) {
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.events)
        {
            debug!("event loop exited with code {code}");
            self.events.close_requested = true;
        }
    }

    pub fn should_close(&self) -> bool {
        self.events.close_requested
    }

    pub fn framebuffer_size(&self) -> FramebufferSize {
        self.window.inner_size().into()
    }

    pub fn show(&self) {
        self.window.set_visible(true);
    }

    /// Source of the raw window and display handles for surface creation.
    pub fn window(&self) -> &Window {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_framebuffer_is_not_renderable() {
        assert!(!FramebufferSize { width: 0, height: 768 }.is_renderable());
        assert!(!FramebufferSize { width: 1024, height: 0 }.is_renderable());
        assert!(FramebufferSize { width: 1, height: 1 }.is_renderable());
    }

    #[test]
    fn physical_size_converts() {
        let size: FramebufferSize = PhysicalSize::new(1024u32, 768u32).into();
        assert_eq!(size, FramebufferSize { width: 1024, height: 768 });
    }
}
