// =============================================================================
// QUAD RENDERER - application shell
// =============================================================================
//
// Opens a window, hands it to the renderer core and pumps the event loop.
//
// EVENT FLOW:
// ┌──────────────────────────────────────────────────────────────────────┐
// │  resumed ─> create window ─> Renderer::new                           │
// │  Resized ─> Renderer::resized (rebuild on next frame)                │
// │  RedrawRequested ─> Renderer::draw_frame                             │
// │  CloseRequested / Backspace / quit key ─> drop renderer ─> exit      │
// └──────────────────────────────────────────────────────────────────────┘
//
// =============================================================================

use anyhow::{Context, Result};
use quad_renderer::config::{Config, DEFAULT_CONFIG_PATH};
use quad_renderer::{FrameStatus, Renderer};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    // The logger comes first so config warnings are not lost.
    let level_from_env = init_logging();
    let config = Config::load(&config_path);
    if !level_from_env {
        log::set_max_level(config.log_level());
    }

    log::info!("Starting quad renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Anything fatal inside a callback ends the loop and surfaces here.
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Start env_logger. Without `RUST_LOG` the level is capped at info until
/// the config says otherwise. Returns whether `RUST_LOG` set the level.
fn init_logging() -> bool {
    let level_from_env = std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .init();
    if !level_from_env {
        log::set_max_level(log::LevelFilter::Info);
    }
    level_from_env
}

/// Backspace always quits; `quit_key` names a winit `KeyCode` variant.
fn is_quit_key(key: KeyCode, quit_key: &str) -> bool {
    key == KeyCode::Backspace || format!("{:?}", key) == quit_key
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters: the renderer must go before the window it draws to.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Config,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            fatal: None,
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;
        Ok(Arc::new(window))
    }

    /// Stop at the frame boundary: tear the renderer down, then leave the loop.
    fn quit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            log::info!("Presented {} frames", renderer.frames_presented());
        }
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:?}", error);
        self.fatal = Some(error);
        self.quit(event_loop);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };

        let size = window.inner_size();
        match Renderer::new(&self.config, &*window, size.width, size.height) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => return self.fail(event_loop, e.context("Failed to initialize Vulkan")),
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.quit(event_loop);
            }

            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(FrameStatus::Presented) | Ok(FrameStatus::Skipped) => {}
                    Err(e) => self.fail(event_loop, e.context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() {
                    return;
                }
                if let PhysicalKey::Code(key) = event.physical_key {
                    if is_quit_key(key, &self.config.controls.quit_key) {
                        log::info!("{:?} pressed, exiting...", key);
                        self.quit(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    /// Continuous redraw.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backspace_always_quits() {
        assert!(is_quit_key(KeyCode::Backspace, "Escape"));
        assert!(is_quit_key(KeyCode::Backspace, ""));
    }

    #[test]
    fn configured_key_quits() {
        assert!(is_quit_key(KeyCode::Escape, "Escape"));
        assert!(is_quit_key(KeyCode::KeyQ, "KeyQ"));
        assert!(!is_quit_key(KeyCode::KeyQ, "Escape"));
        assert!(!is_quit_key(KeyCode::Enter, "Escape"));
    }
}
