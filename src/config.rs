// =============================================================================
// CONFIGURATION - window, graphics, shader and control settings
// =============================================================================
//
// Read from config.toml. Every key is optional; a missing or unreadable
// file falls back to the defaults below.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    /// Enables the resize -> swapchain rebuild path
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Test".to_string(),
            width: 1600,
            height: 900,
            fullscreen: false,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub acquire_timeout_ns: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames_in_flight: 1,
            acquire_timeout_ns: u64::MAX,
        }
    }
}

/// Precompiled SPIR-V blobs
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/quad.vert.spv"),
            fragment: PathBuf::from("shaders/quad.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on any error
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode; FIFO is substituted at swapchain creation
    /// when the surface does not offer it.
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Never zero; one slot reproduces the single-frame-in-flight behaviour.
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.frames_in_flight.max(1)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "Vulkan Test");
        assert_eq!((config.window.width, config.window.height), (1600, 900));
        assert!(config.window.resizable);
        assert_eq!(config.frames_in_flight(), 1);
        assert_eq!(config.graphics.acquire_timeout_ns, u64::MAX);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 800
            resizable = false

            [graphics]
            present_mode = "FIFO"
            frames_in_flight = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 900);
        assert!(!config.window.resizable);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.frames_in_flight(), 1);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/quad.vert.spv"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = Config::load("does/not/exist/config.toml");
        assert_eq!(config.controls.quit_key, "Escape");
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        let config = Config::parse("[debug]\nlog_level = \"DEBUG\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }

    /// Records warnings so tests can see what a running logger would get.
    struct WarningLog(std::sync::Mutex<Vec<String>>);

    impl log::Log for WarningLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.0.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static WARNINGS: WarningLog = WarningLog(std::sync::Mutex::new(Vec::new()));

    fn install_warning_log() {
        // Only the first call installs; later ones share the same sink.
        let _ = log::set_logger(&WARNINGS);
        log::set_max_level(log::LevelFilter::Warn);
    }

    fn warnings_mentioning(needle: &str) -> usize {
        WARNINGS
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.contains(needle))
            .count()
    }

    #[test]
    fn malformed_file_warns_through_an_installed_logger() {
        install_warning_log();

        let path = std::env::temp_dir().join(format!(
            "quad-renderer-{}-malformed.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();
        let config = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 1600);
        assert!(warnings_mentioning("malformed.toml") >= 1);
    }

    #[test]
    fn unknown_log_level_warns_through_an_installed_logger() {
        install_warning_log();

        let config = Config::parse("[debug]\nlog_level = \"chatty\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
        assert!(warnings_mentioning("chatty") >= 1);
    }
}
