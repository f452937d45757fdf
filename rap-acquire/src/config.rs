//! Configuration file.
//!
//! The configuration is a TOML file. Every field is optional. Path fields
//! may contain shell variables such as `~`, `$A` or `${B}`; relative paths
//! are taken relative to the directory containing the configuration file.
//!
//! ```toml
//! save_root = "~/data/rap"
//! freerun_settings = "config/freerun.xml"
//! trigger_settings = "config/trigger.xml"
//! save_frame_target = 500
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "RAP_ACQUIRE_CONFIG";

/// The configuration error type.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("lookup error on variable: {source}")]
    ShellExpandLookupVarError {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
    #[error("IO error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("TOML deserialization error: {source}")]
    TomlDeError {
        #[from]
        source: toml::de::Error,
    },
    #[error("path is not valid UTF-8: \"{}\"", .0.display())]
    NonUtf8Path(PathBuf),
    #[error("invalid value for {field}: {msg}")]
    InvalidValue { field: &'static str, msg: String },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// The default value for [RapConfig::freerun_settings].
pub const DEFAULT_FREERUN_SETTINGS: &str = "~/RAP/config/freerun.xml";
/// The default value for [RapConfig::trigger_settings].
pub const DEFAULT_TRIGGER_SETTINGS: &str = "~/RAP/config/trigger.xml";
/// The default value for [RapConfig::save_root].
pub const DEFAULT_SAVE_ROOT: &str = "~/data/rap";
/// The default value for [RapConfig::log_file].
pub const DEFAULT_LOG_FILE: &str = "vimba_rap_out.log";

fn default_freerun_settings() -> PathBuf {
    DEFAULT_FREERUN_SETTINGS.into()
}

fn default_trigger_settings() -> PathBuf {
    DEFAULT_TRIGGER_SETTINGS.into()
}

fn default_save_root() -> PathBuf {
    DEFAULT_SAVE_ROOT.into()
}

fn default_auto_folder_name() -> String {
    "temp1".to_string()
}

fn default_save_frame_target() -> u32 {
    1000
}

fn default_image_extension() -> String {
    "tif".to_string()
}

fn default_frame_queue_capacity() -> usize {
    1000
}

fn default_driver_buffer_count() -> usize {
    10
}

fn default_history_len() -> usize {
    3 * 6
}

fn default_diagnostic_interval() -> u64 {
    500
}

fn default_sensor_size() -> [u32; 2] {
    [816, 624]
}

fn default_screen_size() -> [u32; 2] {
    [1920, 1080]
}

fn default_true() -> bool {
    true
}

fn default_command_file() -> PathBuf {
    "RAPcommand.txt".into()
}

fn default_log_file() -> PathBuf {
    DEFAULT_LOG_FILE.into()
}

fn default_start_poll_interval_msec() -> u64 {
    100
}

/// If `path` is relative, make it relative to `dirname`.
///
/// `path` must be utf-8 encoded and can start with a tilde, which is expanded
/// to the home directory.
fn fixup_relative_path(path: &mut PathBuf, dirname: &Path) -> Result<()> {
    let pathstr = path
        .as_os_str()
        .to_str()
        .ok_or_else(|| ConfigError::NonUtf8Path(path.clone()))?;
    let expanded = shellexpand::full(pathstr)?;
    *path = PathBuf::from(expanded.to_string());

    if path.is_relative() {
        *path = dirname.join(&path);
    }
    Ok(())
}

/// Configuration of the acquisition program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RapConfig {
    /// Name of the camera to open. The first camera found if unset.
    pub camera_id: Option<String>,
    /// Settings file loaded at startup and by the `free` and `trigger,false`
    /// commands.
    #[serde(default = "default_freerun_settings")]
    pub freerun_settings: PathBuf,
    /// Settings file loaded by the `trigger,true` command.
    #[serde(default = "default_trigger_settings")]
    pub trigger_settings: PathBuf,
    /// Parent of automatically named save folders.
    #[serde(default = "default_save_root")]
    pub save_root: PathBuf,
    /// First candidate name for automatically named save folders.
    #[serde(default = "default_auto_folder_name")]
    pub auto_folder_name: String,
    /// Number of frames written by one save session.
    #[serde(default = "default_save_frame_target")]
    pub save_frame_target: u32,
    /// Extension, and therefore format, of saved images.
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
    /// Number of frame buffers announced to the driver.
    #[serde(default = "default_driver_buffer_count")]
    pub driver_buffer_count: usize,
    /// Number of recent images kept by the acquisition loop.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// Log every n-th acquired frame. Zero disables.
    #[serde(default = "default_diagnostic_interval")]
    pub diagnostic_interval: u64,
    /// Sensor width and height, used for window layout.
    #[serde(default = "default_sensor_size")]
    pub sensor_size: [u32; 2],
    /// Screen width and height, used for window tiling.
    #[serde(default = "default_screen_size")]
    pub screen_size: [u32; 2],
    /// Skip rendering images.
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Discard input received outside `<...>`.
    #[serde(default)]
    pub strict_delimiters: bool,
    /// File read when `r` is pressed. Its first line is an exposure time in
    /// microseconds.
    #[serde(default = "default_command_file")]
    pub command_file: PathBuf,
    /// Log file, appended to.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// How often the command queue is polled before acquisition starts.
    #[serde(default = "default_start_poll_interval_msec")]
    pub start_poll_interval_msec: u64,
}

impl Default for RapConfig {
    fn default() -> Self {
        Self {
            camera_id: None,
            freerun_settings: default_freerun_settings(),
            trigger_settings: default_trigger_settings(),
            save_root: default_save_root(),
            auto_folder_name: default_auto_folder_name(),
            save_frame_target: default_save_frame_target(),
            image_extension: default_image_extension(),
            frame_queue_capacity: default_frame_queue_capacity(),
            driver_buffer_count: default_driver_buffer_count(),
            history_len: default_history_len(),
            diagnostic_interval: default_diagnostic_interval(),
            sensor_size: default_sensor_size(),
            screen_size: default_screen_size(),
            headless: default_true(),
            strict_delimiters: false,
            command_file: default_command_file(),
            log_file: default_log_file(),
            start_poll_interval_msec: default_start_poll_interval_msec(),
        }
    }
}

impl RapConfig {
    /// Expand shell variables in all paths and resolve relative ones against
    /// `dirname`.
    pub fn fixup_relative_paths(&mut self, dirname: &Path) -> Result<()> {
        fixup_relative_path(&mut self.freerun_settings, dirname)?;
        fixup_relative_path(&mut self.trigger_settings, dirname)?;
        fixup_relative_path(&mut self.save_root, dirname)?;
        fixup_relative_path(&mut self.command_file, dirname)?;
        fixup_relative_path(&mut self.log_file, dirname)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.auto_folder_name.is_empty()
            || self.auto_folder_name.contains(['/', '\\'])
        {
            return Err(ConfigError::InvalidValue {
                field: "auto_folder_name",
                msg: format!("\"{}\" is not a plain folder name", self.auto_folder_name),
            });
        }
        if self.image_extension.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "image_extension",
                msg: "must not be empty".into(),
            });
        }
        if self.sensor_size.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "sensor_size",
                msg: "width and height must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn sensor_size(&self) -> (u32, u32) {
        (self.sensor_size[0], self.sensor_size[1])
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_size[0], self.screen_size[1])
    }

    pub fn start_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.start_poll_interval_msec.max(1))
    }
}

/// Split `path` into directory and filename component.
fn split_path<P: AsRef<Path>>(path: P) -> (PathBuf, PathBuf) {
    let path = path.as_ref();
    let mut components = path.components();
    let filename = components
        .next_back()
        .map(|c| c.as_os_str().into())
        .unwrap_or_default();
    let dirname = components.as_path().into();
    (dirname, filename)
}

/// Parse a configuration from TOML text. Relative paths resolve against
/// `dirname`.
pub fn parse_config_str(text: &str, dirname: &Path) -> Result<RapConfig> {
    let mut cfg: RapConfig = toml::from_str(text)?;
    cfg.fixup_relative_paths(dirname)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read and parse a configuration file.
pub fn parse_config_file<P: AsRef<Path>>(fname: P) -> Result<RapConfig> {
    let text = std::fs::read_to_string(fname.as_ref())?;
    let (dirname, _) = split_path(fname.as_ref());
    parse_config_str(&text, &dirname)
}

/// Load the configuration named by [CONFIG_ENV_VAR], or the defaults if it
/// is unset.
pub fn load_config() -> Result<RapConfig> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(fname) => {
            tracing::debug!("reading configuration from {fname:?}");
            parse_config_file(PathBuf::from(fname))
        }
        None => {
            let cwd = std::env::current_dir()?;
            let mut cfg = RapConfig::default();
            cfg.fixup_relative_paths(&cwd)?;
            Ok(cfg)
        }
    }
}
