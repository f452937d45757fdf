//! Camera interface used by the acquisition loop.
//!
//! A camera backend provides a [CameraModule] which opens cameras implementing
//! [Camera]. Frames are delivered asynchronously: once
//! [Camera::start_streaming] is called, the backend invokes a
//! [FrameCallback] on its own delivery thread for every captured frame. The
//! callback receives ownership of the [DriverFrame] and must hand it back
//! through the [FrameRecycler] so the backend can refill the buffer.
//!
//! The [sim] module contains a software camera implementing these traits.

use std::path::Path;

use machine_vision_formats as formats;

mod convert;
mod frame;
pub mod sim;

pub use convert::{BasicConverter, PixelConverter};
pub use frame::{DriverFrame, FrameStatus, Image};

// ---------------------------
// errors

pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("feature not present: {0}")]
    FeatureNotPresent(String),
    #[error("Timeout")]
    Timeout,
    #[error("CameraError({msg})")]
    CameraError { msg: String },
    #[error("cannot convert pixel format {from} to {to}")]
    UnsupportedConversion {
        from: formats::PixFmt,
        to: formats::PixFmt,
    },
    #[error("image buffer of {actual} bytes is smaller than the required {required} bytes")]
    BufferTooSmall { required: usize, actual: usize },
    #[error("BackendError({0})")]
    BackendError(#[from] anyhow::Error),
    #[error("io error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

fn _test_error_is_send() {
    // Compile-time test to ensure Error implements Send trait.
    fn implements<T: Send>() {}
    implements::<Error>();
}

impl<'a> From<&'a str> for Error {
    fn from(orig: &'a str) -> Error {
        Error::CameraError {
            msg: orig.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Error {
        Error::CameraError { msg }
    }
}

// ---------------------------
// feature values

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoMode {
    Off,
    Once,
    #[default]
    Continuous,
}

impl AutoMode {
    /// The GenICam enumeration entry name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AutoMode::Off => "Off",
            AutoMode::Once => "Once",
            AutoMode::Continuous => "Continuous",
        }
    }
}

impl std::fmt::Display for AutoMode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        fmt.write_str(self.as_str())
    }
}

/// Maximum number of `is_done` polls while waiting for a command feature.
const COMMAND_DONE_MAX_POLLS: usize = 1000;

// ---------------------------
// CameraModule

/// A module for opening cameras.
pub trait CameraModule: Send {
    type CameraType: Camera;

    fn name(&self) -> &str;
    fn camera_infos(&self) -> Result<Vec<Box<dyn CameraInfo>>>;
    fn camera(&mut self, name: &str) -> Result<Self::CameraType>;

    /// The file extension for settings files loaded with
    /// [Camera::settings_load].
    fn settings_file_extension(&self) -> &str;
}

// ---------------------------
// CameraInfo

pub trait CameraInfo {
    fn name(&self) -> &str;
    fn serial(&self) -> &str;
    fn model(&self) -> &str;
    fn vendor(&self) -> &str;
}

// ---------------------------
// frame delivery

/// Called by the backend once per delivered frame, on the backend's thread.
pub trait FrameCallback: Send {
    /// Process `frame`. Implementations must pass `frame` back to
    /// `driver.queue_frame()` before returning.
    fn on_frame(&mut self, frame: DriverFrame, driver: &dyn FrameRecycler);
}

/// Returns frames to the backend's buffer pool.
pub trait FrameRecycler {
    fn queue_frame(&self, frame: DriverFrame);
}

// ---------------------------
// Camera

pub trait Camera: CameraInfo + Send {
    // ----- start: weakly typed but easier to implement API -----

    fn command_execute(&self, name: &str) -> Result<()>;
    fn command_is_done(&self, name: &str) -> Result<bool>;
    fn feature_bool(&self, name: &str) -> Result<bool>;
    fn feature_bool_set(&self, name: &str, value: bool) -> Result<()>;
    fn feature_enum(&self, name: &str) -> Result<String>;
    fn feature_enum_set(&self, name: &str, value: &str) -> Result<()>;
    fn feature_float(&self, name: &str) -> Result<f64>;
    fn feature_float_set(&self, name: &str, value: f64) -> Result<()>;

    // ----- end: weakly typed but easier to implement API -----

    /// Load all camera settings from a settings file.
    ///
    /// The file format is backend specific; see
    /// [CameraModule::settings_file_extension].
    fn settings_load(&mut self, path: &Path) -> Result<()>;

    // Settings: PixFmt ----------------------------
    fn pixel_format(&self) -> Result<formats::PixFmt>;
    fn possible_pixel_formats(&self) -> Result<Vec<formats::PixFmt>>;
    fn set_pixel_format(&mut self, pixel_format: formats::PixFmt) -> Result<()>;

    // Settings: Exposure Time ----------------------------
    /// value given in microseconds
    fn set_exposure_time(&mut self, value: f64) -> Result<()> {
        self.feature_float_set("ExposureTime", value)
    }

    fn set_exposure_auto(&mut self, value: AutoMode) -> Result<()> {
        self.feature_enum_set("ExposureAuto", value.as_str())
    }

    fn set_balance_white_auto(&mut self, value: AutoMode) -> Result<()> {
        self.feature_enum_set("BalanceWhiteAuto", value.as_str())
    }

    // Settings: Gain ----------------------------
    /// value given in dB
    fn set_gain(&mut self, value: f64) -> Result<()> {
        self.feature_float_set("Gain", value)
    }

    // Settings: AcquisitionFrameRate ----------------------------
    fn set_acquisition_frame_rate_enable(&mut self, value: bool) -> Result<()> {
        self.feature_bool_set("AcquisitionFrameRateEnable", value)
    }

    fn set_acquisition_frame_rate(&mut self, value: f64) -> Result<()> {
        self.feature_float_set("AcquisitionFrameRate", value)
    }

    fn set_software_frame_rate_limit(&mut self, fps_limit: f64) -> Result<()> {
        self.set_acquisition_frame_rate_enable(true)?;
        self.set_acquisition_frame_rate(fps_limit)
    }

    /// Run the GigE packet size negotiation.
    ///
    /// The command is run, polled until done, and run once more.
    fn adjust_packet_size(&mut self) -> Result<()> {
        const NAME: &str = "GVSPAdjustPacketSize";
        self.command_execute(NAME)?;
        let mut polls = 0;
        while !self.command_is_done(NAME)? {
            polls += 1;
            if polls >= COMMAND_DONE_MAX_POLLS {
                return Err(Error::Timeout);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        self.command_execute(NAME)
    }

    // Acquisition ----------------------------

    /// Start asynchronous acquisition with `buffer_count` driver buffers.
    ///
    /// `handler` is moved to the backend's delivery thread and dropped when
    /// streaming stops.
    fn start_streaming(&mut self, handler: Box<dyn FrameCallback>, buffer_count: usize)
    -> Result<()>;

    /// Stop acquisition. Calling this when not streaming is not an error.
    fn stop_streaming(&mut self) -> Result<()>;

    fn is_streaming(&self) -> bool;
}
