//! Camera acquisition control loop.
//!
//! A parent process controls acquisition by writing `<...>` delimited
//! commands to stdin. Frames delivered by the camera driver are handed to
//! the [acquisition::AcquisitionLoop] through a bounded queue, optionally
//! saved as numbered images, and shown in one window per well. Replies to
//! the parent are written to stdout, one line each.

use machine_vision_formats::PixFmt;

pub mod acquisition;
pub mod camera_setup;
pub mod cli_app;
pub mod command_parser;
pub mod command_reader;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod frame_handler;
pub mod replies;
pub mod save;
pub mod session;

/// All frames are displayed and saved in this format, converting if needed.
pub const DISPLAY_FORMAT: PixFmt = PixFmt::Mono8;

pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("camera error: {0}")]
    Camera(#[from] rap_camera::Error),
    #[error("failed to access camera \"{name}\": {source}")]
    CameraOpen {
        name: String,
        #[source]
        source: rap_camera::Error,
    },
    #[error("no cameras accessible")]
    NoCamera,
    #[error("camera does not support a format convertible to {0}")]
    NoDisplayFormat(PixFmt),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("save error: {0}")]
    Save(#[from] save::SaveError),
    #[error("command file \"{}\": {msg}", .path.display())]
    CommandFile {
        path: std::path::PathBuf,
        msg: String,
    },
    #[error("end of command input")]
    EndOfInput,
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{msg}")]
    Other { msg: String },
}

fn _test_error_is_send() {
    // Compile-time test to ensure Error implements Send trait.
    fn implements<T: Send>() {}
    implements::<Error>();
}

impl<'a> From<&'a str> for Error {
    fn from(orig: &'a str) -> Error {
        Error::Other {
            msg: orig.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Error {
        Error::Other { msg }
    }
}
