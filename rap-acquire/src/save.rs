//! Writing saved frames to disk.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use machine_vision_formats::PixFmt;
use rap_camera::Image;
use regex::Regex;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum SaveError {
    #[error("IO error on \"{}\": {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing image \"{}\": {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot save images with pixel format {0}")]
    UnsupportedPixelFormat(PixFmt),
    #[error("cannot derive a folder name from \"{}\"", .0.display())]
    InvalidFolderName(PathBuf),
}

pub type Result<T> = std::result::Result<T, SaveError>;

lazy_static! {
    static ref TRAILING_NUMBER: Regex = Regex::new(r"^(.*?)([0-9]+)$").unwrap();
}

/// The candidate to try after `name` already exists: `file4` becomes
/// `file5`, `file` becomes `file1`.
pub fn next_folder_name(name: &str) -> String {
    if let Some(caps) = TRAILING_NUMBER.captures(name) {
        if let Some(n) = caps[2].parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
            return format!("{}{}", &caps[1], n);
        }
    }
    format!("{name}1")
}

/// Create a new folder at `path`, or at the next free numbered variant of
/// it.
///
/// Every candidate is created with [std::fs::create_dir], so a folder made
/// concurrently by someone else is skipped rather than reused. Existing
/// folders are never touched.
pub fn create_numbered_folder(path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| SaveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut candidate = path.to_path_buf();
    loop {
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                debug!("created folder \"{}\"", candidate.display());
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let name = candidate
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| SaveError::InvalidFolderName(candidate.clone()))?;
                candidate = candidate.with_file_name(next_folder_name(name));
            }
            Err(source) => {
                return Err(SaveError::Io {
                    path: candidate,
                    source,
                });
            }
        }
    }
}

/// Make sure an explicitly requested save directory exists.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| SaveError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `img000000042.tif` for sequence 42 and extension `tif`.
pub fn image_file_name(seq: u64, extension: &str) -> String {
    format!("img{seq:09}.{extension}")
}

/// Write `image` into `dir`. The file format follows `extension`.
pub fn write_image(dir: &Path, seq: u64, extension: &str, image: &Image) -> Result<PathBuf> {
    let color = match image.pixel_format() {
        PixFmt::Mono8 => image::ColorType::L8,
        PixFmt::RGB8 => image::ColorType::Rgb8,
        other => return Err(SaveError::UnsupportedPixelFormat(other)),
    };
    let path = dir.join(image_file_name(seq, extension));
    let packed = image.to_packed();
    image::save_buffer(&path, &packed, image.width(), image.height(), color).map_err(
        |source| SaveError::Image {
            path: path.clone(),
            source,
        },
    )?;
    Ok(path)
}
