use machine_vision_formats::PixFmt;

use crate::{DriverFrame, Error, Image, Result, frame::min_stride};

/// Pixel format conversion capability.
pub trait PixelConverter: Send {
    /// Formats that frames in `from` can be converted to.
    fn convertible_formats(&self, from: PixFmt) -> Vec<PixFmt>;

    /// Convert `frame` to `to`, allocating a new image which does not share
    /// memory with the frame.
    fn convert(&self, frame: &DriverFrame, to: PixFmt) -> Result<Image>;
}

/// Plain CPU conversions between 8 bit formats.
///
/// Bayer mosaics are converted to Mono8 by taking the raw sensor values as
/// intensities.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicConverter;

fn is_bayer8(fmt: PixFmt) -> bool {
    matches!(
        fmt,
        PixFmt::BayerRG8 | PixFmt::BayerBG8 | PixFmt::BayerGB8 | PixFmt::BayerGR8
    )
}

/// ITU-R BT.601 luma with integer weights summing to 256.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

impl PixelConverter for BasicConverter {
    fn convertible_formats(&self, from: PixFmt) -> Vec<PixFmt> {
        match from {
            PixFmt::Mono8 => vec![PixFmt::Mono8, PixFmt::RGB8],
            PixFmt::RGB8 => vec![PixFmt::RGB8, PixFmt::Mono8],
            fmt if is_bayer8(fmt) => vec![fmt, PixFmt::Mono8],
            _ => vec![],
        }
    }

    fn convert(&self, frame: &DriverFrame, to: PixFmt) -> Result<Image> {
        let from = frame.pixel_format();
        let (width, height) = (frame.width(), frame.height());
        let rows = frame
            .buffer()
            .chunks(frame.stride().max(1))
            .take(height as usize);

        let dest_stride = min_stride(width, to);
        let mut dest = Vec::with_capacity(dest_stride * height as usize);

        match (from, to) {
            (a, b) if a == b => {
                let row_len = min_stride(width, from);
                for row in rows {
                    dest.extend_from_slice(&row[..row_len]);
                }
            }
            (PixFmt::RGB8, PixFmt::Mono8) => {
                for row in rows {
                    dest.extend(
                        row[..width as usize * 3]
                            .chunks_exact(3)
                            .map(|px| luma(px[0], px[1], px[2])),
                    );
                }
            }
            (src, PixFmt::Mono8) if is_bayer8(src) => {
                for row in rows {
                    dest.extend_from_slice(&row[..width as usize]);
                }
            }
            (PixFmt::Mono8, PixFmt::RGB8) => {
                for row in rows {
                    for &v in &row[..width as usize] {
                        dest.extend_from_slice(&[v, v, v]);
                    }
                }
            }
            (from, to) => {
                return Err(Error::UnsupportedConversion { from, to });
            }
        }

        Image::new(width, height, dest_stride, to, dest)
    }
}
