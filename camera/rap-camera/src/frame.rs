use std::sync::Arc;

use machine_vision_formats::PixFmt;

use crate::{Error, Result};

/// Receive status of a frame as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    /// Frame could not be filled to the end
    Incomplete,
    /// Frame buffer was too small
    TooSmall,
    /// Frame buffer was invalid
    Invalid,
}

/// Minimum number of bytes per row for `width` pixels of `pixel_format`.
pub(crate) fn min_stride(width: u32, pixel_format: PixFmt) -> usize {
    width as usize * pixel_format.bits_per_pixel() as usize / 8
}

/// An image ready for display or saving.
///
/// The pixel data is reference counted. An image taken from a
/// [DriverFrame] without conversion shares the frame's allocation.
#[derive(Clone)]
pub struct Image {
    width: u32,
    height: u32,
    stride: usize,
    pixel_format: PixFmt,
    data: Arc<Vec<u8>>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("pixel_format", &self.pixel_format)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Image {
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        pixel_format: PixFmt,
        data: Vec<u8>,
    ) -> Result<Self> {
        Self::from_shared(width, height, stride, pixel_format, Arc::new(data))
    }

    fn from_shared(
        width: u32,
        height: u32,
        stride: usize,
        pixel_format: PixFmt,
        data: Arc<Vec<u8>>,
    ) -> Result<Self> {
        let required = stride * height as usize;
        if data.len() < required || stride < min_stride(width, pixel_format) {
            return Err(Error::BufferTooSmall {
                required,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            pixel_format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn stride(&self) -> usize {
        self.stride
    }
    pub fn pixel_format(&self) -> PixFmt {
        self.pixel_format
    }
    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    /// Pixel rows without any stride padding.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let row_len = min_stride(self.width, self.pixel_format);
        self.data
            .chunks(self.stride.max(1))
            .take(self.height as usize)
            .map(move |row| &row[..row_len])
    }

    /// Copy the pixels into a tightly packed buffer.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(
            min_stride(self.width, self.pixel_format) * self.height as usize,
        );
        for row in self.rows() {
            packed.extend_from_slice(row);
        }
        packed
    }

    /// True if this image shares its pixel memory with `frame`.
    pub fn shares_buffer_with(&self, frame: &DriverFrame) -> bool {
        Arc::ptr_eq(&self.data, &frame.buffer)
    }
}

/// A frame buffer owned by the camera driver.
///
/// Frames are lent to a [crate::FrameCallback] and must be handed back to
/// the driver with [crate::FrameRecycler::queue_frame].
pub struct DriverFrame {
    frame_id: u64,
    status: FrameStatus,
    width: u32,
    height: u32,
    stride: usize,
    pixel_format: PixFmt,
    buffer: Arc<Vec<u8>>,
}

impl std::fmt::Debug for DriverFrame {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "DriverFrame {{")?;
        write!(fmt, " frame_id {},", self.frame_id)?;
        write!(fmt, " status {:?},", self.status)?;
        write!(fmt, " {}x{} {},", self.width, self.height, self.pixel_format)?;
        write!(fmt, " buffer.as_ptr() {:p},", self.buffer.as_ptr())?;
        write!(fmt, " buffer.len() {},", self.buffer.len())?;
        write!(fmt, "}}")?;
        Ok(())
    }
}

impl DriverFrame {
    /// Allocate an empty frame buffer of `payload_size` bytes.
    pub fn new(payload_size: usize) -> Self {
        Self {
            frame_id: 0,
            status: FrameStatus::Invalid,
            width: 0,
            height: 0,
            stride: 0,
            pixel_format: PixFmt::Mono8,
            buffer: Arc::new(vec![0u8; payload_size]),
        }
    }

    /// Construct a filled frame from its parts. The stride is the minimum
    /// stride for the given width and pixel format.
    pub fn from_parts(
        frame_id: u64,
        status: FrameStatus,
        width: u32,
        height: u32,
        pixel_format: PixFmt,
        data: Vec<u8>,
    ) -> Result<Self> {
        let stride = min_stride(width, pixel_format);
        let required = stride * height as usize;
        if data.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                actual: data.len(),
            });
        }
        Ok(Self {
            frame_id,
            status,
            width,
            height,
            stride,
            pixel_format,
            buffer: Arc::new(data),
        })
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn status(&self) -> FrameStatus {
        self.status
    }
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.status == FrameStatus::Complete
    }
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }
    #[inline]
    pub fn pixel_format(&self) -> PixFmt {
        self.pixel_format
    }
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..]
    }

    /// View the frame as an image without copying.
    pub fn as_image(&self) -> Result<Image> {
        Image::from_shared(
            self.width,
            self.height,
            self.stride,
            self.pixel_format,
            self.buffer.clone(),
        )
    }

    /// Prepare the frame to be filled by the driver and return the writable
    /// pixel buffer.
    ///
    /// If an [Image] taken with [DriverFrame::as_image] is still alive, the
    /// buffer is copied first so that image is left untouched.
    pub fn refill(
        &mut self,
        frame_id: u64,
        status: FrameStatus,
        width: u32,
        height: u32,
        pixel_format: PixFmt,
    ) -> &mut [u8] {
        let stride = min_stride(width, pixel_format);
        let len = stride * height as usize;
        self.frame_id = frame_id;
        self.status = status;
        self.width = width;
        self.height = height;
        self.stride = stride;
        self.pixel_format = pixel_format;
        let buffer = Arc::make_mut(&mut self.buffer);
        buffer.resize(len, 0);
        &mut buffer[..]
    }
}
