//! Display windows, one per well.

use rap_camera::Image;
use tracing::{debug, trace};

use crate::Result;

/// Key code returned by [DisplaySurface::poll_key] for Enter.
pub const KEY_ENTER: i32 = 13;
/// Key code for `r`.
pub const KEY_RELOAD: i32 = b'r' as i32;

/// Column offset of the 24-well grid.
const GRID_X0: i32 = 1600;
const GRID_DX: i32 = 280;
const GRID_DY: i32 = 230;
const GRID_ROWS: u32 = 4;
const GRID_COLS: u32 = 6;

/// A window system.
pub trait DisplaySurface {
    fn create_window(&mut self, title: &str) -> Result<()>;
    fn move_window(&mut self, title: &str, x: i32, y: i32) -> Result<()>;
    fn resize_window(&mut self, title: &str, width: u32, height: u32) -> Result<()>;
    fn destroy_all(&mut self) -> Result<()>;
    fn show(&mut self, title: &str, image: &Image) -> Result<()>;
    /// Key pressed since the last call, if any. Waits at most about a
    /// millisecond.
    fn poll_key(&mut self) -> Option<i32>;
}

/// Title of the window showing well `index`.
pub fn window_title(index: u32) -> String {
    format!("Well '{index}'.")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlacement {
    pub title: String,
    pub x: i32,
    pub y: i32,
}

/// Initial window positions for `wells` wells.
///
/// 24 wells are arranged in a 4x6 grid. Fewer wells alternate between two
/// rows, stepping one sensor width to the right every third well.
pub fn window_layout(wells: u32, sensor_size: (u32, u32)) -> Vec<WindowPlacement> {
    let (sensor_w, sensor_h) = (sensor_size.0 as i32, sensor_size.1 as i32);
    if wells == GRID_ROWS * GRID_COLS {
        (0..GRID_ROWS)
            .flat_map(|i| (0..GRID_COLS).map(move |j| (i, j)))
            .enumerate()
            .map(|(c, (i, j))| WindowPlacement {
                title: window_title(c as u32),
                x: j as i32 * GRID_DX + GRID_X0,
                y: i as i32 * GRID_DY,
            })
            .collect()
    } else {
        (0..wells)
            .map(|w| {
                let xi = (w % 2) as i32;
                let yi = ((w / 3) % 2) as i32;
                WindowPlacement {
                    title: window_title(w),
                    x: yi * sensor_w,
                    y: xi * sensor_h,
                }
            })
            .collect()
    }
}

/// Create and place the windows for `wells` wells. Returns their titles.
pub fn setup_windows<D: DisplaySurface + ?Sized>(
    display: &mut D,
    wells: u32,
    sensor_size: (u32, u32),
) -> Result<Vec<String>> {
    let mut titles = Vec::with_capacity(wells as usize);
    for placement in window_layout(wells, sensor_size) {
        display.create_window(&placement.title)?;
        display.move_window(&placement.title, placement.x, placement.y)?;
        titles.push(placement.title);
    }
    debug!("created {} display windows", titles.len());
    Ok(titles)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGeometry {
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Window geometry for tiling `wells` windows, each `tile_width` pixels
/// wide, left to right and wrapping at the screen width.
///
/// Returns an empty layout for a zero tile width.
pub fn tile_layout(
    wells: u32,
    tile_width: u32,
    sensor_size: (u32, u32),
    screen_size: (u32, u32),
) -> Vec<TileGeometry> {
    if tile_width == 0 || sensor_size.0 == 0 {
        return Vec::new();
    }
    let width = tile_width;
    let height = (u64::from(sensor_size.1) * u64::from(tile_width) / u64::from(sensor_size.0)) as u32;
    let (mut x, mut y) = (0i64, 0i64);
    let mut tiles = Vec::with_capacity(wells as usize);
    for w in 0..wells {
        tiles.push(TileGeometry {
            title: window_title(w),
            x: x as i32,
            y: y as i32,
            width,
            height,
        });
        x += i64::from(width);
        if x + i64::from(width) > i64::from(screen_size.0) {
            x = 0;
            y += i64::from(height);
        }
    }
    tiles
}

/// Resize and move every well window according to [tile_layout].
pub fn apply_tiles<D: DisplaySurface + ?Sized>(display: &mut D, tiles: &[TileGeometry]) -> Result<()> {
    for tile in tiles {
        display.resize_window(&tile.title, tile.width, tile.height)?;
        display.move_window(&tile.title, tile.x, tile.y)?;
    }
    Ok(())
}

/// A display without a window system. Window operations are logged.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    windows: Vec<String>,
    frames_shown: u64,
}

impl HeadlessDisplay {
    pub fn windows(&self) -> &[String] {
        &self.windows
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }
}

impl DisplaySurface for HeadlessDisplay {
    fn create_window(&mut self, title: &str) -> Result<()> {
        debug!("create window {title}");
        if !self.windows.iter().any(|w| w == title) {
            self.windows.push(title.to_string());
        }
        Ok(())
    }

    fn move_window(&mut self, title: &str, x: i32, y: i32) -> Result<()> {
        debug!("move window {title} to ({x}, {y})");
        Ok(())
    }

    fn resize_window(&mut self, title: &str, width: u32, height: u32) -> Result<()> {
        debug!("resize window {title} to {width}x{height}");
        Ok(())
    }

    fn destroy_all(&mut self) -> Result<()> {
        debug!("destroy {} windows", self.windows.len());
        self.windows.clear();
        Ok(())
    }

    fn show(&mut self, title: &str, image: &Image) -> Result<()> {
        trace!("show {}x{} image in {title}", image.width(), image.height());
        self.frames_shown += 1;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<i32> {
        None
    }
}
