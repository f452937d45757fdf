//! A software camera.
//!
//! [SimCamera] renders a moving test pattern into a fixed pool of
//! [DriverFrame] buffers on its own delivery thread and hands each frame to
//! the registered [FrameCallback], just as a hardware backend does from its
//! driver callback. Frames handed back through the [FrameRecycler] return to
//! the pool.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use machine_vision_formats::PixFmt;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    CameraInfo, DriverFrame, Error, FrameCallback, FrameRecycler, FrameStatus, Result,
    frame::min_stride,
};

/// How long the delivery thread waits for a free buffer before checking
/// whether it should stop.
const FREE_BUFFER_WAIT: Duration = Duration::from_millis(50);

/// Configuration of one software camera.
#[derive(Debug, Clone)]
pub struct SimCameraConfig {
    pub name: String,
    pub serial: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    /// Pixel formats the camera offers. The first one is active on open.
    pub pixel_formats: Vec<PixFmt>,
    /// Frame rate used while `AcquisitionFrameRateEnable` is false. Zero
    /// delivers frames as fast as buffers come back.
    pub frame_rate: f64,
    /// Feature names that report [Error::FeatureNotPresent].
    pub unsupported_features: HashSet<String>,
    /// Every n-th frame is delivered with [FrameStatus::Incomplete].
    pub incomplete_every: Option<u64>,
    /// Stop delivering (and drop the callback) after this many frames.
    pub max_frames: Option<u64>,
    /// Number of `command_is_done` polls before a command completes.
    pub command_polls_until_done: u32,
}

impl Default for SimCameraConfig {
    fn default() -> Self {
        Self {
            name: "sim-camera-0".to_string(),
            serial: "SIM0000".to_string(),
            model: "Software camera".to_string(),
            width: 816,
            height: 624,
            pixel_formats: vec![PixFmt::Mono8, PixFmt::RGB8, PixFmt::BayerRG8],
            frame_rate: 30.0,
            unsupported_features: HashSet::new(),
            incomplete_every: None,
            max_frames: None,
            command_polls_until_done: 1,
        }
    }
}

/// Counters shared between a [SimCamera] and its delivery thread.
#[derive(Debug, Default)]
pub struct SimStats {
    pub frames_delivered: AtomicU64,
    pub frames_recycled: AtomicU64,
    pub stream_starts: AtomicU64,
    pub stream_stops: AtomicU64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Bool(bool),
    Float(f64),
    Enum(String),
}

#[derive(Debug, Default)]
struct FeatureStore {
    values: HashMap<String, FeatureValue>,
    commands_run: Vec<String>,
    polls: HashMap<String, u32>,
}

// ---------------------------
// module

/// Opens [SimCamera]s.
pub struct SimModule {
    cameras: Vec<SimCameraConfig>,
}

impl SimModule {
    pub fn new(cameras: Vec<SimCameraConfig>) -> Self {
        Self { cameras }
    }
}

impl Default for SimModule {
    fn default() -> Self {
        Self::new(vec![SimCameraConfig::default()])
    }
}

#[derive(Debug)]
pub struct SimCameraInfo {
    name: String,
    serial: String,
    model: String,
}

impl CameraInfo for SimCameraInfo {
    fn name(&self) -> &str {
        &self.name
    }
    fn serial(&self) -> &str {
        &self.serial
    }
    fn model(&self) -> &str {
        &self.model
    }
    fn vendor(&self) -> &str {
        "rap-camera"
    }
}

impl crate::CameraModule for SimModule {
    type CameraType = SimCamera;

    fn name(&self) -> &str {
        "sim"
    }

    fn camera_infos(&self) -> Result<Vec<Box<dyn CameraInfo>>> {
        Ok(self
            .cameras
            .iter()
            .map(|cfg| {
                let info: Box<dyn CameraInfo> = Box::new(SimCameraInfo {
                    name: cfg.name.clone(),
                    serial: cfg.serial.clone(),
                    model: cfg.model.clone(),
                });
                info
            })
            .collect())
    }

    fn camera(&mut self, name: &str) -> Result<SimCamera> {
        let cfg = self
            .cameras
            .iter()
            .find(|cfg| cfg.name == name)
            .ok_or_else(|| Error::from(format!("no camera named \"{name}\"")))?;
        Ok(SimCamera::new(cfg.clone()))
    }

    fn settings_file_extension(&self) -> &str {
        "xml"
    }
}

// ---------------------------
// camera

struct StreamThread {
    done: Arc<AtomicBool>,
    join_handle: std::thread::JoinHandle<()>,
}

pub struct SimCamera {
    cfg: SimCameraConfig,
    pixel_format: Arc<Mutex<PixFmt>>,
    features: Arc<Mutex<FeatureStore>>,
    loaded_settings: Vec<PathBuf>,
    stats: Arc<SimStats>,
    stream: Option<StreamThread>,
}

fn _test_camera_is_send() {
    // Compile-time test to ensure SimCamera implements Send trait.
    fn implements<T: Send>() {}
    implements::<SimCamera>();
}

impl SimCamera {
    pub fn new(cfg: SimCameraConfig) -> Self {
        let pixel_format = cfg.pixel_formats.first().copied().unwrap_or(PixFmt::Mono8);
        Self {
            cfg,
            pixel_format: Arc::new(Mutex::new(pixel_format)),
            features: Arc::new(Mutex::new(FeatureStore::default())),
            loaded_settings: Vec::new(),
            stats: Arc::new(SimStats::default()),
            stream: None,
        }
    }

    pub fn stats(&self) -> Arc<SimStats> {
        self.stats.clone()
    }

    /// Settings files loaded so far, oldest first.
    pub fn loaded_settings(&self) -> &[PathBuf] {
        &self.loaded_settings
    }

    /// Names of command features executed so far, oldest first.
    pub fn commands_run(&self) -> Vec<String> {
        self.features.lock().commands_run.clone()
    }

    pub fn feature_value(&self, name: &str) -> Option<FeatureValue> {
        self.features.lock().values.get(name).cloned()
    }

    fn check_supported(&self, name: &str) -> Result<()> {
        if self.cfg.unsupported_features.contains(name) {
            Err(Error::FeatureNotPresent(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn get(&self, name: &str) -> Result<FeatureValue> {
        self.check_supported(name)?;
        self.features
            .lock()
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FeatureNotPresent(name.to_string()))
    }

    fn set(&self, name: &str, value: FeatureValue) -> Result<()> {
        self.check_supported(name)?;
        debug!("camera {} set {name} = {value:?}", self.cfg.name);
        self.features.lock().values.insert(name.to_string(), value);
        Ok(())
    }
}

impl CameraInfo for SimCamera {
    fn name(&self) -> &str {
        &self.cfg.name
    }
    fn serial(&self) -> &str {
        &self.cfg.serial
    }
    fn model(&self) -> &str {
        &self.cfg.model
    }
    fn vendor(&self) -> &str {
        "rap-camera"
    }
}

impl crate::Camera for SimCamera {
    fn command_execute(&self, name: &str) -> Result<()> {
        self.check_supported(name)?;
        let mut store = self.features.lock();
        store.commands_run.push(name.to_string());
        store.polls.insert(name.to_string(), 0);
        Ok(())
    }

    fn command_is_done(&self, name: &str) -> Result<bool> {
        self.check_supported(name)?;
        let mut store = self.features.lock();
        let polls = store.polls.entry(name.to_string()).or_insert(0);
        *polls += 1;
        Ok(*polls >= self.cfg.command_polls_until_done)
    }

    fn feature_bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            FeatureValue::Bool(v) => Ok(v),
            other => Err(Error::from(format!("{name} is not boolean: {other:?}"))),
        }
    }

    fn feature_bool_set(&self, name: &str, value: bool) -> Result<()> {
        self.set(name, FeatureValue::Bool(value))
    }

    fn feature_enum(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            FeatureValue::Enum(v) => Ok(v),
            other => Err(Error::from(format!("{name} is not an enum: {other:?}"))),
        }
    }

    fn feature_enum_set(&self, name: &str, value: &str) -> Result<()> {
        self.set(name, FeatureValue::Enum(value.to_string()))
    }

    fn feature_float(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            FeatureValue::Float(v) => Ok(v),
            other => Err(Error::from(format!("{name} is not a float: {other:?}"))),
        }
    }

    fn feature_float_set(&self, name: &str, value: f64) -> Result<()> {
        self.set(name, FeatureValue::Float(value))
    }

    fn settings_load(&mut self, path: &Path) -> Result<()> {
        // The contents are opaque here; reading the file checks it exists.
        let buf = std::fs::read(path)?;
        debug!(
            "camera {} loaded {} bytes of settings from \"{}\"",
            self.cfg.name,
            buf.len(),
            path.display()
        );
        self.loaded_settings.push(path.to_path_buf());
        Ok(())
    }

    fn pixel_format(&self) -> Result<PixFmt> {
        Ok(*self.pixel_format.lock())
    }

    fn possible_pixel_formats(&self) -> Result<Vec<PixFmt>> {
        Ok(self.cfg.pixel_formats.clone())
    }

    fn set_pixel_format(&mut self, pixel_format: PixFmt) -> Result<()> {
        if !self.cfg.pixel_formats.contains(&pixel_format) {
            return Err(Error::from(format!(
                "pixel format {pixel_format} not supported by {}",
                self.cfg.name
            )));
        }
        *self.pixel_format.lock() = pixel_format;
        Ok(())
    }

    fn start_streaming(
        &mut self,
        mut handler: Box<dyn FrameCallback>,
        buffer_count: usize,
    ) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::from("already streaming"));
        }
        let buffer_count = buffer_count.max(1);

        let payload_size = min_stride(self.cfg.width, PixFmt::RGB8) * self.cfg.height as usize;
        let (recycle_tx, recycle_rx) = crossbeam_channel::unbounded();
        for _ in 0..buffer_count {
            recycle_tx
                .send(DriverFrame::new(payload_size))
                .map_err(|e| Error::from(format!("announcing frame: {e}")))?;
        }

        let done = Arc::new(AtomicBool::new(false));
        let delivery = Delivery {
            cfg: self.cfg.clone(),
            pixel_format: self.pixel_format.clone(),
            features: self.features.clone(),
            stats: self.stats.clone(),
            done: done.clone(),
            free_frames: recycle_rx,
        };
        let recycler = PoolRecycler {
            tx: recycle_tx,
            stats: self.stats.clone(),
        };

        let join_handle = std::thread::Builder::new()
            .name(format!("sim-delivery-{}", self.cfg.name))
            .spawn(move || delivery.run(handler.as_mut(), &recycler))?;

        self.stats.stream_starts.fetch_add(1, Ordering::SeqCst);
        self.stream = Some(StreamThread { done, join_handle });
        debug!("camera {} streaming with {buffer_count} buffers", self.cfg.name);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        stream.done.store(true, Ordering::SeqCst);
        let joined = stream.join_handle.join();
        self.stats.stream_stops.fetch_add(1, Ordering::SeqCst);
        match joined {
            Ok(()) => {
                debug!("camera {} stopped streaming", self.cfg.name);
                Ok(())
            }
            Err(_) => {
                error!("delivery thread of camera {} panicked", self.cfg.name);
                Err(Error::from("delivery thread panicked"))
            }
        }
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for SimCamera {
    fn drop(&mut self) {
        if self.stream.is_some() {
            if let Err(e) = crate::Camera::stop_streaming(self) {
                warn!("while dropping camera: {e}");
            }
        }
    }
}

// ---------------------------
// delivery thread

struct PoolRecycler {
    tx: Sender<DriverFrame>,
    stats: Arc<SimStats>,
}

impl FrameRecycler for PoolRecycler {
    fn queue_frame(&self, frame: DriverFrame) {
        self.stats.frames_recycled.fetch_add(1, Ordering::SeqCst);
        // The pool receiver lives as long as the delivery thread.
        let _ = self.tx.send(frame);
    }
}

struct Delivery {
    cfg: SimCameraConfig,
    pixel_format: Arc<Mutex<PixFmt>>,
    features: Arc<Mutex<FeatureStore>>,
    stats: Arc<SimStats>,
    done: Arc<AtomicBool>,
    free_frames: Receiver<DriverFrame>,
}

impl Delivery {
    fn frame_period(&self) -> Option<Duration> {
        let store = self.features.lock();
        let enabled = matches!(
            store.values.get("AcquisitionFrameRateEnable"),
            Some(FeatureValue::Bool(true))
        );
        let rate = match store.values.get("AcquisitionFrameRate") {
            Some(FeatureValue::Float(rate)) if enabled => *rate,
            _ => self.cfg.frame_rate,
        };
        if rate > 0.0 && rate.is_finite() {
            Some(Duration::from_secs_f64(1.0 / rate))
        } else {
            None
        }
    }

    fn run(self, handler: &mut dyn FrameCallback, recycler: &dyn FrameRecycler) {
        let mut fno: u64 = 0;
        let mut next_deadline = Instant::now();
        while !self.done.load(Ordering::SeqCst) {
            if let Some(max) = self.cfg.max_frames {
                if fno >= max {
                    debug!("camera {} delivered all {max} frames", self.cfg.name);
                    break;
                }
            }

            let mut frame = match self.free_frames.recv_timeout(FREE_BUFFER_WAIT) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("camera {} waiting for a free buffer", self.cfg.name);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let status = match self.cfg.incomplete_every {
                Some(n) if n > 0 && (fno + 1) % n == 0 => FrameStatus::Incomplete,
                _ => FrameStatus::Complete,
            };
            let pixel_format = *self.pixel_format.lock();
            let buf = frame.refill(fno, status, self.cfg.width, self.cfg.height, pixel_format);
            render_pattern(buf, fno);

            self.stats.frames_delivered.fetch_add(1, Ordering::SeqCst);
            handler.on_frame(frame, recycler);
            fno += 1;

            if let Some(period) = self.frame_period() {
                next_deadline += period;
                let now = Instant::now();
                if next_deadline > now {
                    std::thread::sleep(next_deadline - now);
                } else {
                    next_deadline = now;
                }
            }
        }
    }
}

/// Diagonal gradient that moves one pixel per frame.
fn render_pattern(buf: &mut [u8], fno: u64) {
    let offset = (fno % 256) as u8;
    for (i, px) in buf.iter_mut().enumerate() {
        *px = (i as u8).wrapping_add(offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Camera, CameraModule};

    struct CountingHandler {
        seen: Arc<AtomicU64>,
    }

    impl FrameCallback for CountingHandler {
        fn on_frame(&mut self, frame: DriverFrame, driver: &dyn FrameRecycler) {
            self.seen.fetch_add(1, Ordering::SeqCst);
            driver.queue_frame(frame);
        }
    }

    fn fast_config() -> SimCameraConfig {
        SimCameraConfig {
            width: 8,
            height: 4,
            frame_rate: 0.0,
            max_frames: Some(25),
            ..Default::default()
        }
    }

    #[test]
    fn module_opens_named_camera() {
        let mut module = SimModule::default();
        let infos = module.camera_infos().unwrap();
        assert_eq!(infos.len(), 1);
        let cam = module.camera(infos[0].name()).unwrap();
        assert_eq!(cam.name(), "sim-camera-0");
        assert!(module.camera("nope").is_err());
    }

    #[test]
    fn delivers_and_recycles_every_frame() {
        let mut cam = SimCamera::new(fast_config());
        let seen = Arc::new(AtomicU64::new(0));
        cam.start_streaming(Box::new(CountingHandler { seen: seen.clone() }), 3)
            .unwrap();
        let stats = cam.stats();
        let t0 = Instant::now();
        while stats.frames_delivered.load(Ordering::SeqCst) < 25 {
            assert!(t0.elapsed() < Duration::from_secs(10));
            std::thread::sleep(Duration::from_millis(1));
        }
        cam.stop_streaming().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 25);
        assert_eq!(stats.frames_recycled.load(Ordering::SeqCst), 25);
        assert_eq!(stats.stream_stops.load(Ordering::SeqCst), 1);
        assert!(!cam.is_streaming());
    }

    #[test]
    fn unsupported_feature_reports_not_present() {
        let mut cfg = fast_config();
        cfg.unsupported_features.insert("BalanceWhiteAuto".into());
        let mut cam = SimCamera::new(cfg);
        assert!(matches!(
            cam.set_balance_white_auto(crate::AutoMode::Continuous),
            Err(Error::FeatureNotPresent(_))
        ));
        cam.set_exposure_auto(crate::AutoMode::Continuous).unwrap();
        assert_eq!(cam.feature_enum("ExposureAuto").unwrap(), "Continuous");
    }

    #[test]
    fn packet_size_adjustment_runs_twice() {
        let mut cfg = fast_config();
        cfg.command_polls_until_done = 3;
        let mut cam = SimCamera::new(cfg);
        cam.adjust_packet_size().unwrap();
        assert_eq!(
            cam.commands_run(),
            vec!["GVSPAdjustPacketSize", "GVSPAdjustPacketSize"]
        );
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let mut cam = SimCamera::new(fast_config());
        let res = cam.settings_load(Path::new("/nonexistent/freerun.xml"));
        assert!(matches!(res, Err(Error::IoError { .. })));
        assert!(cam.loaded_settings().is_empty());
    }
}
