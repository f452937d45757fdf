//! Hand-off of frames from the camera driver to the acquisition loop.
//!
//! [FrameHandler] runs on the driver's delivery thread. It turns each
//! complete frame into a display-format [Image], numbers it and pushes it
//! into a bounded channel, blocking while the channel is full. Every frame,
//! complete or not, is handed back to the driver before `on_frame` returns.
//! [FrameReceiver] is the consuming end, owned by the acquisition loop.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crossbeam_channel::{Receiver, Sender};
use machine_vision_formats::PixFmt;
use rap_camera::{DriverFrame, FrameCallback, FrameRecycler, Image, PixelConverter};
use tracing::{debug, error, info, warn};

/// An image taken from the frame queue.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub image: Image,
    /// Sequence number of this image.
    pub delivered: u64,
    /// Sequence number of the newest image pushed so far.
    pub latest: u64,
}

impl Delivered {
    /// Number of images queued behind this one.
    pub fn backlog(&self) -> u64 {
        self.latest.saturating_sub(self.delivered)
    }
}

/// Settings for [frame_channel].
#[derive(Debug, Clone)]
pub struct FrameChannelConfig {
    pub display_format: PixFmt,
    pub capacity: usize,
    /// Log every n-th frame. Zero disables.
    pub diagnostic_interval: u64,
    pub camera_name: String,
}

/// Create the producer and consumer ends of the frame queue.
pub fn frame_channel(
    converter: Box<dyn PixelConverter>,
    cfg: FrameChannelConfig,
) -> (FrameHandler, FrameReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(cfg.capacity.max(1));
    let latest = Arc::new(AtomicU64::new(0));
    let handler = FrameHandler {
        tx,
        latest: latest.clone(),
        converter,
        n_complete: 0,
        cfg,
    };
    (handler, FrameReceiver { rx, latest })
}

pub struct FrameHandler {
    tx: Sender<(Image, u64)>,
    latest: Arc<AtomicU64>,
    converter: Box<dyn PixelConverter>,
    n_complete: u64,
    cfg: FrameChannelConfig,
}

impl FrameHandler {
    fn to_display_image(&self, frame: &DriverFrame) -> rap_camera::Result<Image> {
        if frame.pixel_format() == self.cfg.display_format {
            frame.as_image()
        } else {
            self.converter.convert(frame, self.cfg.display_format)
        }
    }
}

impl FrameCallback for FrameHandler {
    fn on_frame(&mut self, frame: DriverFrame, driver: &dyn FrameRecycler) {
        if !frame.is_complete() {
            debug!(
                frame_id = frame.frame_id(),
                "skipping frame with status {:?}",
                frame.status()
            );
            driver.queue_frame(frame);
            return;
        }

        if self.tx.is_full() {
            warn!(capacity = self.cfg.capacity, "frame queue full");
        }
        let interval = self.cfg.diagnostic_interval;
        if interval > 0 && self.n_complete % interval == 0 {
            info!(
                frame_id = frame.frame_id(),
                "{} acquired {}x{} {} frame",
                self.cfg.camera_name,
                frame.width(),
                frame.height(),
                frame.pixel_format()
            );
        }
        self.n_complete += 1;

        match self.to_display_image(&frame) {
            Ok(image) => {
                let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
                if self.tx.send((image, seq)).is_err() {
                    debug!(seq, "frame receiver gone, dropping image");
                }
            }
            Err(e) => {
                error!(frame_id = frame.frame_id(), "converting frame: {e}");
            }
        }

        driver.queue_frame(frame);
    }
}

/// Consuming end of the frame queue.
pub struct FrameReceiver {
    rx: Receiver<(Image, u64)>,
    latest: Arc<AtomicU64>,
}

impl FrameReceiver {
    /// Wait for the next image. Returns `None` once the handler is gone and
    /// the queue is drained.
    pub fn recv(&self) -> Option<Delivered> {
        let (image, delivered) = self.rx.recv().ok()?;
        Some(self.delivered(image, delivered))
    }

    fn delivered(&self, image: Image, delivered: u64) -> Delivered {
        Delivered {
            image,
            delivered,
            latest: self.latest.load(Ordering::SeqCst),
        }
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::atomic::AtomicUsize;

    use rap_camera::{BasicConverter, FrameStatus};
    use tracing_test::traced_test;

    use super::*;

    /// Records the buffer address of every recycled frame.
    #[derive(Default)]
    struct Recorder {
        recycled: RefCell<Vec<(u64, *const u8)>>,
    }

    impl FrameRecycler for Recorder {
        fn queue_frame(&self, frame: DriverFrame) {
            self.recycled
                .borrow_mut()
                .push((frame.frame_id(), frame.buffer().as_ptr()));
        }
    }

    /// Counts conversions, delegating to [BasicConverter].
    struct CountingConverter(Arc<AtomicUsize>);

    impl PixelConverter for CountingConverter {
        fn convertible_formats(&self, from: PixFmt) -> Vec<PixFmt> {
            BasicConverter.convertible_formats(from)
        }
        fn convert(&self, frame: &DriverFrame, to: PixFmt) -> rap_camera::Result<Image> {
            self.0.fetch_add(1, Ordering::SeqCst);
            BasicConverter.convert(frame, to)
        }
    }

    fn setup(capacity: usize) -> (FrameHandler, FrameReceiver, Arc<AtomicUsize>) {
        let conversions = Arc::new(AtomicUsize::new(0));
        let (handler, receiver) = frame_channel(
            Box::new(CountingConverter(conversions.clone())),
            FrameChannelConfig {
                display_format: PixFmt::Mono8,
                capacity,
                diagnostic_interval: 500,
                camera_name: "test-cam".into(),
            },
        );
        (handler, receiver, conversions)
    }

    fn frame(id: u64, status: FrameStatus, fmt: PixFmt) -> DriverFrame {
        let bpp = usize::from(fmt.bits_per_pixel()) / 8;
        DriverFrame::from_parts(id, status, 4, 2, fmt, vec![100; 8 * bpp]).unwrap()
    }

    #[test]
    fn display_format_is_zero_copy() {
        let (mut handler, receiver, conversions) = setup(10);
        let recorder = Recorder::default();
        let f = frame(7, FrameStatus::Complete, PixFmt::Mono8);
        let ptr = f.buffer().as_ptr();

        handler.on_frame(f, &recorder);

        let got = receiver.recv().unwrap();
        assert_eq!(conversions.load(Ordering::SeqCst), 0);
        assert_eq!(got.image.data().as_ptr(), ptr);
        assert_eq!((got.delivered, got.latest), (1, 1));
        assert_eq!(*recorder.recycled.borrow(), vec![(7, ptr)]);
    }

    #[test]
    fn other_format_is_converted_once() {
        let (mut handler, receiver, conversions) = setup(10);
        let recorder = Recorder::default();
        let f = frame(3, FrameStatus::Complete, PixFmt::RGB8);
        let ptr = f.buffer().as_ptr();

        handler.on_frame(f, &recorder);

        let got = receiver.recv().unwrap();
        assert_eq!(conversions.load(Ordering::SeqCst), 1);
        assert_eq!(got.image.pixel_format(), PixFmt::Mono8);
        assert_ne!(got.image.data().as_ptr(), ptr);
        // the original frame is the one handed back
        assert_eq!(*recorder.recycled.borrow(), vec![(3, ptr)]);
    }

    #[test]
    fn incomplete_frame_is_recycled_not_queued() {
        let (mut handler, receiver, conversions) = setup(10);
        let recorder = Recorder::default();

        handler.on_frame(frame(1, FrameStatus::Incomplete, PixFmt::Mono8), &recorder);

        assert!(receiver.is_empty());
        assert_eq!(receiver.latest(), 0);
        assert_eq!(conversions.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.recycled.borrow().len(), 1);
    }

    #[test]
    fn sequence_numbers_increase() {
        let (mut handler, receiver, _) = setup(10);
        let recorder = Recorder::default();
        for id in 0..3 {
            handler.on_frame(frame(id, FrameStatus::Complete, PixFmt::Mono8), &recorder);
        }
        let first = receiver.recv().unwrap();
        assert_eq!((first.delivered, first.latest), (1, 3));
        assert_eq!(first.backlog(), 2);
        assert_eq!(receiver.recv().unwrap().delivered, 2);
        assert_eq!(receiver.recv().unwrap().delivered, 3);
    }

    #[test]
    fn unconvertible_frame_is_recycled() {
        let (mut handler, receiver, _) = setup(10);
        let recorder = Recorder::default();
        handler.on_frame(frame(1, FrameStatus::Complete, PixFmt::YUV422), &recorder);
        assert!(receiver.is_empty());
        assert_eq!(recorder.recycled.borrow().len(), 1);
    }

    #[test]
    fn receiver_gone_still_recycles() {
        let (mut handler, receiver, _) = setup(1);
        drop(receiver);
        let recorder = Recorder::default();
        handler.on_frame(frame(1, FrameStatus::Complete, PixFmt::Mono8), &recorder);
        assert_eq!(recorder.recycled.borrow().len(), 1);
    }

    #[test]
    fn receiver_sees_disconnect_after_drain() {
        let (mut handler, receiver, _) = setup(4);
        let recorder = Recorder::default();
        handler.on_frame(frame(1, FrameStatus::Complete, PixFmt::Mono8), &recorder);
        drop(handler);
        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_none());
    }

    #[test]
    #[traced_test]
    fn full_queue_is_reported() {
        let (mut handler, receiver, _) = setup(1);
        let recorder = Recorder::default();
        handler.on_frame(frame(1, FrameStatus::Complete, PixFmt::Mono8), &recorder);
        assert!(!logs_contain("frame queue full"));

        // Free the slot from another thread once the handler is blocked.
        let consumer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            let a = receiver.recv().unwrap();
            let b = receiver.recv().unwrap();
            (a.delivered, b.delivered)
        });
        handler.on_frame(frame(2, FrameStatus::Complete, PixFmt::Mono8), &recorder);
        assert!(logs_contain("frame queue full"));
        assert_eq!(consumer.join().unwrap(), (1, 2));
    }
}
