/// Motion sensor: frame-to-frame change detection on the camera feed.
///
/// Each poll captures a frame, optionally brightens it with a gamma lookup table,
/// and compares it with the previous frame:
///
///   absdiff -> luma -> 5x5 Gaussian blur -> binarize (> 20) -> 3x3 dilate (x3)
///   -> 8-connected region labelling
///
/// Any surviving region counts as motion.  The first frame pair never emits so the
/// camera's auto-exposure settling is not reported as an intrusion.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::Local;
use image::{GrayImage, Luma, RgbImage};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::cancel::RunState;
use crate::cooldown::Cooldown;
use crate::dispatch::Dispatcher;
use crate::error::SensorError;
use crate::event::{Channel, DetectionEvent};
use crate::preview::{Preview, PreviewAction};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Blurred difference intensity above which a pixel counts as changed.
pub const DIFF_CUTOFF: u8 = 20;
pub const DILATE_ITERATIONS: usize = 3;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Anything that can hand out RGB frames: a webcam, or a scripted source in tests.
pub trait FrameSource {
    fn capture(&mut self) -> Result<RgbImage, SensorError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn capture(&mut self) -> Result<RgbImage, SensorError> {
        (**self).capture()
    }
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub cooldown: Duration,
    /// Low-light gamma; `None` leaves frames untouched.
    pub gamma: Option<f64>,
    pub poll_interval: Duration,
    /// Log the per-second motion level at info instead of debug.
    pub show_status: bool,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            gamma: None,
            poll_interval: POLL_INTERVAL,
            show_status: false,
        }
    }
}

/// Why a motion loop ended without a camera failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionExit {
    Stopped,
    /// ESC was pressed in the preview window.
    PreviewClosed,
}

pub struct MotionSensor<S> {
    source: S,
    preview: Option<Box<dyn Preview>>,
    preview_closed: bool,
    settings: MotionSettings,
    gamma_lut: Option<[u8; 256]>,
    cooldown: Cooldown,
    /// Where snapshots go; `None` when `--save-snaps` is off.
    snapshots: Option<ArtifactStore>,
    previous: Option<RgbImage>,
    pairs_seen: u64,
    last_status: Instant,
}

impl<S: FrameSource> MotionSensor<S> {
    pub fn new(source: S, settings: MotionSettings, snapshots: Option<ArtifactStore>) -> Self {
        Self {
            source,
            preview: None,
            preview_closed: false,
            gamma_lut: settings.gamma.map(gamma_table),
            cooldown: Cooldown::new(settings.cooldown),
            settings,
            snapshots,
            previous: None,
            pairs_seen: 0,
            last_status: Instant::now(),
        }
    }

    /// Shows every raw frame in `preview` until ESC is pressed there.
    pub fn with_preview(mut self, preview: Box<dyn Preview>) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Captures one frame and returns an event if it shows accepted motion.
    /// A capture failure is fatal for this sensor.
    pub fn poll(&mut self) -> Result<Option<DetectionEvent>, SensorError> {
        let raw = self.source.capture()?;
        self.show_preview(&raw);
        let corrected = self.gamma_lut.as_ref().map(|lut| apply_gamma(&raw, lut));

        let previous = match self.previous.take() {
            Some(prev) if prev.dimensions() == raw.dimensions() => prev,
            Some(_) => {
                warn!("[motion] Frame size changed to {:?}; restarting comparison", raw.dimensions());
                self.previous = Some(corrected.unwrap_or(raw));
                return Ok(None);
            }
            None => {
                self.previous = Some(corrected.unwrap_or(raw));
                return Ok(None);
            }
        };

        let current = corrected.as_ref().unwrap_or(&raw);
        let analysis = analyze(&previous, current);
        self.pairs_seen += 1;
        self.report_status(&analysis);

        let mut event = None;
        if self.pairs_seen > 1 && analysis.regions > 0 && self.cooldown.try_accept(Instant::now()) {
            let now = Local::now();
            let snapshot = self.snapshots.as_ref().and_then(|store| {
                store
                    .save_snapshot(&raw, &now)
                    .map_err(|e| warn!("[motion] Snapshot not saved: {e}"))
                    .ok()
            });
            event = Some(
                DetectionEvent::new(Channel::Motion, now, analysis.changed_fraction)
                    .with_artifact(snapshot),
            );
        }

        self.previous = Some(corrected.unwrap_or(raw));
        Ok(event)
    }

    /// Polls until `run_state` stops, the preview is closed, or the camera fails.
    pub fn run(mut self, run_state: &RunState, dispatcher: &Dispatcher) -> Result<MotionExit, SensorError> {
        info!(
            "[motion] Motion detection started (cooldown {}s)",
            self.cooldown.interval().as_secs_f64()
        );
        while run_state.is_running() {
            if let Some(event) = self.poll()? {
                dispatcher.dispatch(&event);
            }
            if self.preview_closed {
                info!("[motion] Preview closed");
                return Ok(MotionExit::PreviewClosed);
            }
            std::thread::sleep(self.settings.poll_interval);
        }
        info!("[motion] Stopped");
        Ok(MotionExit::Stopped)
    }

    /// A broken window is dropped and monitoring continues without it.
    fn show_preview(&mut self, frame: &RgbImage) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        match preview.show(frame) {
            Ok(PreviewAction::Continue) => {}
            Ok(PreviewAction::Quit) => self.preview_closed = true,
            Err(e) => {
                warn!("[motion] {e}; continuing without preview");
                self.preview = None;
            }
        }
    }

    fn report_status(&mut self, analysis: &MotionAnalysis) {
        if self.last_status.elapsed() < STATUS_INTERVAL {
            return;
        }
        self.last_status = Instant::now();
        let pct = analysis.changed_fraction * 100.0;
        if self.settings.show_status {
            info!("[motion] level {pct:.1}% ({} region(s))", analysis.regions);
        } else {
            debug!("[motion] level {pct:.1}% ({} region(s))", analysis.regions);
        }
    }
}

// ── Frame processing ──────────────────────────────────────────────────────────

/// Result of comparing two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionAnalysis {
    /// Number of 8-connected changed regions after dilation.
    pub regions: usize,
    /// Share of pixels marked changed after dilation, in [0, 1].
    pub changed_fraction: f64,
}

/// Runs the full difference pipeline on two frames of equal size.
pub fn analyze(previous: &RgbImage, current: &RgbImage) -> MotionAnalysis {
    let diff = abs_diff_luma(previous, current);
    let blurred = gaussian_blur_5x5(&diff);
    let mut mask = Mask::threshold(&blurred, DIFF_CUTOFF);
    for _ in 0..DILATE_ITERATIONS {
        mask = mask.dilate();
    }
    let total = mask.len().max(1);
    MotionAnalysis {
        regions: mask.count_regions(),
        changed_fraction: mask.count_set() as f64 / total as f64,
    }
}

/// Lookup table for `255 * (v / 255)^(1 / gamma)`.  gamma = 1.0 is the identity.
pub fn gamma_table(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let v = (i as f64 / 255.0).powf(inv) * 255.0;
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    table
}

pub fn apply_gamma(frame: &RgbImage, lut: &[u8; 256]) -> RgbImage {
    let mut out = frame.clone();
    for channel in out.iter_mut() {
        *channel = lut[*channel as usize];
    }
    out
}

/// Per-channel absolute difference, reduced to luma with Rec. 601 weights.
pub fn abs_diff_luma(a: &RgbImage, b: &RgbImage) -> GrayImage {
    let (w, h) = a.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let pa = a.get_pixel(x, y).0;
        let pb = b.get_pixel(x, y).0;
        let r = u32::from(pa[0].abs_diff(pb[0]));
        let g = u32::from(pa[1].abs_diff(pb[1]));
        let bl = u32::from(pa[2].abs_diff(pb[2]));
        Luma([((299 * r + 587 * g + 114 * bl + 500) / 1000) as u8])
    })
}

/// 5x5 Gaussian blur with the binomial kernel [1 4 6 4 1] / 16 applied
/// separably.  Borders reflect without repeating the edge pixel (`dcb|abcd|cba`).
pub fn gaussian_blur_5x5(src: &GrayImage) -> GrayImage {
    const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }

    let mut horizontal = vec![0u32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sx = reflect_101(i64::from(x) + k as i64 - 2, w);
                acc += weight * u32::from(src.get_pixel(sx, y).0[0]);
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0;
        for (k, weight) in KERNEL.iter().enumerate() {
            let sy = reflect_101(i64::from(y) + k as i64 - 2, h);
            acc += weight * horizontal[(sy * w + x) as usize];
        }
        // Both passes scale by 16.
        Luma([((acc + 128) / 256) as u8])
    })
}

/// Maps an out-of-range index back into `0..len` by mirroring around the edge
/// pixels without repeating them.
fn reflect_101(i: i64, len: u32) -> u32 {
    let n = i64::from(len);
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - m }) as u32
}

/// Binary foreground mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn threshold(src: &GrayImage, cutoff: u8) -> Self {
        Self {
            width: src.width(),
            height: src.height(),
            bits: src.pixels().map(|p| p.0[0] > cutoff).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return false;
        }
        self.bits[(y as usize) * self.width as usize + x as usize]
    }

    /// One pass of 3x3 dilation: a pixel is set if any neighbour (or itself) is.
    pub fn dilate(&self) -> Self {
        let mut bits = vec![false; self.bits.len()];
        for y in 0..i64::from(self.height) {
            for x in 0..i64::from(self.width) {
                let hit = (-1..=1).any(|dy| (-1..=1).any(|dx| self.get(x + dx, y + dy)));
                bits[(y as usize) * self.width as usize + x as usize] = hit;
            }
        }
        Self {
            width: self.width,
            height: self.height,
            bits,
        }
    }

    /// Number of 8-connected foreground regions, found by flood fill.
    pub fn count_regions(&self) -> usize {
        let w = self.width as i64;
        let mut visited = vec![false; self.bits.len()];
        let mut queue = VecDeque::new();
        let mut regions = 0;

        for start in 0..self.bits.len() {
            if !self.bits[start] || visited[start] {
                continue;
            }
            regions += 1;
            visited[start] = true;
            queue.push_back(start);
            while let Some(idx) = queue.pop_front() {
                let (x, y) = ((idx as i64) % w, (idx as i64) / w);
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if !self.get(nx, ny) {
                            continue;
                        }
                        let n = (ny * w + nx) as usize;
                        if !visited[n] {
                            visited[n] = true;
                            queue.push_back(n);
                        }
                    }
                }
            }
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::AlertConfig;
    use crate::dispatch::tests::{email_config, RecordingMailer};
    use crate::error::PreviewError;
    use image::Rgb;

    /// Replays a list of frames, then fails like an unplugged camera.
    struct ScriptedCamera {
        frames: VecDeque<RgbImage>,
    }

    impl ScriptedCamera {
        fn new(frames: Vec<RgbImage>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl FrameSource for ScriptedCamera {
        fn capture(&mut self) -> Result<RgbImage, SensorError> {
            self.frames
                .pop_front()
                .ok_or_else(|| SensorError::fatal("camera", "end of script"))
        }
    }

    /// Returns the same frame forever.
    struct StillCamera(RgbImage);

    impl FrameSource for StillCamera {
        fn capture(&mut self) -> Result<RgbImage, SensorError> {
            Ok(self.0.clone())
        }
    }

    fn flat(v: u8) -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([v, v, v]))
    }

    /// Flat background with a bright square.
    fn with_square(bg: u8, x0: u32, y0: u32, size: u32) -> RgbImage {
        let mut img = flat(bg);
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        img
    }

    fn settings(cooldown: Duration) -> MotionSettings {
        MotionSettings {
            cooldown,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn poll_all<S: FrameSource>(sensor: &mut MotionSensor<S>, n: usize) -> Vec<DetectionEvent> {
        (0..n).filter_map(|_| sensor.poll().unwrap()).collect()
    }

    // ── gamma ─────────────────────────────────────────────────────────────────

    #[test]
    fn gamma_one_is_identity_for_every_value() {
        let lut = gamma_table(1.0);
        for v in 0..=255u8 {
            assert_eq!(lut[v as usize], v);
        }
    }

    #[test]
    fn gamma_above_one_brightens_midtones_and_keeps_endpoints() {
        let lut = gamma_table(2.0);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[255], 255);
        assert!(lut[64] > 64);
        // sqrt(0.25) * 255 = 127.5
        assert_eq!(lut[(0.25f64 * 255.0).round() as usize], 128);
    }

    #[test]
    fn apply_gamma_maps_every_channel() {
        let lut = gamma_table(2.0);
        let frame = RgbImage::from_pixel(2, 2, Rgb([0, 64, 255]));
        let out = apply_gamma(&frame, &lut);
        assert_eq!(out.get_pixel(1, 1).0, [0, lut[64], 255]);
    }

    // ── pipeline stages ───────────────────────────────────────────────────────

    #[test]
    fn identical_frames_have_no_regions() {
        let a = with_square(30, 4, 4, 6);
        let analysis = analyze(&a, &a.clone());
        assert_eq!(analysis.regions, 0);
        assert_eq!(analysis.changed_fraction, 0.0);
    }

    #[test]
    fn a_moved_object_is_one_region() {
        let a = with_square(30, 2, 2, 6);
        let b = with_square(30, 5, 3, 6);
        let analysis = analyze(&a, &b);
        assert_eq!(analysis.regions, 1);
        assert!(analysis.changed_fraction > 0.0 && analysis.changed_fraction < 1.0);
    }

    #[test]
    fn small_noise_stays_below_cutoff() {
        let a = flat(100);
        let mut b = flat(100);
        // A single pixel off by 60 is smeared below the cutoff by the blur.
        b.put_pixel(10, 10, Rgb([160, 160, 160]));
        assert_eq!(analyze(&a, &b).regions, 0);
    }

    #[test]
    fn far_apart_changes_are_separate_regions() {
        let a = flat(0);
        let mut b = flat(0);
        for (x0, y0) in [(1, 1), (24, 16)] {
            for y in y0..y0 + 4 {
                for x in x0..x0 + 4 {
                    b.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        assert_eq!(analyze(&a, &b).regions, 2);
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = with_square(10, 0, 0, 5);
        let b = with_square(200, 3, 3, 5);
        assert_eq!(abs_diff_luma(&a, &b), abs_diff_luma(&b, &a));
    }

    #[test]
    fn reflect_101_mirrors_without_repeating_the_edge() {
        let mapped: Vec<u32> = (-2..7).map(|i| reflect_101(i, 5)).collect();
        assert_eq!(mapped, vec![2, 1, 0, 1, 2, 3, 4, 3, 2]);
        assert_eq!(reflect_101(-2, 1), 0);
        assert_eq!(reflect_101(3, 2), 1);
    }

    #[test]
    fn blur_mirrors_at_the_border() {
        let mut img = GrayImage::new(5, 1);
        img.put_pixel(4, 0, Luma([160]));
        let blurred = gaussian_blur_5x5(&img);
        // Replicating the edge would give 110 here; reflect-101 weighs it once.
        assert_eq!(blurred.get_pixel(4, 0).0[0], 60);
        assert_eq!(blurred.get_pixel(3, 0).0[0], 40);
        assert_eq!(blurred.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn blur_keeps_flat_images_flat() {
        let img = GrayImage::from_pixel(9, 7, Luma([77]));
        assert_eq!(gaussian_blur_5x5(&img), img);
    }

    #[test]
    fn dilation_grows_a_pixel_to_a_square() {
        let mut img = GrayImage::new(7, 7);
        img.put_pixel(3, 3, Luma([255]));
        let mask = Mask::threshold(&img, DIFF_CUTOFF);
        assert_eq!(mask.count_set(), 1);
        assert_eq!(mask.dilate().count_set(), 9);
        assert_eq!(mask.dilate().dilate().count_set(), 25);
    }

    #[test]
    fn diagonal_neighbours_are_connected() {
        let mut img = GrayImage::new(4, 4);
        img.put_pixel(0, 0, Luma([255]));
        img.put_pixel(1, 1, Luma([255]));
        img.put_pixel(3, 3, Luma([255]));
        let mask = Mask::threshold(&img, DIFF_CUTOFF);
        assert_eq!(mask.count_regions(), 2);
    }

    // ── sensor ────────────────────────────────────────────────────────────────

    #[test]
    fn first_frame_pair_never_emits() {
        let camera = ScriptedCamera::new(vec![flat(0), flat(255)]);
        let mut sensor = MotionSensor::new(camera, settings(Duration::ZERO), None);
        assert!(sensor.poll().unwrap().is_none());
        assert!(sensor.poll().unwrap().is_none());
    }

    #[test]
    fn change_after_warmup_emits_motion_event() {
        let camera = ScriptedCamera::new(vec![flat(30), flat(30), with_square(30, 8, 8, 8)]);
        let mut sensor = MotionSensor::new(camera, settings(Duration::ZERO), None);
        let events = poll_all(&mut sensor, 3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, Channel::Motion);
        assert!(events[0].magnitude > 0.0);
        assert!(events[0].artifact.is_none());
    }

    #[test]
    fn ten_identical_frames_emit_nothing() {
        let mut sensor = MotionSensor::new(StillCamera(flat(90)), settings(Duration::ZERO), None);
        assert!(poll_all(&mut sensor, 10).is_empty());
    }

    #[test]
    fn cooldown_suppresses_back_to_back_motion() {
        let frames = (0..8)
            .map(|i| if i % 2 == 0 { flat(0) } else { with_square(0, 4, 4, 10) })
            .collect();
        let mut sensor =
            MotionSensor::new(ScriptedCamera::new(frames), settings(Duration::from_secs(60)), None);
        assert_eq!(poll_all(&mut sensor, 8).len(), 1);
    }

    #[test]
    fn without_cooldown_every_changing_pair_emits() {
        let frames = (0..6)
            .map(|i| if i % 2 == 0 { flat(0) } else { with_square(0, 4, 4, 10) })
            .collect();
        let mut sensor = MotionSensor::new(ScriptedCamera::new(frames), settings(Duration::ZERO), None);
        // Six frames, five pairs, the first pair suppressed.
        assert_eq!(poll_all(&mut sensor, 6).len(), 4);
    }

    #[test]
    fn snapshot_is_the_raw_frame() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("snapshots"), dir.path().join("audio"));
        let moved = with_square(40, 8, 8, 8);
        let camera = ScriptedCamera::new(vec![flat(40), flat(40), moved.clone()]);
        let mut s = settings(Duration::ZERO);
        s.gamma = Some(2.5);
        let mut sensor = MotionSensor::new(camera, s, Some(store));

        let events = poll_all(&mut sensor, 3);
        let path = events[0].artifact.clone().expect("snapshot path");
        assert!(path.starts_with(dir.path().join("snapshots")));
        assert_eq!(path.extension().unwrap(), "jpg");

        // JPEG is lossy; the background must still be near the raw 40, not the
        // gamma-brightened value.
        let saved = image::open(&path).unwrap().to_rgb8();
        let bg = saved.get_pixel(0, 0).0[0];
        assert!(bg < 60, "background {bg} looks gamma-corrected");
    }

    #[test]
    fn frame_size_change_restarts_comparison() {
        let small = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        let camera = ScriptedCamera::new(vec![flat(0), flat(0), small.clone(), small]);
        let mut sensor = MotionSensor::new(camera, settings(Duration::ZERO), None);
        assert!(poll_all(&mut sensor, 4).is_empty());
    }

    #[test]
    fn camera_failure_is_fatal() {
        let mut sensor = MotionSensor::new(ScriptedCamera::new(vec![]), settings(Duration::ZERO), None);
        assert!(matches!(sensor.poll(), Err(SensorError::Fatal { sensor: "camera", .. })));
    }

    #[test]
    fn run_dispatches_and_returns_camera_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.txt");
        let mailer = RecordingMailer::default();
        let dispatcher = Dispatcher::new(
            Arc::new(email_config(true, false)),
            Some(log.clone()),
            Some(Box::new(mailer.clone())),
        );
        let camera = ScriptedCamera::new(vec![flat(0), flat(0), with_square(0, 4, 4, 10)]);
        let sensor = MotionSensor::new(camera, settings(Duration::ZERO), None);

        let result = sensor.run(&RunState::new(), &dispatcher);

        assert!(result.is_err());
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.trim_end().ends_with("Motion detected."));
    }

    #[test]
    fn run_returns_ok_once_stopped() {
        let dispatcher = Dispatcher::new(Arc::new(AlertConfig::disabled()), None, None);
        let run_state = RunState::new();
        run_state.stop();
        let sensor = MotionSensor::new(StillCamera(flat(0)), settings(Duration::ZERO), None);
        assert_eq!(sensor.run(&run_state, &dispatcher).unwrap(), MotionExit::Stopped);
    }

    // ── preview ───────────────────────────────────────────────────────────────

    /// Counts shown frames and answers ESC on frame `quit_on`.
    struct KeyedPreview {
        shown: Arc<AtomicUsize>,
        quit_on: usize,
    }

    impl Preview for KeyedPreview {
        fn show(&mut self, _frame: &RgbImage) -> Result<PreviewAction, PreviewError> {
            let n = self.shown.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n == self.quit_on {
                PreviewAction::Quit
            } else {
                PreviewAction::Continue
            })
        }
    }

    struct BrokenPreview;

    impl Preview for BrokenPreview {
        fn show(&mut self, _frame: &RgbImage) -> Result<PreviewAction, PreviewError> {
            Err(PreviewError::Window("no display".to_string()))
        }
    }

    #[test]
    fn escape_in_preview_ends_the_loop() {
        let dispatcher = Dispatcher::new(Arc::new(AlertConfig::disabled()), None, None);
        let shown = Arc::new(AtomicUsize::new(0));
        let preview = KeyedPreview {
            shown: Arc::clone(&shown),
            quit_on: 3,
        };
        let sensor = MotionSensor::new(StillCamera(flat(0)), settings(Duration::ZERO), None)
            .with_preview(Box::new(preview));

        let exit = sensor.run(&RunState::new(), &dispatcher).unwrap();

        assert_eq!(exit, MotionExit::PreviewClosed);
        assert_eq!(shown.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn preview_sees_the_uncorrected_frame() {
        struct Captured(Arc<std::sync::Mutex<Vec<RgbImage>>>);
        impl Preview for Captured {
            fn show(&mut self, frame: &RgbImage) -> Result<PreviewAction, PreviewError> {
                self.0.lock().unwrap().push(frame.clone());
                Ok(PreviewAction::Continue)
            }
        }

        let frames = Arc::new(std::sync::Mutex::new(Vec::new()));
        let low_light = MotionSettings {
            gamma: Some(2.0),
            ..settings(Duration::ZERO)
        };
        let mut sensor = MotionSensor::new(StillCamera(flat(40)), low_light, None)
            .with_preview(Box::new(Captured(Arc::clone(&frames))));
        poll_all(&mut sensor, 2);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get_pixel(0, 0).0, [40, 40, 40]);
    }

    #[test]
    fn broken_preview_is_dropped_and_detection_continues() {
        let camera = ScriptedCamera::new(vec![flat(0), flat(0), flat(0), with_square(0, 4, 4, 10)]);
        let mut sensor = MotionSensor::new(camera, settings(Duration::ZERO), None)
            .with_preview(Box::new(BrokenPreview));

        assert_eq!(poll_all(&mut sensor, 4).len(), 1);
        assert!(sensor.preview.is_none());
        assert!(!sensor.preview_closed);
    }
}
