use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::config::NoticeConfig;
use crate::log_sanitize::sanitize_notice_text;

pub mod layer;

pub use layer::NoticeLayer;

const BOTTOM_MARGIN: u16 = 1;
const RIGHT_MARGIN: u16 = 1;
// border + padding on both sides, plus the icon column
pub const CHROME_WIDTH: u16 = 2 + 2 + ICON_WIDTH;
const CHROME_HEIGHT: u16 = 2;
pub const ICON_WIDTH: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeStyle {
    pub icon: &'static str,
    pub fg: (u8, u8, u8),
    pub bg: (u8, u8, u8),
    pub border: (u8, u8, u8),
}

impl Severity {
    pub fn from_level(level: &tracing::Level) -> Option<Self> {
        match *level {
            tracing::Level::DEBUG => Some(Severity::Debug),
            tracing::Level::INFO => Some(Severity::Info),
            tracing::Level::WARN => Some(Severity::Warning),
            tracing::Level::ERROR => Some(Severity::Error),
            // TRACE is too chatty to surface as notices.
            _ => None,
        }
    }

    pub fn style(self) -> NoticeStyle {
        match self {
            Severity::Debug => NoticeStyle {
                icon: "#",
                fg: (200, 200, 230),
                bg: (26, 26, 77),
                border: (51, 51, 128),
            },
            Severity::Info => NoticeStyle {
                icon: "i",
                fg: (230, 230, 230),
                bg: (36, 36, 40),
                border: (110, 110, 128),
            },
            Severity::Warning => NoticeStyle {
                icon: "!",
                fg: (0, 0, 0),
                bg: (230, 179, 0),
                border: (255, 204, 0),
            },
            Severity::Error => NoticeStyle {
                icon: "x",
                fg: (255, 255, 255),
                bg: (128, 0, 0),
                border: (179, 51, 51),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notice {
    seq: u64,
    pub message: String,
    pub severity: Severity,
    pub created_at: Instant,
    pub opacity: f32,
    pub fading: bool,
}

impl Notice {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

pub trait NoticeSurface {
    fn size(&self) -> (u16, u16);
    fn text_height(&self, text: &str, wrap_width: u16) -> u16;
    fn draw_notice(&mut self, notice: &Notice, area: NoticeRect);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeReport {
    pub drawn: usize,
    pub expired: usize,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Notice>,
    next_seq: u64,
    // every seq below this was dropped by the cap
    evicted_below: u64,
}

impl QueueState {
    fn enforce_cap(&mut self, max: usize) {
        if max == 0 {
            return;
        }
        while self.entries.len() > max {
            if let Some(dropped) = self.entries.pop_front() {
                self.evicted_below = self.evicted_below.max(dropped.seq + 1);
            }
        }
    }
}

#[derive(Debug)]
pub struct NoticeQueue {
    state: Mutex<QueueState>,
    surface_ready: AtomicBool,
    display_secs: f32,
    fade_rate: f32,
    max_notices: usize,
    width: u16,
}

impl Default for NoticeQueue {
    fn default() -> Self {
        Self::new(&NoticeConfig::default())
    }
}

impl NoticeQueue {
    pub fn new(cfg: &NoticeConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            surface_ready: AtomicBool::new(false),
            display_secs: cfg.display_secs.max(0.0),
            fade_rate: cfg.fade_rate.max(f32::EPSILON),
            max_notices: cfg.max_notices,
            width: cfg.width.max(CHROME_WIDTH + 1),
        }
    }

    pub fn attach_surface(&self) {
        self.surface_ready.store(true, Ordering::Release);
    }

    pub fn detach_surface(&self) {
        self.surface_ready.store(false, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.surface_ready.load(Ordering::Acquire)
    }

    pub fn post(&self, message: impl AsRef<str>, severity: Severity) {
        self.post_at(message, severity, Instant::now());
    }

    pub fn post_at(&self, message: impl AsRef<str>, severity: Severity, at: Instant) {
        if !self.is_attached() {
            return;
        }
        let message = sanitize_notice_text(message.as_ref());
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push_back(Notice {
            seq,
            message,
            severity,
            created_at: at,
            opacity: 1.0,
            fading: false,
        });
        state.enforce_cap(self.max_notices);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.lock().entries.iter().cloned().collect()
    }

    // Render thread only, once per frame.
    pub fn render_and_age(
        &self,
        surface: &mut dyn NoticeSurface,
        delta_secs: f32,
        now: Instant,
    ) -> AgeReport {
        let (local, snapshot_next_seq) = {
            let state = self.lock();
            (state.entries.iter().cloned().collect::<Vec<_>>(), state.next_seq)
        };

        let (screen_w, screen_h) = surface.size();
        let box_w = self.width.min(screen_w.saturating_sub(RIGHT_MARGIN));
        let wrap_w = box_w.saturating_sub(CHROME_WIDTH).max(1);
        let x = screen_w.saturating_sub(box_w + RIGHT_MARGIN);
        let mut y_offset = screen_h.saturating_sub(BOTTOM_MARGIN);

        let mut report = AgeReport::default();
        let mut survivors = Vec::with_capacity(local.len());

        // Newest first so the latest notice sits closest to the bottom edge.
        for mut notice in local.into_iter().rev() {
            let elapsed = now.saturating_duration_since(notice.created_at).as_secs_f32();
            if elapsed > self.display_secs && !notice.fading {
                notice.fading = true;
            }
            if notice.fading {
                notice.opacity -= self.fade_rate * delta_secs.max(0.0);
                if notice.opacity <= 0.0 {
                    report.expired += 1;
                    continue;
                }
            }

            let height = surface.text_height(&notice.message, wrap_w).max(1) + CHROME_HEIGHT;
            if box_w > CHROME_WIDTH && height <= y_offset {
                let area = NoticeRect {
                    x,
                    y: y_offset - height,
                    width: box_w,
                    height,
                };
                surface.draw_notice(&notice, area);
                report.drawn += 1;
                y_offset = area.y;
            } else {
                // Out of room this frame; keep aging it off-screen.
                y_offset = 0;
            }
            survivors.push(notice);
        }
        survivors.reverse();

        let mut state = self.lock();
        let evicted_below = state.evicted_below;
        survivors.retain(|n| n.seq >= evicted_below);
        survivors.extend(
            state
                .entries
                .iter()
                .filter(|n| n.seq >= snapshot_next_seq)
                .cloned(),
        );
        state.entries = survivors.into();
        state.enforce_cap(self.max_notices);
        report.remaining = state.entries.len();
        report
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicking producer cannot leave the queue half-written; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct RecordingSurface {
        width: u16,
        height: u16,
        drawn: Vec<(String, NoticeRect, f32)>,
    }

    impl RecordingSurface {
        fn new(width: u16, height: u16) -> Self {
            Self {
                width,
                height,
                drawn: Vec::new(),
            }
        }
    }

    impl NoticeSurface for RecordingSurface {
        fn size(&self) -> (u16, u16) {
            (self.width, self.height)
        }

        fn text_height(&self, text: &str, wrap_width: u16) -> u16 {
            let w = wrap_width.max(1) as usize;
            text.chars().count().div_ceil(w).max(1) as u16
        }

        fn draw_notice(&mut self, notice: &Notice, area: NoticeRect) {
            self.drawn.push((notice.message.clone(), area, notice.opacity));
        }
    }

    fn queue(max_notices: usize) -> NoticeQueue {
        let q = NoticeQueue::new(&NoticeConfig {
            max_notices,
            ..NoticeConfig::default()
        });
        q.attach_surface();
        q
    }

    fn run_frames(q: &NoticeQueue, start: Instant, until_secs: f32, dt: f32) -> Instant {
        let mut surface = RecordingSurface::new(120, 40);
        let mut t = 0.0f32;
        while t < until_secs {
            t += dt;
            q.render_and_age(&mut surface, dt, start + Duration::from_secs_f32(t));
        }
        start + Duration::from_secs_f32(t)
    }

    #[test]
    fn post_before_surface_attached_is_dropped() {
        let q = NoticeQueue::default();
        q.post("early", Severity::Info);
        assert!(q.is_empty());

        q.attach_surface();
        q.post("late", Severity::Info);
        assert_eq!(q.len(), 1);

        q.detach_surface();
        q.post("after", Severity::Info);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn notice_visible_through_display_time_then_fades_out() {
        let q = queue(0);
        let t0 = Instant::now();
        q.post_at("hello", Severity::Info, t0);

        run_frames(&q, t0, 2.9, 1.0 / 60.0);
        let snap = q.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(!snap[0].fading);
        assert_eq!(snap[0].opacity, 1.0);

        let q = queue(0);
        q.post_at("hello", Severity::Info, t0);
        run_frames(&q, t0, 3.5, 1.0 / 60.0);
        let snap = q.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap[0].fading);
        assert!(snap[0].opacity > 0.0 && snap[0].opacity < 1.0);

        run_frames(&q, t0 + Duration::from_secs_f32(3.5), 1.0, 1.0 / 60.0);
        assert!(q.is_empty());
    }

    #[test]
    fn opacity_never_increases_once_fading() {
        let q = queue(0);
        let t0 = Instant::now();
        q.post_at("fade", Severity::Warning, t0);
        let mut surface = RecordingSurface::new(80, 24);
        let mut last = 1.0f32;
        for frame in 1..=300 {
            let now = t0 + Duration::from_millis(frame * 16);
            q.render_and_age(&mut surface, 0.016, now);
            if let Some(n) = q.snapshot().first() {
                assert!(n.opacity <= last);
                last = n.opacity;
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    fn newest_notice_is_drawn_closest_to_bottom() {
        let q = queue(0);
        let t0 = Instant::now();
        q.post_at("first", Severity::Info, t0);
        q.post_at("second", Severity::Error, t0);

        let mut surface = RecordingSurface::new(100, 30);
        let report = q.render_and_age(&mut surface, 0.016, t0);
        assert_eq!(report.drawn, 2);
        assert_eq!(surface.drawn[0].0, "second");
        assert_eq!(surface.drawn[1].0, "first");
        let (_, newest, _) = surface.drawn[0];
        let (_, older, _) = surface.drawn[1];
        assert_eq!(newest.y + newest.height, 30 - BOTTOM_MARGIN);
        assert_eq!(older.y + older.height, newest.y);
        assert_eq!(newest.x + newest.width + RIGHT_MARGIN, 100);

        let order: Vec<_> = q.snapshot().into_iter().map(|n| n.message).collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn notices_that_do_not_fit_keep_aging_offscreen() {
        let q = queue(0);
        let t0 = Instant::now();
        for i in 0..10 {
            q.post_at(format!("n{i}"), Severity::Info, t0);
        }
        let mut surface = RecordingSurface::new(80, 8);
        let report = q.render_and_age(&mut surface, 0.016, t0);
        assert_eq!(report.drawn, 2);
        assert_eq!(report.remaining, 10);
    }

    #[test]
    fn capacity_drops_oldest() {
        let q = queue(3);
        for i in 0..5 {
            q.post(format!("n{i}"), Severity::Debug);
        }
        let order: Vec<_> = q.snapshot().into_iter().map(|n| n.message).collect();
        assert_eq!(order, vec!["n2", "n3", "n4"]);
    }

    #[test]
    fn concurrent_producers_lose_and_duplicate_nothing() {
        let q = Arc::new(queue(0));
        let t0 = Instant::now();
        let producers: Vec<_> = (0..8)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        q.post_at(format!("{p}-{i}"), Severity::Info, t0);
                    }
                })
            })
            .collect();

        let mut surface = RecordingSurface::new(80, 24);
        for _ in 0..50 {
            q.render_and_age(&mut surface, 0.001, t0);
        }
        for p in producers {
            p.join().unwrap();
        }
        q.render_and_age(&mut surface, 0.001, t0);

        let snap = q.snapshot();
        assert_eq!(snap.len(), 8 * 250);
        let unique: HashSet<_> = snap.iter().map(|n| n.message.clone()).collect();
        assert_eq!(unique.len(), 8 * 250);
        assert!(snap.windows(2).all(|w| w[0].seq() < w[1].seq()));
    }

    struct PostingSurface {
        queue: Arc<NoticeQueue>,
        inner: RecordingSurface,
    }

    impl NoticeSurface for PostingSurface {
        fn size(&self) -> (u16, u16) {
            self.inner.size()
        }

        fn text_height(&self, text: &str, wrap_width: u16) -> u16 {
            self.inner.text_height(text, wrap_width)
        }

        fn draw_notice(&mut self, notice: &Notice, area: NoticeRect) {
            // The lock is released while drawing, so posting here must not deadlock.
            self.queue.post(format!("echo {}", notice.message), Severity::Debug);
            self.inner.draw_notice(notice, area);
        }
    }

    #[test]
    fn posts_during_render_pass_survive_swap_back() {
        let q = Arc::new(queue(0));
        q.post("a", Severity::Info);
        let mut surface = PostingSurface {
            queue: Arc::clone(&q),
            inner: RecordingSurface::new(80, 24),
        };
        let report = q.render_and_age(&mut surface, 0.016, Instant::now());
        assert_eq!(report.remaining, 2);
        let order: Vec<_> = q.snapshot().into_iter().map(|n| n.message).collect();
        assert_eq!(order, vec!["a", "echo a"]);
    }

    #[test]
    fn capacity_eviction_during_render_is_not_undone() {
        let q = Arc::new(queue(2));
        q.post("a", Severity::Info);
        q.post("b", Severity::Info);
        let mut surface = PostingSurface {
            queue: Arc::clone(&q),
            inner: RecordingSurface::new(80, 24),
        };
        // Drawing "b" then "a" posts two echoes, evicting both originals.
        let report = q.render_and_age(&mut surface, 0.016, Instant::now());
        assert_eq!(report.drawn, 2);
        assert_eq!(report.remaining, 2);
        let order: Vec<_> = q.snapshot().into_iter().map(|n| n.message).collect();
        assert_eq!(order, vec!["echo b", "echo a"]);
    }

    #[test]
    fn severity_maps_every_tracing_level() {
        assert_eq!(Severity::from_level(&tracing::Level::TRACE), None);
        assert_eq!(
            Severity::from_level(&tracing::Level::DEBUG),
            Some(Severity::Debug)
        );
        assert_eq!(
            Severity::from_level(&tracing::Level::INFO),
            Some(Severity::Info)
        );
        assert_eq!(
            Severity::from_level(&tracing::Level::WARN),
            Some(Severity::Warning)
        );
        assert_eq!(
            Severity::from_level(&tracing::Level::ERROR),
            Some(Severity::Error)
        );
    }
}
