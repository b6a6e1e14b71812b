//! Download rate and completion estimates.

use std::time::{Duration, Instant};

use crate::error::format_size;

/// Tracks how fast the bytes of a batch of downloads are arriving.
///
/// Fed from `Progress` events on the installer thread; the rate is smoothed
/// so a single slow chunk does not swing the estimate.
#[derive(Debug, Clone)]
pub struct ByteRateCounter {
    size: u64,
    bytes_left: u64,
    started: Option<Instant>,
    last: Option<(Instant, u64)>,
    rate: f64,
}

/// Weight of the newest sample in the smoothed rate.
const SMOOTHING: f64 = 0.3;

impl ByteRateCounter {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            bytes_left: size,
            started: None,
            last: None,
            rate: 0.0,
        }
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.started = Some(now);
        self.last = Some((now, self.bytes_left));
    }

    pub fn update(&mut self, bytes_left: u64) {
        self.update_at(Instant::now(), bytes_left);
    }

    fn update_at(&mut self, now: Instant, bytes_left: u64) {
        if self.started.is_none() {
            self.started = Some(now);
        }
        if let Some((then, previous)) = self.last {
            let elapsed = now.saturating_duration_since(then).as_secs_f64();
            if elapsed > 0.0 {
                let sample = previous.saturating_sub(bytes_left) as f64 / elapsed;
                self.rate = if self.rate == 0.0 {
                    sample
                } else {
                    SMOOTHING * sample + (1.0 - SMOOTHING) * self.rate
                };
            }
        }
        self.last = Some((now, bytes_left));
        self.bytes_left = bytes_left.min(self.size);
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.rate as u64
    }

    pub fn percent(&self) -> u8 {
        if self.size == 0 {
            return 100;
        }
        (((self.size - self.bytes_left) as f64 / self.size as f64) * 100.0) as u8
    }

    pub fn time_left(&self) -> Option<Duration> {
        if self.rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.bytes_left as f64 / self.rate))
    }

    /// e.g. `1.5 MiB/s, 20s left`
    pub fn summary(&self) -> String {
        match self.time_left() {
            Some(left) => format!("{}/s, {}s left", format_size(self.bytes_per_second()), left.as_secs()),
            None => format!("{} left", format_size(self.bytes_left)),
        }
    }
}
