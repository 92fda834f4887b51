use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Calculates transfer speed over a sliding time window.
///
/// Each sample records how many bytes finished at a given instant, typically
/// one sample per completed chunk.
pub struct SpeedCalculator {
    inner: Mutex<Window>,
}

struct Window {
    samples: VecDeque<(Instant, u64)>,
    max_samples: usize,
    span: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl SpeedCalculator {
    /// Creates a calculator keeping at most `max_samples` samples no older than `span`.
    pub fn new(span: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Window {
                samples: VecDeque::new(),
                max_samples: max_samples.max(2),
                span,
            }),
        }
    }

    /// Records `bytes` completed now.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(Instant::now(), bytes);
    }

    fn add_sample_at(&self, at: Instant, bytes: u64) {
        let mut w = self.inner.lock().unwrap();
        w.samples.push_back((at, bytes));

        let span = w.span;
        while let Some(&(oldest, _)) = w.samples.front() {
            if at.duration_since(oldest) > span {
                w.samples.pop_front();
            } else {
                break;
            }
        }
        while w.samples.len() > w.max_samples {
            w.samples.pop_front();
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let w = self.inner.lock().unwrap();
        let (Some(&(first, _)), Some(&(last, _))) = (w.samples.front(), w.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if w.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = w.samples.iter().map(|&(_, bytes)| bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimates the time left for `remaining_bytes`, or `None` with no speed yet.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_means_no_speed() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());

        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_over_known_interval() {
        let calc = SpeedCalculator::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        calc.add_sample_at(t0, 500);
        calc.add_sample_at(t0 + Duration::from_secs(1), 500);

        assert!((calc.bytes_per_second() - 1000.0).abs() < 1e-6);
        let eta = calc.eta(3000).unwrap();
        assert!((eta.as_secs_f64() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn old_samples_fall_out_of_window() {
        let calc = SpeedCalculator::new(Duration::from_secs(2), 10);
        let t0 = Instant::now();
        calc.add_sample_at(t0, 1_000_000);
        calc.add_sample_at(t0 + Duration::from_secs(5), 100);
        calc.add_sample_at(t0 + Duration::from_secs(6), 100);

        assert!((calc.bytes_per_second() - 200.0).abs() < 1e-6);
    }

    #[test]
    fn sample_count_is_capped() {
        let calc = SpeedCalculator::new(Duration::from_secs(60), 5);
        let t0 = Instant::now();
        for i in 0..20 {
            calc.add_sample_at(t0 + Duration::from_millis(i * 10), 1);
        }
        assert_eq!(calc.inner.lock().unwrap().samples.len(), 5);
    }

    #[test]
    fn reset_clears_samples() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        calc.add_sample(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }
}
