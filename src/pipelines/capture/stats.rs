// SPDX-License-Identifier: GPL-3.0-only

//! Request timing statistics

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling frames-per-second figure over the last N ticks
#[derive(Debug, Clone)]
pub struct FpsCounter {
    ticks: VecDeque<Instant>,
    capacity: usize,
}

impl FpsCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(capacity.max(2)),
            capacity: capacity.max(2),
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, at: Instant) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(at);
    }

    /// Rate implied by the two most recent ticks
    pub fn current(&self) -> f64 {
        let n = self.ticks.len();
        if n < 2 {
            return 0.0;
        }
        rate(1, self.ticks[n - 1] - self.ticks[n - 2])
    }

    /// Rate across the whole window
    pub fn average(&self) -> f64 {
        match (self.ticks.front(), self.ticks.back()) {
            (Some(first), Some(last)) if self.ticks.len() >= 2 => {
                rate(self.ticks.len() - 1, *last - *first)
            }
            _ => 0.0,
        }
    }
}

fn rate(frames: usize, span: Duration) -> f64 {
    let secs = span.as_secs_f64();
    if secs <= 0.0 { 0.0 } else { frames as f64 / secs }
}

/// Average duration of named sections over the last N samples each
#[derive(Debug, Clone)]
pub struct SectionTimes {
    sections: Vec<(&'static str, VecDeque<Duration>)>,
    window: usize,
}

impl SectionTimes {
    pub fn new(window: usize) -> Self {
        Self {
            sections: Vec::new(),
            window: window.max(1),
        }
    }

    pub fn record(&mut self, name: &'static str, elapsed: Duration) {
        let window = self.window;
        let samples = match self.sections.iter().position(|(n, _)| *n == name) {
            Some(i) => &mut self.sections[i].1,
            None => {
                self.sections.push((name, VecDeque::with_capacity(window)));
                let last = self.sections.len() - 1;
                &mut self.sections[last].1
            }
        };
        if samples.len() == window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    /// Run `f`, recording how long it took under `name`
    pub fn time<R>(&mut self, name: &'static str, f: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let result = f();
        self.record(name, started.elapsed());
        result
    }

    pub fn average(&self, name: &str) -> Option<Duration> {
        let (_, samples) = self.sections.iter().find(|(n, _)| *n == name)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<Duration>() / samples.len() as u32)
    }

    /// One-line summary in first-recorded order, e.g. `lock 1.20ms  unlock 0.05ms`
    pub fn summary(&self) -> String {
        self.sections
            .iter()
            .filter_map(|(name, _)| {
                self.average(name)
                    .map(|avg| format!("{} {:.2}ms", name, avg.as_secs_f64() * 1000.0))
            })
            .collect::<Vec<_>>()
            .join("  ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_from_fixed_ticks() {
        let mut fps = FpsCounter::new(4);
        let start = Instant::now();
        for i in 0..6 {
            fps.tick_at(start + Duration::from_millis(i * 40));
        }
        assert!((fps.current() - 25.0).abs() < 0.01);
        assert!((fps.average() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_section_average_window() {
        let mut times = SectionTimes::new(2);
        times.record("lock", Duration::from_millis(10));
        times.record("lock", Duration::from_millis(2));
        times.record("lock", Duration::from_millis(4));
        assert_eq!(times.average("lock"), Some(Duration::from_millis(3)));
        assert_eq!(times.average("copy"), None);
        assert_eq!(times.summary(), "lock 3.00ms");
    }
}
