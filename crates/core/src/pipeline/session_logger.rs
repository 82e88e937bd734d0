use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for capture-session events.
///
/// The capture loop reports through this trait so the binary decides how
/// much is printed, and tests can stay silent.
pub trait SessionLogger: Send {
    /// Called once per processed frame.
    fn frame(&mut self, index: usize);

    /// Duration of one stage for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Point-in-time value such as face count or subscriber count.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// End-of-session report. Default: no-op.
    fn summary(&self) {}
}

pub struct NullSessionLogger;

impl SessionLogger for NullSessionLogger {
    fn frame(&mut self, _index: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate; a live session has no frame bound, so samples are not
/// kept individually.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stat {
    pub count: usize,
    pub total: f64,
    pub max: f64,
}

impl Stat {
    fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.max = if self.count == 1 { value } else { self.max.max(value) };
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Logs a throughput line every `every_frames` frames and a per-stage
/// breakdown when the session ends.
pub struct StdoutSessionLogger {
    every_frames: usize,
    frames: usize,
    timings: BTreeMap<String, Stat>,
    metrics: BTreeMap<String, Stat>,
    started: Instant,
    window_started: Instant,
}

impl StdoutSessionLogger {
    pub fn new(every_frames: usize) -> Self {
        let now = Instant::now();
        Self {
            every_frames: every_frames.max(1),
            frames: 0,
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            started: now,
            window_started: now,
        }
    }

    #[cfg(test)]
    fn frames(&self) -> usize {
        self.frames
    }

    #[cfg(test)]
    fn timing_stat(&self, stage: &str) -> Option<Stat> {
        self.timings.get(stage).copied()
    }

    /// `None` until at least one timing or metric was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Session summary ({} frames, {elapsed_s:.1}s):",
            self.frames
        )];
        for (stage, stat) in &self.timings {
            lines.push(format!(
                "  {stage:10}: avg {:6.1}ms  max {:6.1}ms",
                stat.mean(),
                stat.max
            ));
        }
        for (name, stat) in &self.metrics {
            lines.push(format!("  {name}: avg {:.1}", stat.mean()));
        }
        if self.frames > 0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  Throughput: {:.1} fps",
                self.frames as f64 / elapsed_s
            ));
        }
        Some(lines.join("\n"))
    }
}

impl Default for StdoutSessionLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SessionLogger for StdoutSessionLogger {
    fn frame(&mut self, index: usize) {
        self.frames += 1;
        if self.frames % self.every_frames == 0 {
            let window_s = self.window_started.elapsed().as_secs_f64();
            let fps = if window_s > 0.0 {
                self.every_frames as f64 / window_s
            } else {
                0.0
            };
            log::info!("Frame {index}: {fps:.1} fps over last {} frames", self.every_frames);
            self.window_started = Instant::now();
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .record(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().record(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
