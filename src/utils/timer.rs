//! Session clock
//!
//! Wall-clock start time for reports plus monotonic phase laps for logs.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Clock started when a session begins
#[derive(Debug)]
pub struct SessionClock {
    start: Instant,
    started_at: DateTime<Utc>,
    laps: Vec<(String, Duration)>,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
            laps: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Close the current phase under `label`
    pub fn lap(&mut self, label: impl Into<String>) {
        let elapsed = self.start.elapsed();
        self.laps.push((label.into(), elapsed));
    }

    /// Duration of each phase, not cumulative
    pub fn phase_times(&self) -> Vec<(&str, Duration)> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|(label, cumulative)| {
                let phase = cumulative.saturating_sub(prev);
                prev = *cumulative;
                (label.as_str(), phase)
            })
            .collect()
    }

    pub fn format(&self) -> String {
        self.phase_times()
            .iter()
            .map(|(label, d)| format!("{}={}ms", label, d.as_millis()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
