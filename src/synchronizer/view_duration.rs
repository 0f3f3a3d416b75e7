/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! View timeout estimation.
//!
//! The synchronizer asks its [`ViewDuration`] how long to wait before declaring the current view
//! failed. [`AdaptiveDuration`] estimates from recent history: it keeps the durations of the last
//! K successful views and answers `mean + beta * stdev`, stretched by an exponential backoff
//! factor that grows on timeouts and decays on successes. [`FixedDuration`] answers a constant,
//! which is what deterministic simulation wants.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Decides the timeout of each view and hears about view outcomes.
pub trait ViewDuration {
    /// The duration the next view is allowed to run before timing out.
    fn duration(&self) -> Duration;

    /// A new view started; measurement of its duration begins now.
    fn view_started(&mut self);

    /// The view ended with progress (a certificate was observed).
    fn view_succeeded(&mut self);

    /// The view timed out.
    fn view_timeout(&mut self);
}

/// A constant view duration. Simulation uses this with a duration far beyond the test horizon,
/// letting the simulated clock drive timeouts instead.
pub struct FixedDuration(Duration);

impl FixedDuration {
    pub fn new(duration: Duration) -> FixedDuration {
        FixedDuration(duration)
    }
}

impl ViewDuration for FixedDuration {
    fn duration(&self) -> Duration {
        self.0
    }
    fn view_started(&mut self) {}
    fn view_succeeded(&mut self) {}
    fn view_timeout(&mut self) {}
}

/// Moving-average view duration estimation with exponential backoff.
pub struct AdaptiveDuration {
    /// Durations of the last `window` successful views, in seconds.
    samples: VecDeque<f64>,
    window: usize,
    beta: f64,
    multiplier: f64,
    backoff: f64,
    initial: Duration,
    started: Option<Instant>,
}

impl AdaptiveDuration {
    /// Create an estimator that starts from `initial`, keeps a window of `window` samples,
    /// answers `mean + beta * stdev`, and backs off by `multiplier` per timeout.
    pub fn new(initial: Duration, window: usize, beta: f64, multiplier: f64) -> AdaptiveDuration {
        AdaptiveDuration {
            samples: VecDeque::with_capacity(window),
            window,
            beta,
            multiplier,
            backoff: 1.0,
            initial,
            started: None,
        }
    }

    fn mean(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn stdev(&self) -> f64 {
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|sample| (sample - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }
}

impl ViewDuration for AdaptiveDuration {
    fn duration(&self) -> Duration {
        let base = if self.samples.is_empty() {
            self.initial.as_secs_f64()
        } else {
            self.mean() + self.beta * self.stdev()
        };
        Duration::from_secs_f64(base * self.backoff)
    }

    fn view_started(&mut self) {
        self.started = Some(Instant::now());
    }

    fn view_succeeded(&mut self) {
        if let Some(started) = self.started.take() {
            if self.samples.len() == self.window {
                self.samples.pop_front();
            }
            self.samples.push_back(started.elapsed().as_secs_f64());
        }
        // decay back toward the base duration
        self.backoff = (self.backoff / self.multiplier).max(1.0);
    }

    fn view_timeout(&mut self) {
        self.backoff *= self.multiplier;
    }
}
