use serde::{Deserialize, Serialize};

/// Online mean and standard deviation via Welford's update.
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            mean: self.mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// Running extremes of a tick-indexed series.
///
/// Tracks where the series bottomed out and peaked; the status trajectory of a
/// boom-bust-recovery run is summarized by exactly these two points.
pub struct Extrema {
    min: f64,
    max: f64,
    min_tick: usize,
    max_tick: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtremaReport {
    pub min: f64,
    pub max: f64,
    pub min_tick: usize,
    pub max_tick: usize,
}

impl Extrema {
    pub fn new() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            min_tick: 0,
            max_tick: 0,
        }
    }

    pub fn observe(&mut self, tick: usize, val: f64) {
        if val < self.min {
            self.min = val;
            self.min_tick = tick;
        }
        if val > self.max {
            self.max = val;
            self.max_tick = tick;
        }
    }

    pub fn report(&self) -> ExtremaReport {
        ExtremaReport {
            min: self.min,
            max: self.max,
            min_tick: self.min_tick,
            max_tick: self.max_tick,
        }
    }
}
