//! Feedback loop choosing the data protection code of the next encode call from
//! what the decoder observed on the previous ones.
//!
//! The error thresholds are empirical: for each target fraction of recovered
//! tiles, row `i` gives the buffer error rate up to which the `i`-th UEP code
//! still reaches the target.

use tracing::debug;

use crate::codec::RsCode;
use crate::decoder::DecodeReport;
use crate::params::EncoderParams;
use crate::protection::{Protection, UEP_CODES};

pub const WINDOW_SIZE: usize = 4;

const CODE_COUNT: usize = UEP_CODES.len();

struct ThresholdRow {
    tiles: f32,
    thresholds: [f32; CODE_COUNT],
}

const ERROR_THRESHOLDS: [ThresholdRow; 6] = [
    ThresholdRow {
        tiles: 0.98,
        thresholds: [
            0.002, 0.01, 0.015, 0.024, 0.031, 0.053, 0.055, 0.064, 0.081, 0.125, 0.13, 0.161, 0.161, 0.191, 0.191,
            0.179,
        ],
    },
    ThresholdRow {
        tiles: 0.9,
        thresholds: [
            0.01, 0.018, 0.032, 0.036, 0.045, 0.078, 0.076, 0.08, 0.11, 0.15, 0.162, 0.19, 0.186, 0.203, 0.199, 0.207,
        ],
    },
    ThresholdRow {
        tiles: 0.8,
        thresholds: [
            0.014, 0.024, 0.038, 0.045, 0.054, 0.09, 0.086, 0.095, 0.121, 0.168, 0.174, 0.199, 0.195, 0.208, 0.222,
            0.23,
        ],
    },
    ThresholdRow {
        tiles: 0.7,
        thresholds: [
            0.018, 0.029, 0.045, 0.052, 0.062, 0.099, 0.093, 0.104, 0.135, 0.173, 0.183, 0.214, 0.203, 0.228, 0.232,
            0.233,
        ],
    },
    ThresholdRow {
        tiles: 0.6,
        thresholds: [
            0.022, 0.035, 0.052, 0.057, 0.07, 0.108, 0.1, 0.112, 0.143, 0.179, 0.193, 0.218, 0.211, 0.232, 0.235,
            0.236,
        ],
    },
    ThresholdRow {
        tiles: 0.5,
        thresholds: [
            0.027, 0.041, 0.058, 0.063, 0.078, 0.115, 0.108, 0.119, 0.149, 0.194, 0.198, 0.222, 0.217, 0.236, 0.238,
            0.239,
        ],
    },
];

/// Per-code error thresholds for `target` recovered tiles, interpolated between
/// the two bracketing rows.
pub fn error_thresholds(target: f32) -> [f32; CODE_COUNT] {
    let last = ERROR_THRESHOLDS.len() - 1;
    let index = ERROR_THRESHOLDS
        .iter()
        .position(|row| row.tiles <= target)
        .unwrap_or(last);
    let row = &ERROR_THRESHOLDS[index];
    let mut thresholds = row.thresholds;
    if index > 0 && target > ERROR_THRESHOLDS[last].tiles {
        let previous = &ERROR_THRESHOLDS[index - 1];
        let k = (target - row.tiles) / (previous.tiles - row.tiles);
        for (value, upper) in thresholds.iter_mut().zip(previous.thresholds) {
            *value += (upper - *value) * k;
        }
    }
    thresholds
}

fn code_index(code: RsCode) -> usize {
    UEP_CODES.iter().position(|&c| c == code).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Sample {
    errors: f32,
    recovered: f32,
}

/// Windowed hysteresis controller over the UEP code ladder.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    window: [Sample; WINDOW_SIZE],
    cursor: usize,
    filled: usize,
    current: usize,
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new(RsCode::data_const(64))
    }
}

impl AdaptiveController {
    /// Starts from `initial`; codes outside the ladder start from the weakest one.
    pub fn new(initial: RsCode) -> Self {
        Self {
            window: [Sample::default(); WINDOW_SIZE],
            cursor: 0,
            filled: 0,
            current: code_index(initial),
        }
    }

    pub fn current(&self) -> RsCode {
        UEP_CODES[self.current]
    }

    /// Continues from `code`, e.g. after the caller changed parameters itself.
    pub fn set_current(&mut self, code: RsCode) {
        self.current = code_index(code);
    }

    /// Records one observation and returns the code for the next frame.
    ///
    /// `errors` is the fraction of corrupted bytes, `recovered` the fraction of
    /// tiles restored, `target` the fraction that must be restored. Nothing changes
    /// until the window holds four samples; after a change the window is treated as
    /// half full.
    ///
    /// The cadence is deliberate: the first evaluation happens on the fourth sample,
    /// and after each change on every second one.
    pub fn update(&mut self, errors: f32, recovered: f32, target: f32) -> RsCode {
        self.window[self.cursor] = Sample { errors, recovered };
        self.cursor = (self.cursor + 1) % WINDOW_SIZE;
        self.filled = (self.filled + 1).min(WINDOW_SIZE);
        if self.filled < WINDOW_SIZE {
            return self.current();
        }

        let count = WINDOW_SIZE as f32;
        let average_errors = self.window.iter().map(|s| s.errors).sum::<f32>() / count;
        let average_recovered = self.window.iter().map(|s| s.recovered).sum::<f32>() / count;

        let thresholds = error_thresholds(target);
        // Strongest code whose threshold the observed error rate still stays under.
        let guessed = (1..CODE_COUNT)
            .find(|&i| thresholds[i] > average_errors)
            .map_or(CODE_COUNT - 1, |i| i - 1);
        let upper_band = if target > 0.88 { 0.99 } else { target + 0.1 };

        let previous = self.current;
        if average_recovered < target {
            let step = (((target - average_recovered) * CODE_COUNT as f32).round() as usize).max(1);
            self.current = (previous + step).min(CODE_COUNT - 1).max(guessed);
            self.filled = WINDOW_SIZE / 2;
        } else if average_recovered > upper_band {
            self.current = (previous + guessed) / 2;
            self.filled = WINDOW_SIZE / 2;
        }

        if self.current != previous {
            debug!(
                average_errors,
                average_recovered,
                from = UEP_CODES[previous].n(),
                to = self.current().n(),
                "data protection changed"
            );
        }
        self.current()
    }

    /// Feeds a decoder report for a frame of `tile_count` tile-parts: the recovered
    /// fraction is the share restored without loss. Tile-parts skipped while
    /// resynchronizing never show up in the report, hence the explicit count.
    pub fn observe(&mut self, report: &DecodeReport, tile_count: usize, errors: f32, target: f32) -> RsCode {
        let recovered = if tile_count == 0 {
            if report.is_clean() { 1.0 } else { 0.0 }
        } else {
            report.tiles_fully_restored.min(tile_count) as f32 / tile_count as f32
        };
        self.update(errors, recovered, target)
    }

    /// Installs the selected code as the data protection of `params`.
    pub fn apply(&self, params: &mut EncoderParams) {
        params.data = Protection::Rs(self.current());
    }
}
