//! Time-sampled attribute values.
//!
//! Samples are kept sorted by time. Inserting a time that is not strictly
//! greater than the last one is rejected, so a sample table can never hold
//! duplicates or out-of-order entries.

use crate::util::{Error, Result, TimeCode};

use super::Value;

/// Ordered mapping from time code to value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSamples {
    samples: Vec<(TimeCode, Value)>,
}

impl TimeSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pre-sorted samples, validating strict ordering.
    pub fn from_samples(samples: Vec<(TimeCode, Value)>) -> Result<Self> {
        let mut ts = Self { samples: Vec::with_capacity(samples.len()) };
        for (t, v) in samples {
            ts.push(t, v)?;
        }
        Ok(ts)
    }

    /// Append a sample; `time` must be finite and greater than the last time.
    pub fn push(&mut self, time: TimeCode, value: Value) -> Result<()> {
        if !time.is_finite() {
            return Err(Error::TimeSamples {
                path: String::new(),
                detail: format!("non-finite time {time}"),
            });
        }
        if let Some((last, _)) = self.samples.last() {
            if time <= *last {
                return Err(Error::TimeSamples {
                    path: String::new(),
                    detail: format!("time {time} does not follow {last}"),
                });
            }
        }
        self.samples.push((time, value));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<TimeCode> {
        self.samples.iter().map(|(t, _)| *t).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.samples.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeCode, &Value)> {
        self.samples.iter().map(|(t, v)| (*t, v))
    }

    pub fn first(&self) -> Option<&Value> {
        self.samples.first().map(|(_, v)| v)
    }

    /// Held value at `time`: the sample with the largest time `<= time`,
    /// or the first sample when `time` precedes all of them.
    pub fn value_at(&self, time: TimeCode) -> Option<&Value> {
        let idx = self.samples.partition_point(|(t, _)| *t <= time);
        if idx == 0 {
            self.first()
        } else {
            Some(&self.samples[idx - 1].1)
        }
    }

    /// Whether the samples cover `[start, end]` inclusively at `step`.
    pub fn covers(&self, start: TimeCode, end: TimeCode, step: TimeCode) -> bool {
        let times = self.times();
        times == frame_times(start, end, step)
    }

    /// Whether every sample holds the same value.
    pub fn is_constant(&self) -> bool {
        match self.samples.first() {
            Some((_, first)) => self.samples.iter().all(|(_, v)| v == first),
            None => true,
        }
    }
}

/// Frame times from `start` to `end` inclusive at `step`; `end` is always
/// included even when the range is not a multiple of `step`.
pub fn frame_times(start: TimeCode, end: TimeCode, step: TimeCode) -> Vec<TimeCode> {
    let step = if step > 0.0 { step } else { 1.0 };
    let mut out = Vec::new();
    if end < start {
        out.push(start);
        return out;
    }
    let count = ((end - start) / step).floor() as usize;
    for i in 0..=count {
        out.push(start + i as f64 * step);
    }
    if let Some(&last) = out.last() {
        if (end - last).abs() > 1e-9 {
            out.push(end);
        }
    }
    out
}
