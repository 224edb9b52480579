use serde::Serialize;

use super::Timestamp;

/// Chronological window of `(timestamp, value)` points for one source.
///
/// Stored as two parallel vectors so the condition algorithms can work on the
/// value slice directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeries {
    timestamps: Vec<Timestamp>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Build a series from parallel vectors. Extra entries in the longer
    /// vector are dropped.
    pub fn new(mut timestamps: Vec<Timestamp>, mut values: Vec<f64>) -> Self {
        let len = timestamps.len().min(values.len());
        timestamps.truncate(len);
        values.truncate(len);
        Self { timestamps, values }
    }

    pub fn from_points(points: impl IntoIterator<Item = (Timestamp, f64)>) -> Self {
        let (timestamps, values) = points.into_iter().unzip();
        Self { timestamps, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn point(&self, index: usize) -> Option<(Timestamp, f64)> {
        Some((*self.timestamps.get(index)?, *self.values.get(index)?))
    }

    /// Keep only the most recent `n` points.
    pub fn last(mut self, n: usize) -> Self {
        let skip = self.len().saturating_sub(n);
        if skip > 0 {
            self.timestamps.drain(..skip);
            self.values.drain(..skip);
        }
        self
    }

    /// Pair this series' values with `reference`'s timestamps, position by
    /// position. The result has the shorter of the two lengths.
    pub fn align_to(&self, reference: &TimeSeries) -> Self {
        Self::new(reference.timestamps.clone(), self.values.clone())
    }
}
