//! Bounded in-memory tail of the pivot log.

use crate::storage::row::PivotRow;
use std::collections::VecDeque;
use std::sync::Mutex;

/// The most recent pivot rows, oldest first.
#[derive(Debug)]
pub struct PivotHistory {
    rows: Mutex<VecDeque<PivotRow>>,
    capacity: usize,
}

impl PivotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, row: PivotRow) {
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        if rows.len() == self.capacity {
            rows.pop_front();
        }
        rows.push_back(row);
    }

    pub fn extend(&self, rows: impl IntoIterator<Item = PivotRow>) {
        for row in rows {
            self.push(row);
        }
    }

    /// Up to `n` newest rows in chronological order.
    pub fn recent(&self, n: usize) -> Vec<PivotRow> {
        let rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        let skip = rows.len().saturating_sub(n);
        rows.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
