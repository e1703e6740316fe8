//! Snapshot rows and their CSV encodings.

use crate::collector::Snapshot;
use serde::{Deserialize, Serialize};

/// Render a metric value: integral values without a fractional part.
pub fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.3}")
    }
}

pub fn format_score(score: f64) -> String {
    format!("{score:.4}")
}

/// One aggregation tick: a value per collector, in frozen column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub timestamp: String,
    pub values: Vec<Snapshot>,
}

impl SnapshotRow {
    /// `name,value,timestamp` lines, newline-terminated.
    pub fn long_lines(&self) -> String {
        self.values
            .iter()
            .map(|s| format!("{},{},{}\n", s.name, format_value(s.value), self.timestamp))
            .collect()
    }

    /// `timestamp,<v1>,<v2>,...` line, newline-terminated.
    pub fn pivot_line(&self) -> String {
        self.to_pivot().to_line()
    }

    pub fn to_pivot(&self) -> PivotRow {
        PivotRow {
            timestamp: self.timestamp.clone(),
            values: self.values.iter().map(|s| s.value).collect(),
        }
    }
}

/// A pivot log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    pub timestamp: String,
    pub values: Vec<f64>,
}

impl PivotRow {
    pub fn to_line(&self) -> String {
        let mut line = self.timestamp.clone();
        for v in &self.values {
            line.push(',');
            line.push_str(&format_value(*v));
        }
        line.push('\n');
        line
    }

    /// Parse a line with exactly `width` values.
    pub fn parse(line: &str, width: usize) -> Option<Self> {
        let mut fields = line.trim_end_matches(['\r', '\n']).split(',');
        let timestamp = fields.next()?.to_string();
        let values = fields
            .map(|f| f.trim().parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()?;
        (values.len() == width).then_some(Self { timestamp, values })
    }
}

/// Header line of the pivot log for `columns`.
pub fn pivot_header(columns: &[String]) -> String {
    let mut header = String::from("timestamp");
    for c in columns {
        header.push(',');
        header.push_str(c);
    }
    header.push('\n');
    header
}
