//! Append-only persistence of aggregated metrics and decisions.
//!
//! Three CSV logs live under the data directory:
//!
//! - `data.csv`: long form, one `name,value,timestamp` line per metric per tick
//! - `data_pivot.csv`: wide form, one `timestamp,<v1>,<v2>,...` line per tick
//! - `decisions.csv`: one `timestamp,score` line per applied decision
//!
//! Nothing here ever rewrites or deletes a line.

pub mod clock;
pub mod history;
pub mod logs;
pub mod row;

pub use clock::{Clock, TIMESTAMP_FORMAT};
pub use history::PivotHistory;
pub use logs::{LogStore, DECISION_HEADER};
pub use row::{format_score, format_value, PivotRow, SnapshotRow};
