//! Prediction and focus-mode control.

pub mod decision;
pub mod mode;
pub mod predictor;

pub use decision::{ControlLoop, Decision};
pub use mode::{CommandModeSetter, FocusMode, LogModeSetter, ModeSetter};
pub use predictor::{
    read_training_csv, validate_score, LogisticModel, LogisticPredictor, Predictor, LABEL_COLUMN,
};
