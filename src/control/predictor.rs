//! Flow-state prediction from recent pivot history.
//!
//! The default model is a logistic regression over the pivot columns, with
//! every feature standardized by the mean and standard deviation seen in the
//! training set. A window score is the mean of the per-row probabilities.

use crate::config::Config;
use crate::error::PredictorError;
use crate::storage::PivotRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::function::logistic::logistic;
use statrs::statistics::Statistics;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const EPOCHS: usize = 1000;
const LEARNING_RATE: f64 = 0.1;

/// Label column of the training CSV.
pub const LABEL_COLUMN: &str = "flow_state";

/// Produces a flow score in `[0, 1]` from recent pivot rows.
pub trait Predictor: Send + Sync {
    /// Prepare the model for the frozen column set. Called once at startup.
    fn train(&mut self, columns: &[String]) -> Result<(), PredictorError>;

    fn predict(&self, rows: &[PivotRow], window_size: usize) -> Result<f64, PredictorError>;
}

/// Fitted logistic regression parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub samples: usize,
    pub trained_at: DateTime<Utc>,
}

impl LogisticModel {
    /// Fit by batch gradient descent on standardized features.
    pub fn fit(
        columns: &[String],
        features: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<Self, PredictorError> {
        if features.is_empty() {
            return Err(PredictorError::Training("no training rows".into()));
        }
        if features.len() != labels.len() {
            return Err(PredictorError::Training(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let width = columns.len();
        if let Some(row) = features.iter().find(|r| r.len() != width) {
            return Err(PredictorError::Training(format!(
                "row has {} values, expected {width}",
                row.len()
            )));
        }

        let mut means = Vec::with_capacity(width);
        let mut scales = Vec::with_capacity(width);
        for j in 0..width {
            let column: Vec<f64> = features.iter().map(|r| r[j]).collect();
            let mean = column.iter().mean();
            let sd = column.iter().std_dev();
            means.push(mean);
            // Constant columns (or a single row) carry no signal.
            scales.push(if sd.is_finite() && sd > 0.0 { sd } else { 1.0 });
        }

        let standardized: Vec<Vec<f64>> = features
            .iter()
            .map(|r| standardize(r, &means, &scales))
            .collect();

        let n = standardized.len() as f64;
        let mut weights = vec![0.0; width];
        let mut bias = 0.0;

        for _ in 0..EPOCHS {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for (x, y) in standardized.iter().zip(labels) {
                let err = logistic(linear(&weights, bias, x)) - y;
                for (g, xi) in grad_w.iter_mut().zip(x) {
                    *g += err * xi;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * g / n;
            }
            bias -= LEARNING_RATE * grad_b / n;
        }

        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(PredictorError::Training("fit diverged".into()));
        }

        Ok(Self {
            columns: columns.to_vec(),
            means,
            scales,
            weights,
            bias,
            samples: features.len(),
            trained_at: Utc::now(),
        })
    }

    /// Probability of flow for one row of values.
    pub fn score(&self, values: &[f64]) -> f64 {
        let x = standardize(values, &self.means, &self.scales);
        logistic(linear(&self.weights, self.bias, &x))
    }

    pub fn load(path: &Path) -> Result<Self, PredictorError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| PredictorError::InvalidInput(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), PredictorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PredictorError::Training(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn standardize(values: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    values
        .iter()
        .zip(means.iter().zip(scales))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

fn linear(weights: &[f64], bias: f64, x: &[f64]) -> f64 {
    bias + weights.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>()
}

/// Read a labelled `timestamp,<columns...>,flow_state` file.
///
/// Columns are matched by header name, so the file may order them freely or
/// carry extra ones. Rows that fail to parse are skipped.
pub fn read_training_csv(
    path: &Path,
    columns: &[String],
) -> Result<(Vec<Vec<f64>>, Vec<f64>), PredictorError> {
    let mut lines = BufReader::new(File::open(path)?).lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(PredictorError::Training("training file is empty".into())),
    };
    let header: Vec<&str> = header.trim_end_matches('\r').split(',').collect();
    let position = |name: &str| {
        header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                PredictorError::Training(format!("training data has no column '{name}'"))
            })
    };

    let indices = columns
        .iter()
        .map(|c| position(c.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let label_index = position(LABEL_COLUMN)?;

    let mut features = Vec::new();
    let mut labels = Vec::new();
    for line in lines {
        let line = line?;
        let fields: Vec<&str> = line.trim_end_matches('\r').split(',').collect();
        let parse = |i: usize| fields.get(i).and_then(|f| f.trim().parse::<f64>().ok());

        let row: Option<Vec<f64>> = indices.iter().map(|&i| parse(i)).collect();
        match (row, parse(label_index)) {
            (Some(row), Some(label)) if (0.0..=1.0).contains(&label) => {
                features.push(row);
                labels.push(label);
            }
            _ => tracing::debug!(line = %line, "skipping malformed training row"),
        }
    }

    Ok((features, labels))
}

/// Logistic regression trained from a CSV, persisted as `model.json`.
#[derive(Debug, Clone)]
pub struct LogisticPredictor {
    training_data: Option<PathBuf>,
    model_path: PathBuf,
    model: Option<LogisticModel>,
}

impl LogisticPredictor {
    pub fn new(training_data: Option<PathBuf>, model_path: PathBuf) -> Self {
        Self {
            training_data,
            model_path,
            model: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.training_data.clone(), config.model_path())
    }

    /// Use an already fitted model.
    pub fn with_model(mut self, model: LogisticModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn model(&self) -> Option<&LogisticModel> {
        self.model.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    fn fit_from_file(
        &self,
        path: &Path,
        columns: &[String],
    ) -> Result<LogisticModel, PredictorError> {
        let (features, labels) = read_training_csv(path, columns)?;
        let model = LogisticModel::fit(columns, &features, &labels)?;
        tracing::info!(
            path = %path.display(),
            samples = model.samples,
            "model trained"
        );
        if let Err(e) = model.save(&self.model_path) {
            tracing::warn!(error = %e, path = %self.model_path.display(), "could not save model");
        }
        Ok(model)
    }
}

impl Predictor for LogisticPredictor {
    fn train(&mut self, columns: &[String]) -> Result<(), PredictorError> {
        if let Some(path) = self.training_data.as_deref().filter(|p| p.exists()) {
            self.model = Some(self.fit_from_file(path, columns)?);
            return Ok(());
        }

        if self.model_path.exists() {
            let model = LogisticModel::load(&self.model_path)?;
            if model.columns == columns {
                tracing::info!(path = %self.model_path.display(), "loaded saved model");
                self.model = Some(model);
            } else {
                tracing::warn!(
                    saved = ?model.columns,
                    current = ?columns,
                    "saved model was trained on other columns, ignoring it"
                );
            }
            return Ok(());
        }

        tracing::info!("no training data or saved model, predictions disabled");
        Ok(())
    }

    fn predict(&self, rows: &[PivotRow], window_size: usize) -> Result<f64, PredictorError> {
        let model = self.model.as_ref().ok_or(PredictorError::Untrained)?;
        if window_size == 0 {
            return Err(PredictorError::InvalidInput("window size is zero".into()));
        }
        if rows.len() < window_size {
            return Err(PredictorError::InsufficientHistory {
                have: rows.len(),
                need: window_size,
            });
        }

        let window = &rows[rows.len() - window_size..];
        if let Some(row) = window.iter().find(|r| r.values.len() != model.columns.len()) {
            return Err(PredictorError::InvalidInput(format!(
                "row at {} has {} values, model expects {}",
                row.timestamp,
                row.values.len(),
                model.columns.len()
            )));
        }

        let score = window.iter().map(|r| model.score(&r.values)).mean();
        validate_score(score)
    }
}

/// Reject NaN and scores outside `[0, 1]`.
pub fn validate_score(score: f64) -> Result<f64, PredictorError> {
    if (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(PredictorError::InvalidScore(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["afk".into(), "keystrokes".into()]
    }

    /// Busy typing and present means flow.
    fn samples() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            features.push(vec![0.0, 200.0 + i as f64]);
            labels.push(1.0);
            features.push(vec![50.0 + i as f64, 5.0]);
            labels.push(0.0);
        }
        (features, labels)
    }

    fn rows(values: &[[f64; 2]]) -> Vec<PivotRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| PivotRow {
                timestamp: format!("t{i}"),
                values: v.to_vec(),
            })
            .collect()
    }

    fn trained() -> LogisticPredictor {
        let (features, labels) = samples();
        let model = LogisticModel::fit(&columns(), &features, &labels).unwrap();
        LogisticPredictor::new(None, PathBuf::from("unused.json")).with_model(model)
    }

    #[test]
    fn test_fit_separates_classes() {
        let predictor = trained();
        let model = predictor.model().unwrap();
        assert!(model.score(&[0.0, 210.0]) > 0.9);
        assert!(model.score(&[60.0, 5.0]) < 0.1);
    }

    #[test]
    fn test_predict_averages_window() {
        let predictor = trained();
        let history = rows(&[[60.0, 5.0], [0.0, 210.0], [0.0, 220.0]]);

        let score = predictor.predict(&history, 2).unwrap();
        assert!(score > 0.9);

        let score = predictor.predict(&history, 3).unwrap();
        assert!(score > 0.5 && score < 0.8);
    }

    #[test]
    fn test_insufficient_history() {
        let predictor = trained();
        let history = rows(&[[0.0, 210.0]]);
        assert!(matches!(
            predictor.predict(&history, 15),
            Err(PredictorError::InsufficientHistory { have: 1, need: 15 })
        ));
    }

    #[test]
    fn test_untrained_and_invalid_input() {
        let untrained = LogisticPredictor::new(None, PathBuf::from("unused.json"));
        assert!(matches!(
            untrained.predict(&rows(&[[0.0, 1.0]]), 1),
            Err(PredictorError::Untrained)
        ));

        let predictor = trained();
        let bad = vec![PivotRow {
            timestamp: "t0".into(),
            values: vec![1.0],
        }];
        assert!(matches!(
            predictor.predict(&bad, 1),
            Err(PredictorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_score() {
        assert!(validate_score(0.0).is_ok());
        assert!(validate_score(1.0).is_ok());
        assert!(matches!(validate_score(1.2), Err(PredictorError::InvalidScore(_))));
        assert!(validate_score(f64::NAN).is_err());
    }

    #[test]
    fn test_train_from_csv_saves_model() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("training.csv");
        let model_path = dir.path().join("model.json");

        // Extra and reordered columns are fine.
        let mut content = String::from("timestamp,keystrokes,extra,afk,flow_state\n");
        let (features, labels) = samples();
        for (i, (f, l)) in features.iter().zip(&labels).enumerate() {
            content.push_str(&format!("t{i},{},9,{},{}\n", f[1], f[0], l));
        }
        content.push_str("broken,row\n");
        std::fs::write(&csv, content).unwrap();

        let mut predictor = LogisticPredictor::new(Some(csv), model_path.clone());
        predictor.train(&columns()).unwrap();
        assert!(predictor.is_trained());
        assert_eq!(predictor.model().unwrap().samples, 40);

        // A second predictor without training data picks up the saved model.
        let mut reloaded = LogisticPredictor::new(None, model_path.clone());
        reloaded.train(&columns()).unwrap();
        let saved = reloaded.model().unwrap();
        let fitted = predictor.model().unwrap();
        assert_eq!(saved.columns, fitted.columns);
        for (a, b) in saved.weights.iter().zip(&fitted.weights) {
            assert!((a - b).abs() < 1e-9);
        }

        // Different columns ignore it.
        let mut other = LogisticPredictor::new(None, model_path);
        other.train(&["afk".to_string()]).unwrap();
        assert!(!other.is_trained());
    }

    #[test]
    fn test_training_requires_label_column() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("training.csv");
        std::fs::write(&csv, "timestamp,afk,keystrokes\nt0,1,2\n").unwrap();

        let mut predictor = LogisticPredictor::new(Some(csv), dir.path().join("model.json"));
        assert!(matches!(
            predictor.train(&columns()),
            Err(PredictorError::Training(_))
        ));
    }
}
