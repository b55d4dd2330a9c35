//! Postprocess configuration: a closed option set with validated types and
//! defaults. Unrecognized keys fail at load time rather than being silently
//! ignored.
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::split::{SplitFractions, SplitMethod};
use crate::transform::{NormalizeFun, ProcessFun};

/// Split strategy selection: a name resolved against the closed strategy set,
/// plus its parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitMethodConfig {
    pub method: String,
    pub fractions: SplitFractions,
    #[serde(default)]
    pub seed: u64,
}

impl SplitMethodConfig {
    pub fn resolve(&self) -> Result<SplitMethod> {
        SplitMethod::from_name(&self.method, self.fractions, self.seed)
    }
}

/// Full configuration for one offline preprocessing run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostprocessConfig {
    /// Channel indices gated by the qualification filter, in catalog order.
    pub filter_channels: Vec<usize>,
    /// Minimum valid fraction per gated channel; same length as
    /// `filter_channels`.
    pub filter_percentages: Vec<f64>,
    pub split_method: SplitMethodConfig,
    /// Upper bound on the number of train images sampled for statistics.
    pub normalization_sample_size: usize,
    /// Seed for the statistics sample selection.
    #[serde(default)]
    pub sample_seed: u64,
    /// Ordered transform pipeline applied to every slice of every split.
    pub process_funs: Vec<ProcessFun>,
}

impl PostprocessConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::ConfigMismatch(format!("postprocess config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.filter_channels.len() != self.filter_percentages.len() {
            return Err(PipelineError::ConfigMismatch(format!(
                "{} filter channels but {} filter percentages",
                self.filter_channels.len(),
                self.filter_percentages.len()
            )));
        }
        for &p in &self.filter_percentages {
            if !(0.0..=1.0).contains(&p) {
                return Err(PipelineError::ConfigMismatch(format!(
                    "filter percentage {p} is outside [0, 1]"
                )));
            }
        }
        self.split_method.resolve()?;
        self.split_method.fractions.validate()?;
        let normalize_count = self
            .process_funs
            .iter()
            .filter(|f| matches!(f, ProcessFun::Normalize(_)))
            .count();
        if normalize_count > 1 {
            return Err(PipelineError::ConfigMismatch(
                "more than one normalize transform configured".to_owned(),
            ));
        }
        Ok(())
    }

    /// The normalize transform, if configured; its `stats_path` is where the
    /// statistics estimator persists its output.
    pub fn normalize_fun(&self) -> Option<&NormalizeFun> {
        self.process_funs.iter().find_map(|f| match f {
            ProcessFun::Normalize(n) => Some(n),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config_json() -> String {
        r#"{
            "filter_channels": [0, 1],
            "filter_percentages": [0.5, 0.5],
            "split_method": {
                "method": "random-by-id",
                "fractions": {"train": 0.8, "val": 0.1, "test": 0.1},
                "seed": 17
            },
            "normalization_sample_size": 200,
            "process_funs": [
                {"impute_missing": {"fill": 0.0}},
                {"normalize": {"stats_path": "stats/normalize.npy"}}
            ]
        }"#
        .to_owned()
    }

    #[test]
    fn well_formed_config_loads_and_validates() {
        let config = PostprocessConfig::from_json_str(&base_config_json()).unwrap();
        assert_eq!(config.filter_channels, [0, 1]);
        assert_eq!(config.normalization_sample_size, 200);
        assert_eq!(config.sample_seed, 0);
        let normalize = config.normalize_fun().unwrap();
        assert_eq!(normalize.stats_path, Path::new("stats/normalize.npy"));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let json = base_config_json().replacen(
            "\"filter_channels\"",
            "\"tile_zoom\": 10, \"filter_channels\"",
            1,
        );
        let err = PostprocessConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }

    #[test]
    fn unknown_strategy_fails_validation() {
        let json = base_config_json().replace("random-by-id", "round-robin");
        let err = PostprocessConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStrategy(_)));
    }

    #[test]
    fn filter_arity_mismatch_fails_validation() {
        let json = base_config_json().replace("[0.5, 0.5]", "[0.5]");
        let err = PostprocessConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }

    #[test]
    fn bad_fractions_fail_validation() {
        let json = base_config_json().replace("\"train\": 0.8", "\"train\": 0.5");
        let err = PostprocessConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFractions(_)));
    }

    #[test]
    fn duplicate_normalize_is_rejected() {
        let json = base_config_json().replace(
            r#"{"normalize": {"stats_path": "stats/normalize.npy"}}"#,
            r#"{"normalize": {"stats_path": "a.npy"}},
               {"normalize": {"stats_path": "b.npy"}}"#,
        );
        let err = PostprocessConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }
}
