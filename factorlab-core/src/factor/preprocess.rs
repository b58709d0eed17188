use crate::domain::Panel;
use crate::ops::{OperatorError, UnaryOp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cross-sectional cleanup applied to raw factor values, in field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    /// Quantile band to clip to, e.g. `(0.01, 0.99)`.
    #[serde(default)]
    pub winsorize: Option<(f64, f64)>,
    /// Demean within industry groups.
    #[serde(default)]
    pub neutralize: bool,
    /// Cross-sectional z-score.
    #[serde(default)]
    pub standardize: bool,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            winsorize: Some((0.01, 0.99)),
            neutralize: false,
            standardize: true,
        }
    }
}

impl Preprocessor {
    /// Pass-through: no steps enabled.
    pub fn identity() -> Self {
        Self {
            winsorize: None,
            neutralize: false,
            standardize: false,
        }
    }

    pub fn apply(
        &self,
        factor: &Panel,
        groups: Option<&BTreeMap<String, String>>,
    ) -> Result<Panel, OperatorError> {
        let mut out = factor.clone();
        if let Some((lower, upper)) = self.winsorize {
            out = UnaryOp::Winsorize { lower, upper }.apply(&out, groups)?;
        }
        if self.neutralize {
            out = UnaryOp::IndustryNeutralize.apply(&out, groups)?;
        }
        if self.standardize {
            out = UnaryOp::Zscore.apply(&out, groups)?;
        }
        Ok(out)
    }
}
