//! ONNX-backed ranker built on tract-onnx.

use super::{RankingError, Ranker, Result, FEATURE_VECTOR_SIZE};
use ndarray::{Array1, Array2};
use std::path::Path;
use tracing::info;
use tract_onnx::prelude::{tvec, Framework, InferenceModelExt, Tensor};

type OnnxPlan = tract_onnx::prelude::SimplePlan<
    tract_onnx::prelude::TypedFact,
    Box<dyn tract_onnx::prelude::TypedOp>,
    tract_onnx::prelude::Graph<
        tract_onnx::prelude::TypedFact,
        Box<dyn tract_onnx::prelude::TypedOp>,
    >,
>;

/// Trained ranking model exported to ONNX.
pub struct OnnxRanker {
    plan: OnnxPlan,
}

impl OnnxRanker {
    /// Load and optimize the exported model. Callers decide what model
    /// absence means; here a missing or unreadable file is simply an error.
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(RankingError::ModelLoadError(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| RankingError::ModelLoadError(e.to_string()))?;

        info!("loaded ONNX ranking model from {}", path.display());

        Ok(Self { plan })
    }
}

impl Ranker for OnnxRanker {
    fn predict(&self, features: Array2<f32>) -> Result<Array1<f32>> {
        let batch_size = features.shape()[0];

        if features.shape()[1] != FEATURE_VECTOR_SIZE {
            return Err(RankingError::InvalidInput(format!(
                "expected {} features per row, got {}",
                FEATURE_VECTOR_SIZE,
                features.shape()[1]
            )));
        }

        let input_tensor = tract_onnx::prelude::tract_ndarray::Array2::from_shape_fn(
            (batch_size, FEATURE_VECTOR_SIZE),
            |(i, j)| features[[i, j]],
        );

        let input = tvec![Tensor::from(input_tensor.into_dyn()).into()];
        let output = self
            .plan
            .run(input)
            .map_err(|e| RankingError::InferenceError(format!("ONNX inference failed: {e}")))?;

        let scores_tensor = output[0]
            .to_array_view::<f32>()
            .map_err(|e| RankingError::InferenceError(format!("output extraction failed: {e}")))?;

        let scores = Array1::from_iter(scores_tensor.iter().copied());

        if scores.len() != batch_size {
            return Err(RankingError::InferenceError(format!(
                "model returned {} scores for {} rows",
                scores.len(),
                batch_size
            )));
        }

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model_errors() {
        let result = OnnxRanker::load("does/not/exist.onnx");
        assert!(matches!(result, Err(RankingError::ModelLoadError(_))));
    }
}
