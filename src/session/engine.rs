//! The distributed training engine API.

use std::{collections::BTreeMap, path::Path};

/// The error type of the training engine. The engine is an external library whose failures
/// are passed through as they are.
pub type EngineError = anyhow::Error;

/// The result of an engine operation.
pub type EngineResult<T> = Result<T, EngineError>;

/// The training parameters of the engine, e.g. `max_depth` or `objective`.
pub type TrainParams = BTreeMap<String, String>;

/// A dense matrix of feature rows with one label per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataMatrix {
    rows: Vec<Vec<f32>>,
    labels: Vec<f32>,
}

impl DataMatrix {
    /// Creates a matrix from its rows and labels.
    ///
    /// # Panics
    /// Panics if the number of rows and labels differ.
    pub(crate) fn new(rows: Vec<Vec<f32>>, labels: Vec<f32>) -> Self {
        assert_eq!(rows.len(), labels.len(), "every row needs a label");
        Self { rows, labels }
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// The number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The number of features per row.
    pub fn columns(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or_default()
    }
}

#[cfg_attr(test, mockall::automock(type Model = Vec<u8>;))]
/// A distributed training engine, seen from one worker of the training job.
///
/// The engine synchronizes the workers itself: every worker runs the same sequence of
/// operations on its own shard of the data.
pub trait TrainingEngine {
    /// The trained model.
    type Model;

    /// Connects the worker to the other workers of the job.
    fn init(&mut self) -> EngineResult<()>;

    /// The zero-based rank of the worker.
    fn rank(&self) -> u32;

    /// The number of workers of the job.
    fn world_size(&self) -> u32;

    fn train(
        &mut self,
        data: &DataMatrix,
        params: &TrainParams,
        rounds: u32,
    ) -> EngineResult<Self::Model>;

    fn predict(&self, model: &Self::Model, data: &DataMatrix) -> EngineResult<Vec<f32>>;

    /// Evaluates the model on `data`, returning the evaluation report of the engine.
    fn evaluate(&self, model: &Self::Model, data: &DataMatrix) -> EngineResult<String>;

    fn save_model(&self, model: &Self::Model, path: &Path) -> EngineResult<()>;

    fn load_model(&self, path: &Path) -> EngineResult<Self::Model>;

    /// Disconnects the worker from the other workers of the job.
    fn finalize(&mut self) -> EngineResult<()>;
}
