//! A bias-only baseline predictor.
//!
//! Predicts `mu + biases(u, i, t)` with the same temporal bias terms as
//! [`TimeSvdModel`](../timesvd/struct.TimeSvdModel.html) but no latent
//! factors, so it needs no implicit feedback and never draws random numbers.
use std::path::Path;

use failure;

use super::terms::{BiasTerms, TermValues};
use super::{load_model, save_model, GradientStep, Hyperparameters, Observation};
use crate::data::RecordStream;
use crate::statistics::UserItemStatistics;
use crate::training::{FitReport, Trainer};
use crate::{Day, FittingError, ItemId, PredictionError, RatingModel, UserId};

/// Bias-only rating model.
///
/// Build one through
/// [`Hyperparameters::build_baseline`](../struct.Hyperparameters.html#method.build_baseline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineModel {
    hyper: Hyperparameters,
    global_mean: f64,
    statistics: UserItemStatistics,
    biases: BiasTerms,
}

impl BaselineModel {
    pub(super) fn new(hyper: Hyperparameters, statistics: UserItemStatistics) -> Self {
        let biases = BiasTerms::new(
            hyper.num_users,
            hyper.num_items,
            hyper.num_time_bins(),
            hyper.num_frequency_bins,
        );

        BaselineModel {
            global_mean: hyper.resolve_global_mean(&statistics),
            hyper,
            statistics,
            biases,
        }
    }

    /// Hyperparameters the model was built with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// Global mean rating `mu`.
    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    /// The bias terms.
    pub fn biases(&self) -> &BiasTerms {
        &self.biases
    }

    /// Fit the model, see [`Trainer::fit`](../../training/struct.Trainer.html#method.fit).
    pub fn fit(
        &mut self,
        train: &mut RecordStream,
        validation: &mut RecordStream,
    ) -> Result<FitReport, FittingError> {
        Trainer::new(self.hyper.num_epochs).fit(self, train, validation)
    }

    /// Serialize the complete model to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), failure::Error> {
        save_model(self, path)
    }

    /// Load a model written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        load_model(path)
    }

    fn combine(&self, observation: &Observation, values: &TermValues) -> Result<f64, PredictionError> {
        let prediction = self.global_mean + self.biases.contribution(observation, values);

        if prediction.is_finite() {
            Ok(prediction)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }
}

impl RatingModel for BaselineModel {
    fn predict(&self, user: UserId, item: ItemId, day: Day) -> Result<f64, PredictionError> {
        let observation = self.hyper.observe(&self.statistics, user, item, day)?;
        let values = self.biases.values(&observation);

        self.combine(&observation, &values)
    }

    fn update(
        &mut self,
        user: UserId,
        item: ItemId,
        day: Day,
        rating: f64,
    ) -> Result<f64, PredictionError> {
        let observation = self.hyper.observe(&self.statistics, user, item, day)?;
        let values = self.biases.values(&observation);
        let prediction = self.combine(&observation, &values)?;

        let step = GradientStep::new(
            self.hyper.learning_rate,
            self.hyper.regularization,
            rating - prediction,
        );

        let updated = self.biases.step(&observation, &values, &step);
        self.biases.assign(&observation, &updated);

        Ok(step.residual())
    }
}
