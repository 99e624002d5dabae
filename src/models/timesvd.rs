//! The timeSVD++ model.
//!
//! Predictions combine the global mean, the bias terms and a latent factor
//! interaction between the item and the user, where the user side is the
//! user's own factor vector plus the normalized sum of the implicit factors
//! of every item the user interacted with:
//!
//! ```text
//! r(u, i, t) = mu + biases(u, i, t) + q_i . (p_u + |N(u)|^-1/2 * sum_{j in N(u)} y_j)
//! ```
use std::path::Path;

use failure;
use ndarray::{Array1, Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xorshift::XorShiftRng;

use super::terms::{BiasTerms, TermValues};
use super::{load_model, save_model, GradientStep, Hyperparameters, Observation};
use crate::data::RecordStream;
use crate::statistics::UserItemStatistics;
use crate::training::{FitReport, Trainer};
use crate::{Day, FittingError, ItemId, PredictionError, RatingModel, UserId};

fn embedding_init<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    if cols == 0 {
        return Array2::zeros((rows, 0));
    }

    let std = 1.0 / cols as f64;

    Array2::from_shape_fn((rows, cols), |_| {
        let draw: f64 = rng.sample(StandardNormal);
        draw * std
    })
}

/// A fitted (or freshly initialized) timeSVD++ model.
///
/// Build one through
/// [`Hyperparameters::build`](../struct.Hyperparameters.html#method.build).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSvdModel {
    hyper: Hyperparameters,
    global_mean: f64,
    statistics: UserItemStatistics,
    biases: BiasTerms,
    user_factors: Array2<f64>,
    item_factors: Array2<f64>,
    implicit_factors: Array2<f64>,
}

impl TimeSvdModel {
    pub(super) fn new(hyper: Hyperparameters, statistics: UserItemStatistics) -> Self {
        let mut rng = XorShiftRng::seed_from_u64(hyper.seed);

        let user_factors = embedding_init(hyper.num_users, hyper.latent_dim, &mut rng);
        let item_factors = embedding_init(hyper.num_items, hyper.latent_dim, &mut rng);
        let implicit_factors = embedding_init(hyper.num_items, hyper.latent_dim, &mut rng);

        let biases = BiasTerms::new(
            hyper.num_users,
            hyper.num_items,
            hyper.num_time_bins(),
            hyper.num_frequency_bins,
        );

        TimeSvdModel {
            global_mean: hyper.resolve_global_mean(&statistics),
            hyper,
            statistics,
            biases,
            user_factors,
            item_factors,
            implicit_factors,
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

    /// Training statistics the model was built from.
    pub fn statistics(&self) -> &UserItemStatistics {
        &self.statistics
    }

    /// The bias terms.
    pub fn biases(&self) -> &BiasTerms {
        &self.biases
    }

    /// User factors `p_u`, one row per user.
    pub fn user_factors(&self) -> ArrayView2<f64> {
        self.user_factors.view()
    }

    /// Item factors `q_i`, one row per item.
    pub fn item_factors(&self) -> ArrayView2<f64> {
        self.item_factors.view()
    }

    /// Implicit feedback factors `y_j`, one row per item.
    pub fn implicit_factors(&self) -> ArrayView2<f64> {
        self.implicit_factors.view()
    }

    /// Fit the model by streaming SGD over `train`, stopping early when the
    /// error on `validation` increases.
    pub fn fit(
        &mut self,
        train: &mut RecordStream,
        validation: &mut RecordStream,
    ) -> Result<FitReport, FittingError> {
        let mut trainer = Trainer::new(self.hyper.num_epochs);

        trainer.fit(self, train, validation)
    }

    /// Serialize the complete model to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), failure::Error> {
        save_model(self, path)
    }

    /// Load a model written by [`save`](#method.save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        load_model(path)
    }

    /// `|N(u)|^-1/2 * sum_{j in N(u)} y_j` for the zero-based `observation.user`.
    fn implicit_aggregate(&self, observation: &Observation) -> Result<Array1<f64>, PredictionError> {
        let latent_dim = self.hyper.latent_dim;

        if latent_dim == 0 {
            return Ok(Array1::zeros(0));
        }

        let items = self.statistics.implicit_items(observation.user + 1);

        if items.is_empty() {
            return Err(PredictionError::EmptyImplicitSet {
                user: observation.user + 1,
            });
        }

        let mut aggregate = Array1::zeros(latent_dim);

        for &item in items {
            aggregate += &self.implicit_factors.row(item);
        }

        aggregate /= (items.len() as f64).sqrt();

        Ok(aggregate)
    }

    fn combine(
        &self,
        observation: &Observation,
        values: &TermValues,
        implicit: &Array1<f64>,
    ) -> Result<f64, PredictionError> {
        let user_factor = &self.user_factors.row(observation.user) + implicit;
        let interaction = self.item_factors.row(observation.item).dot(&user_factor);

        let prediction =
            self.global_mean + self.biases.contribution(observation, values) + interaction;

        if prediction.is_finite() {
            Ok(prediction)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }
}

impl RatingModel for TimeSvdModel {
    fn predict(&self, user: UserId, item: ItemId, day: Day) -> Result<f64, PredictionError> {
        let observation = self.hyper.observe(&self.statistics, user, item, day)?;
        let values = self.biases.values(&observation);
        let implicit = self.implicit_aggregate(&observation)?;

        self.combine(&observation, &values, &implicit)
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
        let implicit = self.implicit_aggregate(&observation)?;
        let prediction = self.combine(&observation, &values, &implicit)?;

        let step = GradientStep::new(
            self.hyper.learning_rate,
            self.hyper.regularization,
            rating - prediction,
        );

        let biases = self.biases.step(&observation, &values, &step);

        let (user_factor, item_factor, implicit_factors) = {
            let user_factor = self.user_factors.row(observation.user);
            let item_factor = self.item_factors.row(observation.item);
            let user_term = &user_factor + &implicit;

            let implicit_factors: Vec<(usize, Array1<f64>)> = if self.hyper.latent_dim == 0 {
                Vec::new()
            } else {
                let items = self.statistics.implicit_items(user);
                let coefficient = &item_factor / (items.len() as f64).sqrt();

                items
                    .iter()
                    .map(|&implicit_item| {
                        let factor = self.implicit_factors.row(implicit_item);
                        (implicit_item, step.vector(factor, coefficient.view()))
                    })
                    .collect()
            };

            (
                step.vector(user_factor, item_factor),
                step.vector(item_factor, user_term.view()),
                implicit_factors,
            )
        };

        self.biases.assign(&observation, &biases);
        self.user_factors
            .row_mut(observation.user)
            .assign(&user_factor);
        self.item_factors
            .row_mut(observation.item)
            .assign(&item_factor);
        for (implicit_item, factor) in implicit_factors {
            self.implicit_factors.row_mut(implicit_item).assign(&factor);
        }

        Ok(step.residual())
    }
}
