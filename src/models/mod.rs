//! Models module.
//!
//! Both models share the [`Hyperparameters`](struct.Hyperparameters.html)
//! builder, the bias terms of the [`terms`](terms/index.html) module and the
//! gradient step defined here:
//!
//! ```text
//! param <- param - learning_rate * (regularization * param - residual * coefficient)
//! ```
//!
//! where `coefficient` is the partial derivative of the prediction with
//! respect to `param`.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode;
use failure;
use ndarray::{Array1, ArrayView1};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::statistics::UserItemStatistics;
use crate::{Day, FittingError, ItemId, PredictionError, UserId};

pub mod baseline;
pub mod terms;
pub mod timesvd;

use self::baseline::BaselineModel;
use self::timesvd::TimeSvdModel;

/// Sign-preserving power-law deviation of `time` from `mean_time`:
/// `sign(t - t_u) * |t - t_u|^exponent`.
pub fn deviation(time: f64, mean_time: f64, exponent: f64) -> f64 {
    let difference = time - mean_time;

    if difference == 0.0 {
        0.0
    } else {
        difference.signum() * difference.abs().powf(exponent)
    }
}

/// Version tag written ahead of every saved model.
const FORMAT_VERSION: u32 = 1;

fn save_model<T: Serialize, P: AsRef<Path>>(model: &T, path: P) -> Result<(), failure::Error> {
    let mut writer = BufWriter::new(File::create(path)?);

    bincode::serialize_into(&mut writer, &FORMAT_VERSION)?;
    bincode::serialize_into(&mut writer, model)?;
    writer.flush()?;

    Ok(())
}

fn load_model<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, failure::Error> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);

    let version: u32 = bincode::deserialize_from(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(format_err!(
            "{}: unsupported model format version {}",
            path.display(),
            version
        ));
    }

    Ok(bincode::deserialize_from(&mut reader)?)
}

/// The indices and temporal features of a single `(user, item, day)` triple.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    /// Zero-based user index.
    pub user: usize,
    /// Zero-based item index.
    pub item: usize,
    /// Day of the rating.
    pub day: Day,
    /// Item-bias time bin of `day`.
    pub time_bin: usize,
    /// Frequency bin of the user's rating count on `day`.
    pub frequency_bin: usize,
    /// `dev(day, t_u)`; zero for users without training ratings.
    pub deviation: f64,
}

/// A single regularized gradient step driven by one residual.
#[derive(Clone, Copy, Debug)]
pub struct GradientStep {
    learning_rate: f64,
    regularization: f64,
    residual: f64,
}

impl GradientStep {
    /// A step driven by `residual`, the observed minus the predicted rating.
    pub fn new(learning_rate: f64, regularization: f64, residual: f64) -> Self {
        GradientStep {
            learning_rate,
            regularization,
            residual,
        }
    }

    /// The residual driving the step.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// The updated value of a scalar parameter.
    pub fn scalar(&self, value: f64, coefficient: f64) -> f64 {
        value - self.learning_rate * (self.regularization * value - self.residual * coefficient)
    }

    /// The updated value of a vector parameter; `coefficient` holds the
    /// partial derivatives for each component.
    pub fn vector(&self, value: ArrayView1<f64>, coefficient: ArrayView1<f64>) -> Array1<f64> {
        izip!(value.iter(), coefficient.iter())
            .map(|(&value, &coefficient)| self.scalar(value, coefficient))
            .collect()
    }
}

/// Hyperparameters shared by the timeSVD++ and baseline models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_users: usize,
    num_items: usize,
    latent_dim: usize,
    learning_rate: f64,
    regularization: f64,
    num_epochs: usize,
    bin_width: Day,
    max_day: Day,
    drift_exponent: f64,
    frequency_base: f64,
    num_frequency_bins: usize,
    global_mean: Option<f64>,
    seed: u64,
}

impl Hyperparameters {
    /// Build new hyperparameters for `num_users` users and `num_items` items.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Hyperparameters {
            num_users,
            num_items,
            latent_dim: 100,
            learning_rate: 0.007,
            regularization: 0.01,
            num_epochs: 10,
            bin_width: 75,
            max_day: 2243,
            drift_exponent: 0.4,
            frequency_base: 6.76,
            num_frequency_bins: 5,
            global_mean: None,
            seed: 42,
        }
    }

    /// Set the number of latent factors, `K`. Zero leaves only the bias terms.
    pub fn latent_dim(mut self, latent_dim: usize) -> Self {
        self.latent_dim = latent_dim;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    /// Set the maximum number of epochs per `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the width, in days, of the item-bias time bins.
    pub fn bin_width(mut self, bin_width: Day) -> Self {
        self.bin_width = bin_width.max(1);
        self
    }

    /// Set the last day the model accepts.
    pub fn max_day(mut self, max_day: Day) -> Self {
        self.max_day = max_day;
        self
    }

    /// Set the exponent of the user drift deviation.
    pub fn drift_exponent(mut self, drift_exponent: f64) -> Self {
        self.drift_exponent = drift_exponent;
        self
    }

    /// Set the logarithm base of the frequency bins. `build` rejects values
    /// not greater than 1.
    pub fn frequency_base(mut self, frequency_base: f64) -> Self {
        self.frequency_base = frequency_base;
        self
    }

    /// Set the number of frequency bins.
    pub fn num_frequency_bins(mut self, num_frequency_bins: usize) -> Self {
        self.num_frequency_bins = num_frequency_bins.max(1);
        self
    }

    /// Fix the global mean rating instead of taking it from the statistics.
    pub fn global_mean(mut self, global_mean: f64) -> Self {
        self.global_mean = Some(global_mean);
        self
    }

    /// Set the seed of the parameter initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Number of item-bias time bins covering days `0..=max_day`.
    pub fn num_time_bins(&self) -> usize {
        (self.max_day / self.bin_width) as usize + 1
    }

    /// Build the timeSVD++ model.
    pub fn build(self, statistics: UserItemStatistics) -> Result<TimeSvdModel, FittingError> {
        self.validate(&statistics)?;

        Ok(TimeSvdModel::new(self, statistics))
    }

    /// Build the bias-only baseline model.
    pub fn build_baseline(
        self,
        statistics: UserItemStatistics,
    ) -> Result<BaselineModel, FittingError> {
        self.validate(&statistics)?;

        Ok(BaselineModel::new(self, statistics))
    }

    fn validate(&self, statistics: &UserItemStatistics) -> Result<(), FittingError> {
        // The frequency bin divides by ln(base).
        if !(self.frequency_base > 1.0) {
            return Err(FittingError::InvalidHyperparameter {
                name: "frequency_base",
                value: self.frequency_base,
                reason: "must be greater than 1",
            });
        }
        if statistics.num_users() != self.num_users || statistics.num_items() != self.num_items {
            return Err(FittingError::DimensionMismatch {
                expected_users: self.num_users,
                expected_items: self.num_items,
                found_users: statistics.num_users(),
                found_items: statistics.num_items(),
            });
        }

        Ok(())
    }

    fn resolve_global_mean(&self, statistics: &UserItemStatistics) -> f64 {
        self.global_mean
            .unwrap_or_else(|| statistics.mean_rating())
    }

    fn frequency_bin(&self, frequency: u32) -> usize {
        if frequency <= 1 {
            return 0;
        }

        let bin = (f64::from(frequency).ln() / self.frequency_base.ln()).floor() as usize;

        bin.min(self.num_frequency_bins - 1)
    }

    /// Validate a `(user, item, day)` triple and compute its temporal features.
    pub fn observe(
        &self,
        statistics: &UserItemStatistics,
        user: UserId,
        item: ItemId,
        day: Day,
    ) -> Result<Observation, PredictionError> {
        if !statistics.has_user(user) {
            return Err(PredictionError::UserOutOfRange {
                user,
                num_users: self.num_users,
            });
        }
        if !statistics.has_item(item) {
            return Err(PredictionError::ItemOutOfRange {
                item,
                num_items: self.num_items,
            });
        }
        if day > self.max_day {
            return Err(PredictionError::DayOutOfRange {
                day,
                max_day: self.max_day,
            });
        }

        let deviation = statistics.mean_day(user).map_or(0.0, |mean_day| {
            deviation(f64::from(day), mean_day, self.drift_exponent)
        });

        Ok(Observation {
            user: user - 1,
            item: item - 1,
            day,
            time_bin: (day / self.bin_width) as usize,
            frequency_bin: self.frequency_bin(statistics.day_frequency(user, day)),
            deviation,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::data::testing::*;
    use crate::data::Record;

    proptest! {
        #[test]
        fn deviation_is_antisymmetric(
            mean_time in 0u32..3000,
            offset in 0u32..3000,
            exponent in 0.05f64..1.0,
        ) {
            let mean_time = f64::from(mean_time);
            let offset = f64::from(offset);

            let after = deviation(mean_time + offset, mean_time, exponent);
            let before = deviation(mean_time - offset, mean_time, exponent);

            prop_assert_eq!(after, -before);
            prop_assert!(after >= 0.0);
        }

        #[test]
        fn deviation_grows_with_distance(
            mean_time in 0u32..3000,
            near in 0u32..1000,
            extra in 1u32..1000,
        ) {
            let mean_time = f64::from(mean_time);
            let near_deviation = deviation(mean_time + f64::from(near), mean_time, 0.4);
            let far_deviation = deviation(mean_time + f64::from(near + extra), mean_time, 0.4);

            prop_assert!(far_deviation > near_deviation);
        }
    }

    #[test]
    fn deviation_vanishes_at_the_mean() {
        assert_eq!(deviation(10.0, 10.0, 0.4), 0.0);
        assert_eq!(deviation(1234.5, 1234.5, 0.9), 0.0);
        assert!((deviation(42.0, 10.0, 0.4) - 32.0_f64.powf(0.4)).abs() < 1e-12);
    }

    #[test]
    fn gradient_step_matches_closed_form() {
        let step = GradientStep::new(0.1, 0.5, 2.0);

        assert!((step.scalar(1.0, 3.0) - (1.0 - 0.1 * (0.5 - 6.0))).abs() < 1e-12);

        let value = Array1::from(vec![1.0, -1.0]);
        let coefficient = Array1::from(vec![0.0, 2.0]);
        let updated = step.vector(value.view(), coefficient.view());

        assert!((updated[0] - 0.95).abs() < 1e-12);
        assert!((updated[1] - (-1.0 - 0.1 * (-0.5 - 4.0))).abs() < 1e-12);
    }

    #[test]
    fn observation_features() {
        let (_file, mut train) = labeled_stream(&[
            Record::labeled(1, 1, 100, 4),
            Record::labeled(1, 2, 100, 4),
            Record::labeled(1, 3, 100, 4),
            Record::labeled(1, 1, 300, 4),
        ]);
        let statistics = UserItemStatistics::from_stream(&mut train, 2, 3).unwrap();

        let hyper = Hyperparameters::new(2, 3)
            .bin_width(50)
            .max_day(400)
            .frequency_base(2.0)
            .num_frequency_bins(2);

        assert_eq!(hyper.num_time_bins(), 9);

        let observation = hyper.observe(&statistics, 1, 2, 100).unwrap();
        assert_eq!(observation.user, 0);
        assert_eq!(observation.item, 1);
        assert_eq!(observation.time_bin, 2);
        // Three ratings on day 100: floor(log2(3)) = 1.
        assert_eq!(observation.frequency_bin, 1);
        assert!((observation.deviation - deviation(100.0, 150.0, 0.4)).abs() < 1e-12);

        let observation = hyper.observe(&statistics, 1, 1, 300).unwrap();
        assert_eq!(observation.frequency_bin, 0);

        let cold = hyper.observe(&statistics, 2, 1, 400).unwrap();
        assert_eq!(cold.deviation, 0.0);
        assert_eq!(cold.time_bin, 8);
    }

    #[test]
    fn frequency_bins_are_capped() {
        let hyper = Hyperparameters::new(1, 1)
            .frequency_base(2.0)
            .num_frequency_bins(3);

        assert_eq!(hyper.frequency_bin(0), 0);
        assert_eq!(hyper.frequency_bin(1), 0);
        assert_eq!(hyper.frequency_bin(2), 1);
        assert_eq!(hyper.frequency_bin(5), 2);
        assert_eq!(hyper.frequency_bin(1000), 2);
    }

    #[test]
    fn observation_rejects_out_of_range_inputs() {
        let (_file, mut train) = labeled_stream(&[Record::labeled(1, 1, 10, 4)]);
        let statistics = UserItemStatistics::from_stream(&mut train, 2, 2).unwrap();
        let hyper = Hyperparameters::new(2, 2).max_day(100);

        match hyper.observe(&statistics, 3, 1, 10) {
            Err(PredictionError::UserOutOfRange { user: 3, num_users: 2 }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        match hyper.observe(&statistics, 1, 0, 10) {
            Err(PredictionError::ItemOutOfRange { item: 0, .. }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        match hyper.observe(&statistics, 1, 1, 101) {
            Err(PredictionError::DayOutOfRange { day: 101, max_day: 100 }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn build_rejects_mismatched_statistics() {
        let (_file, mut train) = labeled_stream(&[Record::labeled(1, 1, 10, 4)]);
        let statistics = UserItemStatistics::from_stream(&mut train, 2, 2).unwrap();

        match Hyperparameters::new(3, 2).build(statistics) {
            Err(FittingError::DimensionMismatch { expected_users: 3, .. }) => {}
            Err(other) => panic!("Unexpected error {:?}", other),
            Ok(_) => panic!("Built a model with mismatched statistics"),
        }
    }

    #[test]
    fn build_rejects_unusable_frequency_bases() {
        let (_file, mut train) = labeled_stream(&[Record::labeled(1, 1, 10, 4)]);
        let statistics = UserItemStatistics::from_stream(&mut train, 1, 1).unwrap();

        for &base in &[1.0, 0.5, 0.0, -2.0, std::f64::NAN] {
            match Hyperparameters::new(1, 1)
                .frequency_base(base)
                .build(statistics.clone())
            {
                Err(FittingError::InvalidHyperparameter {
                    name: "frequency_base",
                    ..
                }) => {}
                Err(other) => panic!("Unexpected error {:?}", other),
                Ok(_) => panic!("Built a model with frequency base {}", base),
            }
            match Hyperparameters::new(1, 1)
                .frequency_base(base)
                .build_baseline(statistics.clone())
            {
                Err(FittingError::InvalidHyperparameter {
                    name: "frequency_base",
                    ..
                }) => {}
                Err(other) => panic!("Unexpected error {:?}", other),
                Ok(_) => panic!("Built a baseline with frequency base {}", base),
            }
        }

        assert!(Hyperparameters::new(1, 1)
            .frequency_base(1.5)
            .build_baseline(statistics)
            .is_ok());
    }
}
