#![deny(missing_docs)]
//! # timesvd
//!
//! `timesvd` fits a temporal latent-factor model (timeSVD++) to a large,
//! sparse set of `(user, item, day, rating)` observations and predicts the
//! missing ratings.
//!
//! The model combines a stack of user, item and time-dependent biases with a
//! pair of latent factor matrices and implicit-feedback vectors. It is fitted
//! by streaming stochastic gradient descent over a rating file, one record at
//! a time, with early stopping on a held-out validation file.
//!
//! ## Example
//!
//! ```rust,no_run
//! # extern crate timesvd;
//! use timesvd::data::{RecordLayout, RecordStream};
//! use timesvd::evaluation::mse_score;
//! use timesvd::models::Hyperparameters;
//! use timesvd::statistics::UserItemStatistics;
//!
//! let (num_users, num_items) = (458_293, 17_770);
//!
//! let mut train = RecordStream::open("train.dta", RecordLayout::Labeled)
//!     .unwrap()
//!     .with_bounds(num_users, num_items);
//! let mut validation = RecordStream::open("probe.dta", RecordLayout::Labeled)
//!     .unwrap()
//!     .with_bounds(num_users, num_items);
//!
//! let statistics = UserItemStatistics::from_stream(&mut train, num_users, num_items).unwrap();
//!
//! let mut model = Hyperparameters::new(num_users, num_items)
//!     .latent_dim(100)
//!     .learning_rate(0.007)
//!     .regularization(0.01)
//!     .num_epochs(10)
//!     .seed(42)
//!     .build(statistics)
//!     .unwrap();
//!
//! let report = model.fit(&mut train, &mut validation).unwrap();
//! let probe_mse = mse_score(&model, &mut validation).unwrap();
//!
//! println!("Stopped in {:?} with probe RMSE {}", report.state, probe_mse.sqrt());
//! ```

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate bincode;
extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rand_distr;
extern crate rand_xorshift;
extern crate serde;

#[cfg(test)]
extern crate proptest;
#[cfg(test)]
extern crate tempfile;

pub mod data;
pub mod evaluation;
pub mod models;
pub mod output;
pub mod statistics;
pub mod training;

use failure::Fail;

/// Alias for user ids. Ids in rating files are 1-based.
pub type UserId = usize;
/// Alias for item ids. Ids in rating files are 1-based.
pub type ItemId = usize;
/// Alias for the integer day index of a rating.
pub type Day = u32;
/// Alias for star ratings.
pub type Rating = u8;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// User id outside `[1, num_users]`.
    #[fail(display = "user id {} outside [1, {}]", user, num_users)]
    UserOutOfRange {
        /// Offending id.
        user: UserId,
        /// Number of users the model was built for.
        num_users: usize,
    },
    /// Item id outside `[1, num_items]`.
    #[fail(display = "item id {} outside [1, {}]", item, num_items)]
    ItemOutOfRange {
        /// Offending id.
        item: ItemId,
        /// Number of items the model was built for.
        num_items: usize,
    },
    /// Day beyond the last day covered by the time bins.
    #[fail(display = "day {} beyond the last modelled day {}", day, max_day)]
    DayOutOfRange {
        /// Offending day.
        day: Day,
        /// Last day covered by the time bins.
        max_day: Day,
    },
    /// The user has no implicit feedback, so the implicit aggregate is undefined.
    #[fail(display = "user {} has no implicit feedback items", user)]
    EmptyImplicitSet {
        /// Offending id.
        user: UserId,
    },
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

/// Fitting and evaluation error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// The underlying rating stream failed.
    #[fail(display = "{}", _0)]
    Data(#[fail(cause)] data::DataError),
    /// A record could not be predicted or fitted.
    #[fail(display = "{}:{}: {}", file, line, error)]
    Record {
        /// File the record came from.
        file: String,
        /// Line of the record.
        line: u64,
        /// The prediction failure.
        #[fail(cause)]
        error: PredictionError,
    },
    /// A stream without ratings was used where labels are required.
    #[fail(display = "{}: stream carries no ratings", file)]
    UnlabeledStream {
        /// The offending file.
        file: String,
    },
    /// The stream contained no records, so no mean error exists.
    #[fail(display = "{}: stream contains no records", file)]
    EmptyStream {
        /// The offending file.
        file: String,
    },
    /// Statistics and hyperparameters disagree on the model dimensions.
    #[fail(
        display = "statistics cover {} users and {} items, hyperparameters expect {} and {}",
        found_users, found_items, expected_users, expected_items
    )]
    DimensionMismatch {
        /// Users in the hyperparameters.
        expected_users: usize,
        /// Items in the hyperparameters.
        expected_items: usize,
        /// Users in the statistics.
        found_users: usize,
        /// Items in the statistics.
        found_items: usize,
    },
    /// A hyperparameter value the model cannot work with.
    #[fail(display = "invalid {} {}: {}", name, value, reason)]
    InvalidHyperparameter {
        /// Name of the hyperparameter.
        name: &'static str,
        /// Rejected value.
        value: f64,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

impl FittingError {
    /// Attach the current position of `stream` to a prediction failure.
    pub(crate) fn at(stream: &data::RecordStream, error: PredictionError) -> Self {
        FittingError::Record {
            file: stream.file().to_owned(),
            line: stream.line(),
            error,
        }
    }
}

impl From<data::DataError> for FittingError {
    fn from(error: data::DataError) -> Self {
        FittingError::Data(error)
    }
}

/// Trait describing rating models that can be fitted one record at a time.
pub trait RatingModel {
    /// Predict the rating `user` would give `item` on `day`.
    fn predict(&self, user: UserId, item: ItemId, day: Day) -> Result<f64, PredictionError>;
    /// Take one gradient step on an observed rating and return the residual
    /// computed before the step.
    fn update(
        &mut self,
        user: UserId,
        item: ItemId,
        day: Day,
        rating: f64,
    ) -> Result<f64, PredictionError>;
}
