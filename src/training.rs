//! Epoch control for streaming SGD with early stopping.
use crate::data::{RecordLayout, RecordStream};
use crate::evaluation::mse_score;
use crate::{FittingError, RatingModel};

/// Where a `Trainer` is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingState {
    /// No epoch has started.
    Initialized,
    /// An epoch is running or has just finished.
    Training {
        /// 1-based epoch number.
        epoch: usize,
    },
    /// Every epoch ran without the validation error increasing.
    Converged {
        /// Number of epochs run.
        epochs: usize,
    },
    /// The validation error increased. The parameters of that epoch are kept.
    EarlyStopped {
        /// The epoch after which the error increased.
        epoch: usize,
    },
}

/// Errors measured at the end of one epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean squared residual seen while updating on the training stream.
    pub training_loss: f64,
    /// Validation MSE after the epoch.
    pub validation_error: f64,
}

/// Outcome of a `fit` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Validation MSE before any update.
    pub initial_validation_error: f64,
    /// One summary per epoch run.
    pub epochs: Vec<EpochSummary>,
    /// State the trainer finished in.
    pub state: TrainingState,
}

impl FitReport {
    /// Validation MSE of the returned parameters.
    pub fn final_validation_error(&self) -> f64 {
        self.epochs
            .last()
            .map_or(self.initial_validation_error, |epoch| epoch.validation_error)
    }
}

/// Runs epochs of SGD over a training stream until the validation error
/// increases or the epoch budget is spent.
#[derive(Debug)]
pub struct Trainer {
    max_epochs: usize,
    state: TrainingState,
}

impl Trainer {
    /// A trainer running at most `max_epochs` epochs.
    pub fn new(max_epochs: usize) -> Self {
        Trainer {
            max_epochs,
            state: TrainingState::Initialized,
        }
    }

    /// Current state.
    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Fit `model`, streaming `train` once per epoch and scoring
    /// `validation` before the first epoch and after each one.
    pub fn fit<T: RatingModel>(
        &mut self,
        model: &mut T,
        train: &mut RecordStream,
        validation: &mut RecordStream,
    ) -> Result<FitReport, FittingError> {
        self.state = TrainingState::Initialized;

        let initial_validation_error = mse_score(model, validation)?;
        info!(
            "Initial validation error {:.6} (RMSE {:.6})",
            initial_validation_error,
            initial_validation_error.sqrt()
        );

        let mut previous = initial_validation_error;
        let mut epochs = Vec::with_capacity(self.max_epochs);

        for epoch in 1..=self.max_epochs {
            self.state = TrainingState::Training { epoch };

            let training_loss = Self::run_epoch(model, train)?;
            let validation_error = mse_score(model, validation)?;

            info!(
                "Epoch {}: training loss {:.6}, validation error {:.6} (RMSE {:.6})",
                epoch,
                training_loss,
                validation_error,
                validation_error.sqrt()
            );

            epochs.push(EpochSummary {
                epoch,
                training_loss,
                validation_error,
            });

            if validation_error > previous {
                warn!(
                    "Validation error rose from {:.6} to {:.6}, stopping after epoch {}",
                    previous, validation_error, epoch
                );
                self.state = TrainingState::EarlyStopped { epoch };
                break;
            }

            previous = validation_error;
        }

        if let TrainingState::Training { epoch } = self.state {
            self.state = TrainingState::Converged { epochs: epoch };
        } else if self.state == TrainingState::Initialized {
            self.state = TrainingState::Converged { epochs: 0 };
        }

        info!("Finished fitting: {:?}", self.state);

        Ok(FitReport {
            initial_validation_error,
            epochs,
            state: self.state,
        })
    }

    /// Update `model` once on every record of `train`, in file order, and
    /// return the mean squared residual observed before each update.
    pub fn run_epoch<T: RatingModel>(
        model: &mut T,
        train: &mut RecordStream,
    ) -> Result<f64, FittingError> {
        if train.layout() == RecordLayout::Unlabeled {
            return Err(FittingError::UnlabeledStream {
                file: train.file().to_owned(),
            });
        }

        train.reset()?;

        let mut loss = 0.0;
        let mut count = 0usize;

        while let Some(record) = train.next() {
            let record = record?;
            let rating = record.rating().ok_or_else(|| FittingError::UnlabeledStream {
                file: train.file().to_owned(),
            })?;

            let residual = model
                .update(record.user(), record.item(), record.day(), f64::from(rating))
                .map_err(|error| FittingError::at(train, error))?;

            loss += residual * residual;
            count += 1;
        }

        if count == 0 {
            return Err(FittingError::EmptyStream {
                file: train.file().to_owned(),
            });
        }

        Ok(loss / count as f64)
    }
}
