//! Scoring and batch prediction over record streams.
use crate::data::{RecordLayout, RecordStream};
use crate::{Day, FittingError, ItemId, RatingModel, UserId};

/// A predicted rating for one record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// User id of the record.
    pub user: UserId,
    /// Item id of the record.
    pub item: ItemId,
    /// Day of the record.
    pub day: Day,
    /// Predicted rating.
    pub rating: f64,
}

/// Mean squared error of `model` over every record of a labeled `stream`.
///
/// The stream is rewound first; the model is not modified.
pub fn mse_score<T: RatingModel>(model: &T, stream: &mut RecordStream) -> Result<f64, FittingError> {
    if stream.layout() == RecordLayout::Unlabeled {
        return Err(FittingError::UnlabeledStream {
            file: stream.file().to_owned(),
        });
    }

    stream.reset()?;

    let mut squared_error = 0.0;
    let mut count = 0usize;

    while let Some(record) = stream.next() {
        let record = record?;
        let rating = record.rating().ok_or_else(|| FittingError::UnlabeledStream {
            file: stream.file().to_owned(),
        })?;

        let prediction = model
            .predict(record.user(), record.item(), record.day())
            .map_err(|error| FittingError::at(stream, error))?;

        squared_error += (f64::from(rating) - prediction).powi(2);
        count += 1;
    }

    if count == 0 {
        return Err(FittingError::EmptyStream {
            file: stream.file().to_owned(),
        });
    }

    Ok(squared_error / count as f64)
}

/// Root mean squared error, see [`mse_score`](fn.mse_score.html).
pub fn rmse_score<T: RatingModel>(model: &T, stream: &mut RecordStream) -> Result<f64, FittingError> {
    Ok(mse_score(model, stream)?.sqrt())
}

/// Predict every record of `stream`, labeled or not, in file order.
pub fn predict_stream<T: RatingModel>(
    model: &T,
    stream: &mut RecordStream,
) -> Result<Vec<Prediction>, FittingError> {
    stream.reset()?;

    let mut predictions = Vec::new();

    while let Some(record) = stream.next() {
        let record = record?;
        let rating = model
            .predict(record.user(), record.item(), record.day())
            .map_err(|error| FittingError::at(stream, error))?;

        predictions.push(Prediction {
            user: record.user(),
            item: record.item(),
            day: record.day(),
            rating,
        });
    }

    debug!("Predicted {} records of {}", predictions.len(), stream.file());

    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::data::testing::*;
    use crate::data::Record;
    use crate::PredictionError;

    /// Predicts `user + item` regardless of the day.
    struct SumModel;

    impl RatingModel for SumModel {
        fn predict(&self, user: UserId, item: ItemId, _: Day) -> Result<f64, PredictionError> {
            if item == 9 {
                return Err(PredictionError::InvalidPredictionValue);
            }
            Ok((user + item) as f64)
        }

        fn update(&mut self, _: UserId, _: ItemId, _: Day, _: f64) -> Result<f64, PredictionError> {
            unreachable!()
        }
    }

    #[test]
    fn mse_averages_squared_residuals() {
        let (_file, mut stream) = labeled_stream(&[
            Record::labeled(1, 1, 0, 2),
            Record::labeled(1, 2, 0, 5),
            Record::labeled(2, 2, 0, 1),
        ]);

        // Residuals 0, 2 and -3.
        assert!((mse_score(&SumModel, &mut stream).unwrap() - 13.0 / 3.0).abs() < 1e-12);
        // Scoring again gives the same result since the stream is rewound.
        assert!((rmse_score(&SumModel, &mut stream).unwrap() - (13.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn mse_rejects_unusable_streams() {
        let (_file, mut empty) = labeled_stream(&[]);
        match mse_score(&SumModel, &mut empty) {
            Err(FittingError::EmptyStream { .. }) => {}
            other => panic!("Unexpected result {:?}", other),
        }

        let file = write_lines(&["1 1 10"]);
        let mut unlabeled = RecordStream::open(file.path(), RecordLayout::Unlabeled).unwrap();
        match mse_score(&SumModel, &mut unlabeled) {
            Err(FittingError::UnlabeledStream { .. }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn prediction_failures_carry_the_position() {
        let (_file, mut stream) = labeled_stream(&[
            Record::labeled(1, 1, 0, 2),
            Record::labeled(1, 9, 0, 2),
        ]);

        match mse_score(&SumModel, &mut stream) {
            Err(FittingError::Record { line: 2, .. }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn predicts_unlabeled_streams_in_order() {
        let file = write_lines(&["2 3 7", "1 1 8"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Unlabeled).unwrap();

        let predictions = predict_stream(&SumModel, &mut stream).unwrap();

        assert_eq!(
            predictions,
            vec![
                Prediction {
                    user: 2,
                    item: 3,
                    day: 7,
                    rating: 5.0,
                },
                Prediction {
                    user: 1,
                    item: 1,
                    day: 8,
                    rating: 2.0,
                },
            ]
        );
    }

    proptest! {
        #[test]
        fn mse_is_zero_only_for_exact_predictions(
            ratings in prop::collection::vec((1usize..3, 1usize..3, 1u8..=5), 1..20),
        ) {
            let records: Vec<Record> = ratings
                .iter()
                .map(|&(user, item, rating)| Record::labeled(user, item, 0, rating))
                .collect();
            let exact = records.iter().all(|record| {
                record.rating() == Some((record.user() + record.item()) as u8)
            });

            let (_file, mut stream) = labeled_stream(&records);
            let mse = mse_score(&SumModel, &mut stream).unwrap();

            prop_assert!(mse >= 0.0);
            prop_assert_eq!(mse == 0.0, exact);
        }
    }
}
