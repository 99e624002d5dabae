//! Per-user aggregates precomputed from the training data.
//!
//! Built once, before the first epoch, by a single pass over the training
//! stream and read-only afterwards. The model consumes:
//!
//! - the global mean rating,
//! - each user's rated items `R(u)` and implicit items `N(u)`,
//! - each user's rating count and mean rating day `t_u`, and
//! - the number of ratings each user gave on each day, which drives the
//!   frequency-bin mapping.
use std::collections::HashMap;

use crate::data::{DataError, RecordLayout, RecordStream};
use crate::{Day, ItemId, UserId};

/// Read-only aggregates over the training data.
///
/// Users and items are indexed from zero here: the entry for user id `u`
/// lives at `u - 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserItemStatistics {
    num_users: usize,
    num_items: usize,
    num_ratings: usize,
    rating_sum: f64,
    rated_items: Vec<Vec<usize>>,
    implicit_items: Vec<Vec<usize>>,
    rating_counts: Vec<usize>,
    mean_days: Vec<Option<f64>>,
    day_counts: HashMap<(usize, Day), u32>,
}

impl UserItemStatistics {
    /// Compute the statistics from a labeled training stream.
    ///
    /// The implicit items of every user are exactly the items they rated.
    pub fn from_stream(
        train: &mut RecordStream,
        num_users: usize,
        num_items: usize,
    ) -> Result<Self, DataError> {
        Self::from_streams(train, None, num_users, num_items)
    }

    /// Compute the statistics from a labeled training stream and an optional
    /// stream of additional interactions.
    ///
    /// When `implicit` is given, a user's implicit items are their rated
    /// items plus every item they touch in `implicit`, and the per-day rating
    /// counts come from `implicit` instead of the training stream (it is
    /// expected to list every interaction, rated or not). Ratings, rating
    /// counts, mean days and the global mean always come from `train` alone.
    pub fn from_streams(
        train: &mut RecordStream,
        implicit: Option<&mut RecordStream>,
        num_users: usize,
        num_items: usize,
    ) -> Result<Self, DataError> {
        if train.layout() == RecordLayout::Unlabeled {
            return Err(DataError::UnlabeledStream {
                file: train.file().to_owned(),
            });
        }

        let mut statistics = UserItemStatistics {
            num_users,
            num_items,
            num_ratings: 0,
            rating_sum: 0.0,
            rated_items: vec![Vec::new(); num_users],
            implicit_items: vec![Vec::new(); num_users],
            rating_counts: vec![0; num_users],
            mean_days: vec![None; num_users],
            day_counts: HashMap::new(),
        };

        let mut day_sums = vec![0.0; num_users];
        let count_train_days = implicit.is_none();

        train.set_bounds(num_users, num_items);
        train.reset()?;

        for record in train.by_ref() {
            let record = record?;
            let (user, item) = (record.user() - 1, record.item() - 1);

            if let Some(rating) = record.rating() {
                statistics.num_ratings += 1;
                statistics.rating_sum += f64::from(rating);
                statistics.rating_counts[user] += 1;
                day_sums[user] += f64::from(record.day());
                statistics.rated_items[user].push(item);
            }

            if count_train_days {
                *statistics.day_counts.entry((user, record.day())).or_insert(0) += 1;
            }
        }

        train.reset()?;

        for (user, items) in statistics.rated_items.iter_mut().enumerate() {
            items.sort_unstable();
            items.dedup();

            let count = statistics.rating_counts[user];
            if count > 0 {
                statistics.mean_days[user] = Some(day_sums[user] / count as f64);
            }
        }

        statistics.implicit_items = statistics.rated_items.clone();

        if let Some(implicit) = implicit {
            implicit.set_bounds(num_users, num_items);
            implicit.reset()?;

            for record in implicit.by_ref() {
                let record = record?;
                let user = record.user() - 1;

                statistics.implicit_items[user].push(record.item() - 1);
                *statistics.day_counts.entry((user, record.day())).or_insert(0) += 1;
            }

            implicit.reset()?;

            for items in &mut statistics.implicit_items {
                items.sort_unstable();
                items.dedup();
            }
        }

        debug!(
            "Statistics: {} ratings from {} users, {} user-days, mean rating {:.4}",
            statistics.num_ratings,
            statistics.rating_counts.iter().filter(|&&count| count > 0).count(),
            statistics.day_counts.len(),
            statistics.mean_rating()
        );

        Ok(statistics)
    }

    /// Number of users the statistics cover.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items the statistics cover.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Number of ratings in the training data.
    pub fn num_ratings(&self) -> usize {
        self.num_ratings
    }

    /// Mean training rating, or zero when there are no ratings.
    pub fn mean_rating(&self) -> f64 {
        if self.num_ratings == 0 {
            0.0
        } else {
            self.rating_sum / self.num_ratings as f64
        }
    }

    /// Distinct items rated by `user`.
    pub fn rated_items(&self, user: UserId) -> &[usize] {
        &self.rated_items[user - 1]
    }

    /// Distinct items `user` interacted with in any way, `N(u)`.
    pub fn implicit_items(&self, user: UserId) -> &[usize] {
        &self.implicit_items[user - 1]
    }

    /// Number of ratings given by `user`, `R_u`.
    pub fn rating_count(&self, user: UserId) -> usize {
        self.rating_counts[user - 1]
    }

    /// Mean day of the ratings given by `user`, `t_u`. `None` when the user
    /// has no training ratings.
    pub fn mean_day(&self, user: UserId) -> Option<f64> {
        self.mean_days[user - 1]
    }

    /// Number of ratings `user` gave on `day`.
    pub fn day_frequency(&self, user: UserId, day: Day) -> u32 {
        self.day_counts
            .get(&(user - 1, day))
            .cloned()
            .unwrap_or(0)
    }

    pub(crate) fn has_item(&self, item: ItemId) -> bool {
        item >= 1 && item <= self.num_items
    }

    pub(crate) fn has_user(&self, user: UserId) -> bool {
        user >= 1 && user <= self.num_users
    }
}
