//! The bias terms of the rating prediction.
//!
//! Each term owns one group of scalar parameters and knows, for a given
//! observation, its current value, its additive contribution to the
//! prediction and the partial derivative of the prediction with respect to
//! it. Together the terms contribute
//!
//! ```text
//! b_u + b_i + b_{i,bin(t)} + alpha_u * dev(t, t_u) + b_{u,t} + b_{u,f}
//!     + (c_u + c_{u,t}) * (b_i + b_{i,bin(t)})
//! ```
//!
//! Fitting a record reads every term's value first, computes all the new
//! values from that snapshot and only then assigns them, so no update sees
//! another update of the same record.
use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use ndarray::{Array1, Array2};

use super::{GradientStep, Observation};
use crate::Day;

/// Number of bias terms.
pub const NUM_TERMS: usize = 8;

/// Identifies a bias term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// `b_u`
    UserBias,
    /// `b_i`
    ItemBias,
    /// `b_{i,bin(t)}`
    ItemBinBias,
    /// `alpha_u`
    UserDrift,
    /// `b_{u,t}`
    UserDayBias,
    /// `b_{u,f}`
    UserFrequencyBias,
    /// `c_u`
    UserScale,
    /// `c_{u,t}`
    UserDayScale,
}

/// One value per bias term, indexed by `TermKind`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TermValues([f64; NUM_TERMS]);

impl Index<TermKind> for TermValues {
    type Output = f64;

    fn index(&self, kind: TermKind) -> &f64 {
        &self.0[kind as usize]
    }
}

impl IndexMut<TermKind> for TermValues {
    fn index_mut(&mut self, kind: TermKind) -> &mut f64 {
        &mut self.0[kind as usize]
    }
}

impl TermValues {
    /// `b_i + b_{i,bin(t)}`
    pub fn item_bias(&self) -> f64 {
        self[TermKind::ItemBias] + self[TermKind::ItemBinBias]
    }

    /// `1 + c_u + c_{u,t}`
    pub fn item_bias_scale(&self) -> f64 {
        1.0 + self[TermKind::UserScale] + self[TermKind::UserDayScale]
    }
}

/// A group of scalar bias parameters.
pub trait BiasTerm {
    /// Which term this is.
    fn kind(&self) -> TermKind;
    /// Current value of the parameter `observation` selects.
    fn value(&self, observation: &Observation) -> f64;
    /// Additive contribution to the prediction, given the snapshot `values`.
    fn contribution(&self, observation: &Observation, values: &TermValues) -> f64;
    /// Partial derivative of the prediction with respect to the parameter.
    fn coefficient(&self, observation: &Observation, values: &TermValues) -> f64;
    /// Overwrite the parameter `observation` selects.
    fn assign(&mut self, observation: &Observation, value: f64);
}

/// Key of the sparse per-(user, day) tables: zero-based user index and day.
pub type UserDay = (usize, Day);

/// Per-user bias.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserBias {
    values: Array1<f64>,
}

impl BiasTerm for UserBias {
    fn kind(&self) -> TermKind {
        TermKind::UserBias
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values[observation.user]
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::UserBias]
    }
    fn coefficient(&self, _: &Observation, _: &TermValues) -> f64 {
        1.0
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values[observation.user] = value;
    }
}

/// Per-item bias.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemBias {
    values: Array1<f64>,
}

impl BiasTerm for ItemBias {
    fn kind(&self) -> TermKind {
        TermKind::ItemBias
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values[observation.item]
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::ItemBias]
    }
    fn coefficient(&self, _: &Observation, values: &TermValues) -> f64 {
        values.item_bias_scale()
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values[observation.item] = value;
    }
}

/// Item bias per time bin, `num_items x num_time_bins`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemBinBias {
    values: Array2<f64>,
}

impl BiasTerm for ItemBinBias {
    fn kind(&self) -> TermKind {
        TermKind::ItemBinBias
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values[(observation.item, observation.time_bin)]
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::ItemBinBias]
    }
    fn coefficient(&self, _: &Observation, values: &TermValues) -> f64 {
        values.item_bias_scale()
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values[(observation.item, observation.time_bin)] = value;
    }
}

/// Linear drift of the user bias, scaled by the time deviation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserDrift {
    values: Array1<f64>,
}

impl BiasTerm for UserDrift {
    fn kind(&self) -> TermKind {
        TermKind::UserDrift
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values[observation.user]
    }
    fn contribution(&self, observation: &Observation, values: &TermValues) -> f64 {
        values[TermKind::UserDrift] * observation.deviation
    }
    fn coefficient(&self, observation: &Observation, _: &TermValues) -> f64 {
        observation.deviation
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values[observation.user] = value;
    }
}

/// Day-specific user bias. Entries are created on first assignment; a
/// missing entry reads as zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDayBias {
    values: HashMap<UserDay, f64>,
}

impl UserDayBias {
    /// Number of stored `(user, day)` entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no entry has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl BiasTerm for UserDayBias {
    fn kind(&self) -> TermKind {
        TermKind::UserDayBias
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values
            .get(&(observation.user, observation.day))
            .cloned()
            .unwrap_or(0.0)
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::UserDayBias]
    }
    fn coefficient(&self, _: &Observation, _: &TermValues) -> f64 {
        1.0
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values.insert((observation.user, observation.day), value);
    }
}

/// User bias per rating-frequency bin, `num_users x num_frequency_bins`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserFrequencyBias {
    values: Array2<f64>,
}

impl BiasTerm for UserFrequencyBias {
    fn kind(&self) -> TermKind {
        TermKind::UserFrequencyBias
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values[(observation.user, observation.frequency_bin)]
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::UserFrequencyBias]
    }
    fn coefficient(&self, _: &Observation, _: &TermValues) -> f64 {
        1.0
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values[(observation.user, observation.frequency_bin)] = value;
    }
}

/// Per-user scaling of the item bias.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserScale {
    values: Array1<f64>,
}

impl BiasTerm for UserScale {
    fn kind(&self) -> TermKind {
        TermKind::UserScale
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values[observation.user]
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::UserScale] * values.item_bias()
    }
    fn coefficient(&self, _: &Observation, values: &TermValues) -> f64 {
        values.item_bias()
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values[observation.user] = value;
    }
}

/// Day-specific scaling of the item bias, sparse like `UserDayBias`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDayScale {
    values: HashMap<UserDay, f64>,
}

impl BiasTerm for UserDayScale {
    fn kind(&self) -> TermKind {
        TermKind::UserDayScale
    }
    fn value(&self, observation: &Observation) -> f64 {
        self.values
            .get(&(observation.user, observation.day))
            .cloned()
            .unwrap_or(0.0)
    }
    fn contribution(&self, _: &Observation, values: &TermValues) -> f64 {
        values[TermKind::UserDayScale] * values.item_bias()
    }
    fn coefficient(&self, _: &Observation, values: &TermValues) -> f64 {
        values.item_bias()
    }
    fn assign(&mut self, observation: &Observation, value: f64) {
        self.values.insert((observation.user, observation.day), value);
    }
}

/// The fixed list of bias terms, all zero-initialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasTerms {
    user: UserBias,
    item: ItemBias,
    item_bin: ItemBinBias,
    drift: UserDrift,
    user_day: UserDayBias,
    frequency: UserFrequencyBias,
    scale: UserScale,
    day_scale: UserDayScale,
}

impl BiasTerms {
    /// Zero-initialized terms for the given dimensions.
    pub fn new(
        num_users: usize,
        num_items: usize,
        num_time_bins: usize,
        num_frequency_bins: usize,
    ) -> Self {
        BiasTerms {
            user: UserBias {
                values: Array1::zeros(num_users),
            },
            item: ItemBias {
                values: Array1::zeros(num_items),
            },
            item_bin: ItemBinBias {
                values: Array2::zeros((num_items, num_time_bins)),
            },
            drift: UserDrift {
                values: Array1::zeros(num_users),
            },
            user_day: UserDayBias::default(),
            frequency: UserFrequencyBias {
                values: Array2::zeros((num_users, num_frequency_bins)),
            },
            scale: UserScale {
                values: Array1::zeros(num_users),
            },
            day_scale: UserDayScale::default(),
        }
    }

    /// Every term, in `TermKind` order.
    pub fn terms(&self) -> [&dyn BiasTerm; NUM_TERMS] {
        [
            &self.user,
            &self.item,
            &self.item_bin,
            &self.drift,
            &self.user_day,
            &self.frequency,
            &self.scale,
            &self.day_scale,
        ]
    }

    fn terms_mut(&mut self) -> [&mut dyn BiasTerm; NUM_TERMS] {
        [
            &mut self.user,
            &mut self.item,
            &mut self.item_bin,
            &mut self.drift,
            &mut self.user_day,
            &mut self.frequency,
            &mut self.scale,
            &mut self.day_scale,
        ]
    }

    /// Snapshot of every term's value for `observation`.
    pub fn values(&self, observation: &Observation) -> TermValues {
        let mut values = TermValues::default();

        for term in self.terms().iter() {
            values[term.kind()] = term.value(observation);
        }

        values
    }

    /// Sum of the terms' contributions to the prediction.
    pub fn contribution(&self, observation: &Observation, values: &TermValues) -> f64 {
        self.terms()
            .iter()
            .map(|term| term.contribution(observation, values))
            .sum()
    }

    /// The value every term takes after `step`, computed from `values`.
    pub fn step(
        &self,
        observation: &Observation,
        values: &TermValues,
        step: &GradientStep,
    ) -> TermValues {
        let mut updated = TermValues::default();

        for term in self.terms().iter() {
            let kind = term.kind();
            updated[kind] = step.scalar(values[kind], term.coefficient(observation, values));
        }

        updated
    }

    /// Write `values` into the parameters `observation` selects.
    pub fn assign(&mut self, observation: &Observation, values: &TermValues) {
        for term in self.terms_mut().iter_mut() {
            let kind = term.kind();
            term.assign(observation, values[kind]);
        }
    }

    /// Number of `(user, day)` pairs with a day-specific bias.
    pub fn num_user_days(&self) -> usize {
        self.user_day.len()
    }
}
