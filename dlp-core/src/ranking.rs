//! Ranked eligible set
//!
//! Ordered index of eligible DLPs keyed by `(stake desc, id asc)`. Every
//! insert, update and removal is `O(log n)`; `top` walks the index from the
//! front and never re-sorts.

use crate::types::{Amount, DlpId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Ordered set of eligible DLPs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RankedSetRepr", into = "RankedSetRepr")]
pub struct RankedSet {
    /// Ranking order: highest stake first, lowest id wins ties
    order: BTreeSet<(Reverse<Amount>, DlpId)>,

    /// Current stake of each member
    members: BTreeMap<DlpId, Amount>,
}

/// Serialized form: membership only, the order is rebuilt on load
#[derive(Serialize, Deserialize)]
struct RankedSetRepr {
    members: BTreeMap<DlpId, Amount>,
}

impl From<RankedSetRepr> for RankedSet {
    fn from(repr: RankedSetRepr) -> Self {
        let order = repr
            .members
            .iter()
            .map(|(id, stake)| (Reverse(*stake), *id))
            .collect();
        Self {
            order,
            members: repr.members,
        }
    }
}

impl From<RankedSet> for RankedSetRepr {
    fn from(set: RankedSet) -> Self {
        Self {
            members: set.members,
        }
    }
}

impl RankedSet {
    /// Create empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a DLP or move it to its new stake position
    pub fn upsert(&mut self, dlp_id: DlpId, stake_amount: Amount) {
        if let Some(previous) = self.members.insert(dlp_id, stake_amount) {
            self.order.remove(&(Reverse(previous), dlp_id));
        }
        self.order.insert((Reverse(stake_amount), dlp_id));
    }

    /// Remove a DLP; returns whether it was a member
    pub fn remove(&mut self, dlp_id: DlpId) -> bool {
        match self.members.remove(&dlp_id) {
            Some(stake) => {
                self.order.remove(&(Reverse(stake), dlp_id));
                true
            }
            None => false,
        }
    }

    /// Membership test
    pub fn contains(&self, dlp_id: DlpId) -> bool {
        self.members.contains_key(&dlp_id)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ranking order
    pub fn iter(&self) -> impl Iterator<Item = (DlpId, Amount)> + '_ {
        self.order.iter().map(|(Reverse(stake), id)| (*id, *stake))
    }

    /// Up to `k` ids in ranking order, skipping members rejected by `include`
    pub fn top<F>(&self, k: usize, mut include: F) -> Vec<DlpId>
    where
        F: FnMut(DlpId) -> bool,
    {
        self.order
            .iter()
            .map(|(_, id)| *id)
            .filter(|id| include(*id))
            .take(k)
            .collect()
    }

    /// Member ids in ascending id order
    pub fn member_ids(&self) -> Vec<DlpId> {
        self.members.keys().copied().collect()
    }
}
