use std::fmt::Debug;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::errs::{EcError, EcResult};
use crate::util::Strand;

/// A candidate 3'-end position with its supporting read count.
#[derive(new, Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EndCandidate {
    pub ref_name: String,
    pub pos: u64,
    pub strand: Strand,
    pub read_count: u64,
}

/// The chosen 3' end of a region. The strand is always known, it falls
/// back to the region strand when no candidate survives filtering.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ThreePrimeEnd {
    Present { ref_name: String, pos: u64, strand: Strand, read_count: u64 },
    Absent { strand: Strand },
}

impl ThreePrimeEnd {
    pub fn strand(&self) -> Strand {
        match self {
            Self::Present { strand, .. } => *strand,
            Self::Absent { strand } => *strand,
        }
    }
}

/// A candidate transcript footprint. Created by the HMM region joiner
/// and progressively enriched: candidates, then a chosen end, then a
/// per-sample count vector. Identity at merge boundaries is the leading
/// (start, end, max_read_count, log_prob_sum, strand) tuple, compared
/// structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub ref_name: String,
    pub start: u64,
    pub end: u64,
    pub max_read_count: u64,
    pub log_prob_sum: f64,
    pub strand: Strand,
    #[serde(default)]
    pub candidates: Vec<EndCandidate>,
    #[serde(default)]
    pub chosen: Option<ThreePrimeEnd>,
    #[serde(default)]
    pub sample_counts: Vec<u64>,
}

impl Region {
    pub fn new(
        ref_name: String,
        start: u64,
        end: u64,
        max_read_count: u64,
        log_prob_sum: f64,
        strand: Strand,
    ) -> Self {
        Self {
            ref_name,
            start,
            end,
            max_read_count,
            log_prob_sum,
            strand,
            candidates: Vec::new(),
            chosen: None,
            sample_counts: Vec::new(),
        }
    }

    pub fn same_identity(&self, other: &Self) -> bool {
        self.ref_name == other.ref_name
            && self.start == other.start
            && self.end == other.end
            && self.max_read_count == other.max_read_count
            && self.log_prob_sum.to_bits() == other.log_prob_sum.to_bits()
            && self.strand == other.strand
    }

    /// Identity through the chosen 3' end, required at count merging.
    pub fn same_identity_through_chosen(&self, other: &Self) -> bool {
        self.same_identity(other) && self.chosen == other.chosen
    }

    pub fn identity_string(&self) -> String {
        format!(
            "({}, {}, {}, {}, {}, {})",
            self.ref_name,
            self.start,
            self.end,
            self.max_read_count,
            self.log_prob_sum,
            self.strand.to_int()
        )
    }
}

/// Zip parallel per-branch lists, failing hard unless every branch has
/// the same length and, index-for-index, every item agrees with the
/// first branch under `same`. This is the single merge-boundary
/// invariant used by every fan-in stage.
pub fn zip_identical<'a, T: Debug, F>(
    branch: &str,
    lists: &'a [Vec<T>],
    same: F,
) -> EcResult<Vec<Vec<&'a T>>>
where
    F: Fn(&T, &T) -> bool,
{
    let Some(first) = lists.first() else {
        return Ok(Vec::new());
    };
    for (i, list) in lists.iter().enumerate().skip(1) {
        if list.len() != first.len() {
            return Err(EcError::structural(
                branch,
                format!(
                    "branch 0 has {} regions but branch {i} has {}",
                    first.len(),
                    list.len()
                ),
            ));
        }
    }
    (0..first.len())
        .map(|idx| {
            let exemplar = &first[idx];
            lists
                .iter()
                .enumerate()
                .map(|(i, list)| {
                    let item = &list[idx];
                    if same(exemplar, item) {
                        Ok(item)
                    } else {
                        Err(EcError::structural(
                            branch,
                            format!(
                                "index {idx} diverges between branch 0 \
                                 ({exemplar:?}) and branch {i} ({item:?})"
                            ),
                        ))
                    }
                })
                .collect::<EcResult<Vec<&T>>>()
        })
        .collect::<EcResult<Vec<Vec<&T>>>>()
}
