use std::collections::HashSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::errs::{EcError, EcResult};
use crate::util::ReferenceRecord;

/// An ordered group of reference sequences processed as one unit of
/// pipeline fan-out.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub sequences: Vec<ReferenceRecord>,
}

impl Chunk {
    pub fn total_bp(&self) -> u64 {
        self.sequences.iter().map(|s| s.length).sum()
    }

    pub fn label(&self) -> String {
        format!("chunk_{:04}", self.index + 1)
    }
}

/// Greedy bin-pack of references into `chunk_total` groups targeting
/// `total_bp / chunk_total` per group. Longest references are placed
/// first into the lightest group; ties break on the header ordinal and
/// the lowest group index, so chunking is reproducible across runs.
pub fn chunk_references(
    references: &[ReferenceRecord],
    chunk_total: usize,
    skip_sequences: &HashSet<String>,
) -> EcResult<Vec<Chunk>> {
    if chunk_total == 0 {
        return Err(EcError::ConfigInvalid(
            "chunk_total must be positive".to_string(),
        ));
    }
    let included = references
        .iter()
        .filter(|r| !skip_sequences.contains(&r.name))
        .sorted_by(|a, b| {
            b.length.cmp(&a.length).then_with(|| a.tid.cmp(&b.tid))
        })
        .collect::<Vec<&ReferenceRecord>>();

    let mut bins: Vec<Vec<&ReferenceRecord>> = vec![Vec::new(); chunk_total];
    let mut bin_weights = vec![0u64; chunk_total];
    for reference in included {
        let lightest = bin_weights
            .iter()
            .enumerate()
            .min_by_key(|(i, w)| (**w, *i))
            .map(|(i, _)| i)
            .unwrap();
        bins[lightest].push(reference);
        bin_weights[lightest] += reference.length;
    }

    Ok(bins
        .into_iter()
        .filter(|bin| !bin.is_empty())
        .enumerate()
        .map(|(index, mut bin)| {
            bin.sort_by_key(|r| r.tid);
            Chunk {
                index,
                sequences: bin.into_iter().cloned().collect(),
            }
        })
        .collect())
}

/// Restrict to a single chunk by 1-based ordinal when a test chunk is
/// configured.
pub fn select_chunks(
    chunks: Vec<Chunk>,
    test_chunk: Option<usize>,
) -> EcResult<Vec<Chunk>> {
    match test_chunk {
        None => Ok(chunks),
        Some(0) => Err(EcError::ConfigInvalid(
            "test_chunk is 1-based, got 0".to_string(),
        )),
        Some(n) if n > chunks.len() => Err(EcError::ConfigInvalid(format!(
            "test_chunk {n} out of range, only {} chunks",
            chunks.len()
        ))),
        Some(n) => Ok(vec![chunks[n - 1].clone()]),
    }
}

#[cfg(test)]
mod chunks_tests {
    use std::collections::HashSet;

    use similar_asserts::assert_eq;

    use super::{chunk_references, select_chunks};
    use crate::util::ReferenceRecord;

    fn refs() -> Vec<ReferenceRecord> {
        vec![
            ReferenceRecord::new(0, "1".to_string(), 1000),
            ReferenceRecord::new(1, "2".to_string(), 800),
            ReferenceRecord::new(2, "3".to_string(), 600),
            ReferenceRecord::new(3, "4".to_string(), 400),
            ReferenceRecord::new(4, "MT".to_string(), 200),
        ]
    }

    #[test]
    fn test_chunks_conserve_every_reference_once() {
        let chunks =
            chunk_references(&refs(), 3, &HashSet::new()).unwrap();
        let total_bp: u64 = chunks.iter().map(|c| c.total_bp()).sum();
        assert_eq!(total_bp, 3000);
        let mut names = chunks
            .iter()
            .flat_map(|c| c.sequences.iter().map(|s| s.name.clone()))
            .collect::<Vec<String>>();
        names.sort();
        assert_eq!(names, vec!["1", "2", "3", "4", "MT"]);
    }

    #[test]
    fn test_chunks_are_reproducible_and_ordinal_ordered() {
        let a = chunk_references(&refs(), 3, &HashSet::new()).unwrap();
        let b = chunk_references(&refs(), 3, &HashSet::new()).unwrap();
        assert_eq!(a, b);
        for chunk in &a {
            let tids =
                chunk.sequences.iter().map(|s| s.tid).collect::<Vec<u32>>();
            let mut sorted = tids.clone();
            sorted.sort();
            assert_eq!(tids, sorted);
        }
    }

    #[test]
    fn test_chunks_skip_list_excludes_before_packing() {
        let skip =
            ["MT".to_string()].into_iter().collect::<HashSet<String>>();
        let chunks = chunk_references(&refs(), 2, &skip).unwrap();
        let total_bp: u64 = chunks.iter().map(|c| c.total_bp()).sum();
        assert_eq!(total_bp, 2800);
        assert!(chunks
            .iter()
            .all(|c| c.sequences.iter().all(|s| s.name != "MT")));
    }

    #[test]
    fn test_chunks_more_bins_than_references() {
        let chunks =
            chunk_references(&refs()[..2], 8, &HashSet::new()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_chunks_test_chunk_selection() {
        let chunks = chunk_references(&refs(), 3, &HashSet::new()).unwrap();
        let selected = select_chunks(chunks.clone(), Some(2)).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0], chunks[1]);
        assert!(select_chunks(chunks.clone(), Some(0)).is_err());
        assert!(select_chunks(chunks, Some(9)).is_err());
    }
}
