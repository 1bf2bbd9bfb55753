use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::errs::EcResult;
use crate::regions::{EndCandidate, Region, zip_identical};
use crate::util::Strand;

/// Fuse per-input candidate lists for structurally identical region
/// lists. Candidates agreeing on (reference, position, strand) sum
/// their read counts; fused lists are ordered by descending count.
/// Branches whose regions diverge fail hard.
pub fn merge_candidate_lists(
    branch: &str,
    per_input: &[Vec<Region>],
) -> EcResult<Vec<Region>> {
    let zipped = zip_identical(branch, per_input, Region::same_identity)?;
    Ok(zipped
        .into_iter()
        .map(|parallel_regions| {
            let exemplar =
                *parallel_regions.first().expect("zip emits no empty rows");
            let mut fused: FxHashMap<(String, u64, Strand), u64> =
                FxHashMap::default();
            for region in &parallel_regions {
                for candidate in &region.candidates {
                    *fused
                        .entry((
                            candidate.ref_name.clone(),
                            candidate.pos,
                            candidate.strand,
                        ))
                        .or_insert(0) += candidate.read_count;
                }
            }
            let candidates = fused
                .into_iter()
                .sorted_by(|((ref_a, pos_a, _), n_a), ((ref_b, pos_b, _), n_b)| {
                    n_b.cmp(n_a)
                        .then_with(|| ref_a.cmp(ref_b))
                        .then_with(|| pos_a.cmp(pos_b))
                })
                .map(|((ref_name, pos, strand), read_count)| {
                    EndCandidate::new(ref_name, pos, strand, read_count)
                })
                .collect::<Vec<EndCandidate>>();
            let mut merged = exemplar.clone();
            merged.candidates = candidates;
            merged
        })
        .collect())
}

#[cfg(test)]
mod merge_tests {
    use similar_asserts::assert_eq;

    use super::merge_candidate_lists;
    use crate::regions::{EndCandidate, Region};
    use crate::util::Strand;

    fn region_with(candidates: Vec<EndCandidate>) -> Region {
        let mut region = Region::new(
            "1".to_string(),
            1000,
            2000,
            10,
            -2.5,
            Strand::Positive,
        );
        region.candidates = candidates;
        region
    }

    #[test]
    fn test_merge_sums_identical_keys() {
        let a = vec![region_with(vec![
            EndCandidate::new("1".to_string(), 1194, Strand::Positive, 3),
            EndCandidate::new("1".to_string(), 1500, Strand::Positive, 1),
        ])];
        let b = vec![region_with(vec![EndCandidate::new(
            "1".to_string(),
            1194,
            Strand::Positive,
            4,
        )])];
        let merged = merge_candidate_lists("unit-test", &[a, b]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].candidates,
            vec![
                EndCandidate::new("1".to_string(), 1194, Strand::Positive, 7),
                EndCandidate::new("1".to_string(), 1500, Strand::Positive, 1),
            ]
        );
    }

    #[test]
    fn test_merge_single_branch_is_identity() {
        let list = vec![region_with(vec![
            EndCandidate::new("1".to_string(), 1194, Strand::Positive, 3),
            EndCandidate::new("1".to_string(), 1500, Strand::Positive, 1),
        ])];
        let merged =
            merge_candidate_lists("unit-test", &[list.clone()]).unwrap();
        assert_eq!(merged, list);
    }

    #[test]
    fn test_merge_diverging_regions_fail() {
        let a = vec![region_with(Vec::new())];
        let mut diverged = region_with(Vec::new());
        diverged.log_prob_sum = -99.0;
        let b = vec![diverged];
        assert!(merge_candidate_lists("unit-test", &[a, b]).is_err());
    }
}
