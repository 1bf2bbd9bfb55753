use lazy_static::lazy_static;
use regex::Regex;

use crate::errs::{EcError, EcResult};
use crate::regions::{EndCandidate, Region};
use crate::sequence::SequenceSource;

/// Candidates below this read count are discarded.
pub const MIN_END_READ_COUNT: u64 = 4;
/// Width of the downstream genomic window inspected for adenine runs.
pub const DOWNSTREAM_WINDOW: u64 = 10;

lazy_static! {
    static ref SPACED_A: Vec<Regex> = [
        r"^AAA[^A]AA",
        r"^AA[^A]AAA",
        r"^A[^A]AAAA",
        r"^AA[^A]AA[^A]A",
        r"^A[^A]AA[^A]AA",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// A window that looks like internal priming rather than a real
/// cleavage site: a leading adenine run of four, more than six
/// adenines overall, or one of the spaced-adenine layouts.
pub fn is_downstream_polya(window: &str) -> bool {
    let window =
        &window[..std::cmp::min(window.len(), DOWNSTREAM_WINDOW as usize)];
    if window.starts_with("AAAA") {
        return true;
    }
    if window.chars().filter(|c| *c == 'A').count() > 6 {
        return true;
    }
    SPACED_A.iter().any(|re| re.is_match(window))
}

/// Remove one candidate by identity; removing an unknown candidate is
/// a structural failure.
pub(crate) fn remove_candidate(
    region: &mut Region,
    candidate: &EndCandidate,
) -> EcResult<()> {
    let before = region.candidates.len();
    region.candidates.retain(|c| c != candidate);
    if region.candidates.len() + 1 != before {
        return Err(EcError::structural(
            "three-prime-filter",
            format!(
                "no candidate {candidate:?} in region {}",
                region.identity_string()
            ),
        ));
    }
    Ok(())
}

/// Apply the read-count floor and the downstream-polyA rejection to a
/// region's candidate list.
pub fn filter_region_candidates(
    region: &mut Region,
    source: &dyn SequenceSource,
) -> EcResult<()> {
    let mut removals = Vec::new();
    for candidate in &region.candidates {
        if candidate.read_count < MIN_END_READ_COUNT {
            removals.push(candidate.clone());
            continue;
        }
        let window = source.get_downstream_subsequence(
            &candidate.ref_name,
            candidate.pos as i64,
            candidate.strand,
            DOWNSTREAM_WINDOW,
        )?;
        if is_downstream_polya(&window) {
            removals.push(candidate.clone());
        }
    }
    for candidate in &removals {
        remove_candidate(region, candidate)?;
    }
    Ok(())
}
