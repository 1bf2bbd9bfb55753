use itertools::Itertools;
use lazy_static::lazy_static;
use log_once::debug_once;
use regex::Regex;
use rust_htslib::bam::{self, record::Aux, Read};
use rustc_hash::FxHashMap;

use crate::errs::{EcError, EcResult};
use crate::filters::{
    above_mismatch_threshold, is_duplicate, is_mapped, is_read2,
    mate_is_mapped, mate_on_same_reference, RejectCounts,
};
use crate::regions::{EndCandidate, Region};
use crate::tags::TagMatcher;
use crate::util::{get_query_name_string, CancelFlag, Strand};

lazy_static! {
    static ref CIGAR_OP: Regex = Regex::new(r"(\d+)([MIDNSHP=X])").unwrap();
}

/// Reference span of a CIGAR string, the bases it consumes on the
/// reference.
fn cigar_reference_span(cigar: &str) -> Option<u64> {
    let mut span = 0u64;
    let mut parsed_len = 0usize;
    for cap in CIGAR_OP.captures_iter(cigar) {
        let len = cap.get(1)?.as_str().parse::<u64>().ok()?;
        let op = cap.get(2)?.as_str();
        parsed_len += cap.get(0)?.as_str().len();
        match op {
            "M" | "D" | "N" | "=" | "X" => span += len,
            _ => {}
        }
    }
    if parsed_len == cigar.len() && span > 0 {
        Some(span)
    } else {
        None
    }
}

/// 1-based inclusive (start, end) of the mate alignment, derived from
/// the mate-CIGAR tag. `None` when the tag is missing or malformed.
pub(crate) fn mate_span(record: &bam::Record) -> Option<(u64, u64)> {
    let mate_cigar = match record.aux(b"MC") {
        Ok(Aux::String(s)) => s.to_owned(),
        _ => return None,
    };
    let span = cigar_reference_span(&mate_cigar)?;
    let start = (record.mpos() + 1) as u64;
    Some((start, start + span - 1))
}

/// Derive candidate 3'-end positions for one region from the mates of
/// surviving read-2s. The candidate is the mate end on the forward
/// strand and the mate start on the reverse strand; counts accumulate
/// per position and the result is ordered by descending read count.
pub fn extract_region_ends(
    reader: &mut bam::IndexedReader,
    region: &Region,
    matcher: &TagMatcher,
    mismatch_threshold: u32,
    rejects: &mut RejectCounts,
    cancel: &CancelFlag,
) -> EcResult<Vec<EndCandidate>> {
    let target_strand = region.strand;
    let tid = reader
        .header()
        .tid(region.ref_name.as_bytes())
        .ok_or_else(|| EcError::ContigMissing(region.ref_name.clone()))?;
    reader.fetch((
        tid as i32,
        (region.start - 1) as i64,
        region.end as i64,
    ))?;

    let mut counts: FxHashMap<u64, u64> = FxHashMap::default();
    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result?;
        cancel.check()?;
        if !is_read2(&record) {
            rejects.not_read2 += 1;
            continue;
        }
        if is_duplicate(&record) {
            rejects.duplicate += 1;
            continue;
        }
        if !is_mapped(&record) {
            rejects.unmapped += 1;
            continue;
        }
        if !mate_is_mapped(&record) || !mate_on_same_reference(&record) {
            rejects.mate_unmapped += 1;
            continue;
        }
        // the read-2 strand is the 3'-end strand, its mate must lie
        // opposite
        if Strand::from_record(&record) != target_strand
            || Strand::of_mate(&record) != target_strand.opposite()
        {
            rejects.wrong_strand += 1;
            continue;
        }
        if above_mismatch_threshold(&record, mismatch_threshold)? {
            rejects.above_mismatch += 1;
            continue;
        }
        let read_name = get_query_name_string(&record)?;
        if matcher.match_read_name(&read_name).is_none() {
            rejects.tag_unmatched += 1;
            continue;
        }
        let Some((mate_start, mate_end)) = mate_span(&record) else {
            debug_once!("records without an MC tag are skipped");
            rejects.missing_mate_cigar += 1;
            continue;
        };
        let pos = match target_strand {
            Strand::Positive => mate_end,
            Strand::Negative => mate_start,
        };
        *counts.entry(pos).or_insert(0) += 1;
    }

    Ok(counts
        .into_iter()
        .sorted_by(|(pos_a, n_a), (pos_b, n_b)| {
            n_b.cmp(n_a).then_with(|| pos_a.cmp(pos_b))
        })
        .map(|(pos, read_count)| {
            EndCandidate::new(
                region.ref_name.clone(),
                pos,
                target_strand,
                read_count,
            )
        })
        .collect())
}

/// Enrich every region of a chunk with this input's candidate list.
pub fn extract_for_regions(
    reader: &mut bam::IndexedReader,
    regions: &[Region],
    matcher: &TagMatcher,
    mismatch_threshold: u32,
    rejects: &mut RejectCounts,
    cancel: &CancelFlag,
) -> EcResult<Vec<Region>> {
    regions
        .iter()
        .map(|region| {
            let candidates = extract_region_ends(
                reader,
                region,
                matcher,
                mismatch_threshold,
                rejects,
                cancel,
            )?;
            let mut enriched = region.clone();
            enriched.candidates = candidates;
            Ok(enriched)
        })
        .collect()
}

#[cfg(test)]
mod extract_tests {
    use similar_asserts::assert_eq;

    use super::{cigar_reference_span, extract_region_ends};
    use crate::filters::RejectCounts;
    use crate::regions::{EndCandidate, Region};
    use crate::tags::TagMatcher;
    use crate::test_utils::{open_indexed, read2_sam, write_indexed_bam};
    use crate::util::{CancelFlag, Strand};

    // read-2 forward, mate (read-1) reverse
    const FWD: u16 = 163;
    // read-2 reverse, mate forward
    const REV: u16 = 147;

    #[test]
    fn test_extract_cigar_reference_span() {
        assert_eq!(cigar_reference_span("54M"), Some(54));
        assert_eq!(cigar_reference_span("4S50M"), Some(50));
        assert_eq!(cigar_reference_span("10M5D10M2I5M"), Some(30));
        assert_eq!(cigar_reference_span("10M100N10M"), Some(120));
        assert_eq!(cigar_reference_span("not-a-cigar"), None);
    }

    #[test]
    fn test_extract_forward_strand_uses_mate_end() {
        let dir = tempfile::tempdir().unwrap();
        let bam_fp = write_indexed_bam(
            dir.path(),
            "extract.bam",
            &[
                // mates at 1185, span 10 -> mate end 1194
                read2_sam("a#AATT", FWD, "1", 1100, "10M", 1185, 0, "10M"),
                read2_sam("b#AATT", FWD, "1", 1105, "10M", 1185, 0, "10M"),
                read2_sam("c#AATT", FWD, "1", 1110, "10M", 1300, 0, "10M"),
                // reverse-strand read-2 must not contribute to a
                // forward-strand region
                read2_sam("d#AATT", REV, "1", 1120, "10M", 1020, 0, "10M"),
            ],
        );
        let matcher = TagMatcher::new(&["NNTT"]).unwrap();
        let mut reader = open_indexed(&bam_fp);
        let mut rejects = RejectCounts::default();
        let region = Region::new(
            "1".to_string(),
            1000,
            2000,
            10,
            -1.0,
            Strand::Positive,
        );
        let candidates = extract_region_ends(
            &mut reader,
            &region,
            &matcher,
            0,
            &mut rejects,
            &CancelFlag::default(),
        )
        .unwrap();
        assert_eq!(
            candidates,
            vec![
                EndCandidate::new(
                    "1".to_string(),
                    1194,
                    Strand::Positive,
                    2
                ),
                EndCandidate::new(
                    "1".to_string(),
                    1309,
                    Strand::Positive,
                    1
                ),
            ]
        );
        assert_eq!(rejects.wrong_strand, 1);
    }

    #[test]
    fn test_extract_reverse_strand_uses_mate_start() {
        let dir = tempfile::tempdir().unwrap();
        let bam_fp = write_indexed_bam(
            dir.path(),
            "extract_rev.bam",
            &[read2_sam("a#AATT", REV, "1", 1120, "10M", 1038, 0, "10M")],
        );
        let matcher = TagMatcher::new(&["NNTT"]).unwrap();
        let mut reader = open_indexed(&bam_fp);
        let mut rejects = RejectCounts::default();
        let region = Region::new(
            "1".to_string(),
            1000,
            2000,
            10,
            -1.0,
            Strand::Negative,
        );
        let candidates = extract_region_ends(
            &mut reader,
            &region,
            &matcher,
            0,
            &mut rejects,
            &CancelFlag::default(),
        )
        .unwrap();
        assert_eq!(
            candidates,
            vec![EndCandidate::new(
                "1".to_string(),
                1038,
                Strand::Negative,
                1
            )]
        );
    }
}
