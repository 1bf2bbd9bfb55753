use derive_new::new;
use itertools::Itertools;
use rust_htslib::bam::{self, ext::BamRecordExtensions, Read};
use serde::{Deserialize, Serialize};

use crate::errs::EcResult;
use crate::filters::{
    above_mismatch_threshold, is_duplicate, is_mapped, is_read2, RejectCounts,
};
use crate::tags::TagMatcher;
use crate::util::{
    get_query_name_string, CancelFlag, ReferenceRecord, Strand,
};

/// A maximal run of read-2 alignments whose inter-alignment gaps stay
/// under the buffer width. Coordinates are 1-based and inclusive.
#[derive(new, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub start: u64,
    pub end: u64,
    pub read_count: u64,
}

/// Buffered-proximity clustering over coordinate-ordered intervals. A
/// new interval joins the current peak iff its start is within
/// `buffer_width` of the peak end, exclusive.
#[derive(Debug)]
pub struct PeakBuilder {
    buffer_width: u64,
    current: Option<Peak>,
    peaks: Vec<Peak>,
}

impl PeakBuilder {
    pub fn new(buffer_width: u64) -> Self {
        Self { buffer_width, current: None, peaks: Vec::new() }
    }

    pub fn push(&mut self, start: u64, end: u64, count: u64) {
        match self.current.as_mut() {
            None => {
                self.current = Some(Peak::new(start, end, count));
            }
            Some(peak) => {
                let within_buffer = start <= peak.end
                    || (start - peak.end) < self.buffer_width;
                if within_buffer {
                    peak.end = std::cmp::max(peak.end, end);
                    peak.read_count += count;
                } else {
                    let finished = self.current.replace(Peak::new(
                        start, end, count,
                    ));
                    self.peaks.extend(finished);
                }
            }
        }
    }

    pub fn finish(mut self) -> Vec<Peak> {
        self.peaks.extend(self.current.take());
        self.peaks
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct StrandedPeaks {
    pub forward: Vec<Peak>,
    pub reverse: Vec<Peak>,
}

impl StrandedPeaks {
    pub fn peaks(&self, strand: Strand) -> &[Peak] {
        match strand {
            Strand::Positive => &self.forward,
            Strand::Negative => &self.reverse,
        }
    }
}

/// Build strand-stratified peaks over one reference from surviving
/// read-2s, in one coordinate-ordered traversal.
pub fn collect_peaks(
    reader: &mut bam::IndexedReader,
    reference: &ReferenceRecord,
    buffer_width: u64,
    mismatch_threshold: u32,
    matcher: &TagMatcher,
    rejects: &mut RejectCounts,
    cancel: &CancelFlag,
) -> EcResult<StrandedPeaks> {
    reader.fetch(reference.tid as i32)?;
    let mut forward = PeakBuilder::new(buffer_width);
    let mut reverse = PeakBuilder::new(buffer_width);
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
        if above_mismatch_threshold(&record, mismatch_threshold)? {
            rejects.above_mismatch += 1;
            continue;
        }
        let read_name = get_query_name_string(&record)?;
        if matcher.match_read_name(&read_name).is_none() {
            rejects.tag_unmatched += 1;
            continue;
        }
        let start = (record.pos() + 1) as u64;
        let end = record.reference_end() as u64;
        match Strand::from_record(&record) {
            Strand::Positive => forward.push(start, end, 1),
            Strand::Negative => reverse.push(start, end, 1),
        }
    }
    Ok(StrandedPeaks {
        forward: forward.finish(),
        reverse: reverse.finish(),
    })
}

/// Union peak lists from multiple inputs per strand, re-clustering the
/// coordinate-ordered union with the same buffered-proximity rule and
/// summing read counts.
pub fn merge_peak_lists(lists: &[&[Peak]], buffer_width: u64) -> Vec<Peak> {
    let mut builder = PeakBuilder::new(buffer_width);
    lists
        .iter()
        .flat_map(|peaks| peaks.iter())
        .sorted_by_key(|p| (p.start, p.end))
        .for_each(|p| builder.push(p.start, p.end, p.read_count));
    builder.finish()
}

pub fn merge_stranded_peaks(
    per_input: &[StrandedPeaks],
    buffer_width: u64,
) -> StrandedPeaks {
    let forward = per_input
        .iter()
        .map(|sp| sp.forward.as_slice())
        .collect::<Vec<&[Peak]>>();
    let reverse = per_input
        .iter()
        .map(|sp| sp.reverse.as_slice())
        .collect::<Vec<&[Peak]>>();
    StrandedPeaks {
        forward: merge_peak_lists(&forward, buffer_width),
        reverse: merge_peak_lists(&reverse, buffer_width),
    }
}

#[cfg(test)]
mod peaks_tests {
    use similar_asserts::assert_eq;

    use super::{merge_peak_lists, Peak, PeakBuilder};

    #[test]
    fn test_peaks_cluster_within_buffer() {
        let mut builder = PeakBuilder::new(100);
        builder.push(195, 244, 1);
        builder.push(200, 249, 1);
        builder.push(245, 294, 1);
        builder.push(400, 449, 1);
        let peaks = builder.finish();
        assert_eq!(
            peaks,
            vec![Peak::new(195, 294, 3), Peak::new(400, 449, 1)]
        );
    }

    #[test]
    fn test_peaks_gap_equal_to_buffer_splits() {
        let mut builder = PeakBuilder::new(100);
        builder.push(100, 150, 1);
        // gap of exactly buffer_width starts a new peak
        builder.push(250, 300, 1);
        let peaks = builder.finish();
        assert_eq!(peaks.len(), 2);

        let mut builder = PeakBuilder::new(100);
        builder.push(100, 150, 1);
        builder.push(249, 300, 1);
        let peaks = builder.finish();
        assert_eq!(peaks, vec![Peak::new(100, 300, 2)]);
    }

    #[test]
    fn test_peaks_contained_read_does_not_shrink_end() {
        let mut builder = PeakBuilder::new(10);
        builder.push(100, 300, 1);
        builder.push(120, 180, 1);
        let peaks = builder.finish();
        assert_eq!(peaks, vec![Peak::new(100, 300, 2)]);
    }

    #[test]
    fn test_peaks_empty_input_yields_no_peaks() {
        let builder = PeakBuilder::new(100);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn test_peaks_merge_across_inputs_sums_counts() {
        let a = vec![Peak::new(195, 294, 3), Peak::new(600, 650, 1)];
        let b = vec![Peak::new(250, 320, 2)];
        let merged = merge_peak_lists(&[&a, &b], 100);
        assert_eq!(
            merged,
            vec![Peak::new(195, 320, 5), Peak::new(600, 650, 1)]
        );
    }

    #[test]
    fn test_peaks_merge_is_deterministic_under_input_order() {
        let a = vec![Peak::new(100, 200, 1)];
        let b = vec![Peak::new(150, 260, 2)];
        let ab = merge_peak_lists(&[&a, &b], 50);
        let ba = merge_peak_lists(&[&b, &a], 50);
        assert_eq!(ab, ba);
    }
}
