use log::debug;
use rust_htslib::bam::{self, ext::BamRecordExtensions, Read};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errs::EcResult;
use crate::filters::{
    above_mismatch_threshold, is_duplicate, is_mapped, is_read2, RejectCounts,
};
use crate::tags::TagMatcher;
use crate::util::{
    get_query_name_string, CancelFlag, ReferenceRecord, Strand,
};

/// Read-2 coverage per fixed-width bin, stratified by strand. Bin `b`
/// covers `[b*W, (b+1)*W)` in 0-based coordinates; a read increments
/// every bin its alignment spans.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BinnedCoverage {
    pub forward: FxHashMap<u64, u64>,
    pub reverse: FxHashMap<u64, u64>,
}

impl BinnedCoverage {
    fn strand_bins(&mut self, strand: Strand) -> &mut FxHashMap<u64, u64> {
        match strand {
            Strand::Positive => &mut self.forward,
            Strand::Negative => &mut self.reverse,
        }
    }

    pub fn bins(&self, strand: Strand) -> &FxHashMap<u64, u64> {
        match strand {
            Strand::Positive => &self.forward,
            Strand::Negative => &self.reverse,
        }
    }
}

/// Tally read-2s per matched barcode over one reference. This is the
/// QC artifact that shows how the input's reads distribute over its
/// configured barcodes.
pub fn count_tag_occurrences(
    reader: &mut bam::IndexedReader,
    reference: &ReferenceRecord,
    matcher: &TagMatcher,
    rejects: &mut RejectCounts,
    cancel: &CancelFlag,
) -> EcResult<FxHashMap<String, u64>> {
    reader.fetch(reference.tid as i32)?;
    let mut tallies = matcher
        .tags()
        .map(|tag| (tag.to_owned(), 0u64))
        .collect::<FxHashMap<String, u64>>();
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
        let read_name = get_query_name_string(&record)?;
        match matcher.match_read_name(&read_name) {
            Some(hit) => {
                *tallies
                    .get_mut(hit.tag)
                    .expect("matcher only reports its own tags") += 1;
            }
            None => rejects.tag_unmatched += 1,
        }
    }
    Ok(tallies)
}

/// Bin surviving read-2s over one reference sequence. Filters are
/// applied cheapest-first, flag checks before the NM fetch and the tag
/// regex.
pub fn bin_read2_coverage(
    reader: &mut bam::IndexedReader,
    reference: &ReferenceRecord,
    bin_size: u64,
    mismatch_threshold: u32,
    matcher: &TagMatcher,
    rejects: &mut RejectCounts,
    cancel: &CancelFlag,
) -> EcResult<BinnedCoverage> {
    reader.fetch(reference.tid as i32)?;
    let mut coverage = BinnedCoverage::default();
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
        let strand = Strand::from_record(&record);
        let start = record.pos() as u64;
        let end = record.reference_end() as u64;
        if end <= start {
            debug!("record {read_name} has an empty reference span");
            continue;
        }
        let bins = coverage.strand_bins(strand);
        for bin in (start / bin_size)..=((end - 1) / bin_size) {
            *bins.entry(bin).or_insert(0) += 1;
        }
    }
    Ok(coverage)
}
