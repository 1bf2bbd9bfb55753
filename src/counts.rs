use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rust_htslib::bam::{self, Read};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::Sample;
use crate::errs::{EcError, EcResult};
use crate::filters::{
    above_mismatch_threshold, is_duplicate, is_mapped, is_read2, RejectCounts,
};
use crate::regions::{zip_identical, Region};
use crate::tags::TagMatcher;
use crate::util::{get_query_name_string, CancelFlag, Strand};

/// One region with this input's per-barcode read tally. Every barcode
/// of the input appears as a key, possibly with a zero count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCounts {
    pub region: Region,
    pub counts: FxHashMap<String, u64>,
}

/// Count read-2s supporting a region at its chosen 3'-end strand,
/// keyed by the barcode they carry.
pub fn count_region_reads(
    reader: &mut bam::IndexedReader,
    region: &Region,
    matcher: &TagMatcher,
    mismatch_threshold: u32,
    rejects: &mut RejectCounts,
    cancel: &CancelFlag,
) -> EcResult<FxHashMap<String, u64>> {
    let strand = region
        .chosen
        .as_ref()
        .map(|chosen| chosen.strand())
        .unwrap_or(region.strand);
    let tid = reader
        .header()
        .tid(region.ref_name.as_bytes())
        .ok_or_else(|| EcError::ContigMissing(region.ref_name.clone()))?;
    reader.fetch((
        tid as i32,
        (region.start - 1) as i64,
        region.end as i64,
    ))?;

    let mut counts = matcher
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
        if Strand::from_record(&record) != strand {
            rejects.wrong_strand += 1;
            continue;
        }
        if above_mismatch_threshold(&record, mismatch_threshold)? {
            rejects.above_mismatch += 1;
            continue;
        }
        let read_name = get_query_name_string(&record)?;
        match matcher.match_read_name(&read_name) {
            Some(hit) => {
                *counts
                    .get_mut(hit.tag)
                    .expect("matcher only reports its own tags") += 1;
            }
            None => rejects.tag_unmatched += 1,
        }
    }
    Ok(counts)
}

/// The canonical bijection between (input, barcode) pairs and sample
/// slots, in sample declaration order.
#[derive(Debug, Clone)]
pub struct SampleIndex {
    slots: IndexMap<(PathBuf, String), usize>,
    names: Vec<String>,
}

impl SampleIndex {
    pub fn new(samples: &[Sample]) -> Self {
        let mut slots = IndexMap::new();
        let mut names = Vec::with_capacity(samples.len());
        for (idx, sample) in samples.iter().enumerate() {
            slots.insert((sample.bam_file.clone(), sample.tag.clone()), idx);
            names.push(sample.name.clone());
        }
        Self { slots, names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn index_of(&self, input: &Path, tag: &str) -> Option<usize> {
        self.slots.get(&(input.to_path_buf(), tag.to_owned())).copied()
    }
}

/// Stitch per-input barcode tallies into per-sample count vectors.
/// Region lists must agree through the chosen 3' end, every sample slot
/// must receive exactly one contribution, and an (input, barcode) pair
/// outside the sample table is fatal.
pub fn merge_region_counts(
    branch: &str,
    sample_index: &SampleIndex,
    per_input: &[(PathBuf, Vec<RegionCounts>)],
) -> EcResult<Vec<Region>> {
    let lists = per_input
        .iter()
        .map(|(_, counts)| counts.clone())
        .collect::<Vec<Vec<RegionCounts>>>();
    let zipped = zip_identical(branch, &lists, |a, b| {
        a.region.same_identity_through_chosen(&b.region)
    })?;

    zipped
        .into_iter()
        .map(|row| {
            let exemplar =
                row.first().expect("zip emits no empty rows").region.clone();
            let mut slots: Vec<Option<u64>> = vec![None; sample_index.len()];
            for ((input, _), region_counts) in per_input.iter().zip(row) {
                for (tag, count) in &region_counts.counts {
                    let idx = sample_index
                        .index_of(input, tag)
                        .ok_or_else(|| {
                            EcError::structural(
                                branch,
                                format!(
                                    "unknown input/barcode ({input:?}, {tag}) \
                                     for region {}",
                                    exemplar.identity_string()
                                ),
                            )
                        })?;
                    if slots[idx].replace(*count).is_some() {
                        return Err(EcError::structural(
                            branch,
                            format!(
                                "sample slot {idx} filled twice for region {}",
                                exemplar.identity_string()
                            ),
                        ));
                    }
                }
            }
            let sample_counts = slots
                .into_iter()
                .enumerate()
                .map(|(idx, slot)| {
                    slot.ok_or_else(|| {
                        EcError::structural(
                            branch,
                            format!(
                                "sample {} received no contribution for \
                                 region {}",
                                sample_index.names[idx],
                                exemplar.identity_string()
                            ),
                        )
                    })
                })
                .collect::<EcResult<Vec<u64>>>()?;
            let mut merged = exemplar;
            merged.sample_counts = sample_counts;
            Ok(merged)
        })
        .collect()
}
