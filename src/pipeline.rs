use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;
use rust_htslib::bam::{self, Read};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::binning::{
    bin_read2_coverage, count_tag_occurrences, BinnedCoverage,
};
use crate::chunks::{chunk_references, select_chunks, Chunk};
use crate::config::Config;
use crate::counts::{
    count_region_reads, merge_region_counts, RegionCounts, SampleIndex,
};
use crate::errs::{EcError, EcResult};
use crate::filters::RejectCounts;
use crate::hmm::{join_positive_bins, BinSummary, Segmenter};
use crate::peaks::{collect_peaks, merge_peak_lists, Peak, StrandedPeaks};
use crate::regions::Region;
use crate::sequence::SequenceSource;
use crate::tags::TagMatcher;
use crate::three_prime::choose::choose_region_end;
use crate::three_prime::extract::extract_for_regions;
use crate::three_prime::filter::filter_region_candidates;
use crate::three_prime::merge::merge_candidate_lists;
use crate::util::{get_master_progress_bar, get_targets, CancelFlag, Strand};

const STAGE_TAG_COUNTS: &str = "tag_counts";
const STAGE_BINS: &str = "bins";
const STAGE_PEAKS: &str = "peaks";
const STAGE_REGIONS: &str = "regions";
const STAGE_ENDS: &str = "ends";
const STAGE_MERGED_ENDS: &str = "merged_ends";
const STAGE_FILTERED: &str = "filtered";
const STAGE_CHOSEN: &str = "chosen";
const STAGE_COUNTS: &str = "counts";
const STAGE_TABLE: &str = "table";

const STAGES: [&str; 10] = [
    STAGE_TAG_COUNTS,
    STAGE_BINS,
    STAGE_PEAKS,
    STAGE_REGIONS,
    STAGE_ENDS,
    STAGE_MERGED_ENDS,
    STAGE_FILTERED,
    STAGE_CHOSEN,
    STAGE_COUNTS,
    STAGE_TABLE,
];

type NamedBins = Vec<(String, BinnedCoverage)>;
type NamedPeaks = Vec<(String, StrandedPeaks)>;

/// Materializes the stage DAG over (input x chunk) and per-chunk jobs.
/// Every job writes exactly one JSON artifact atomically; rerunning a
/// completed job is a no-op, so a failed run resumes from its last
/// complete stage.
pub struct Pipeline<'a> {
    config: &'a Config,
    work_dir: PathBuf,
    segmenter: &'a dyn Segmenter,
    source: &'a dyn SequenceSource,
    sample_index: SampleIndex,
    chunks: Vec<Chunk>,
    suppress_progress: bool,
    cancel: CancelFlag,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        work_dir: PathBuf,
        segmenter: &'a dyn Segmenter,
        source: &'a dyn SequenceSource,
        suppress_progress: bool,
    ) -> EcResult<Self> {
        let first_input = config
            .inputs()
            .first()
            .copied()
            .cloned()
            .ok_or_else(|| {
                EcError::ConfigInvalid("no inputs configured".to_string())
            })?;
        let reader = bam::Reader::from_path(&first_input)?;
        let references = get_targets(reader.header());
        let chunks = select_chunks(
            chunk_references(
                &references,
                config.chunk_total(),
                &config.skip_sequences,
            )?,
            config.test_chunk,
        )?;
        info!(
            "grouped {} references into {} chunks",
            references.len(),
            chunks.len()
        );
        Ok(Self {
            config,
            work_dir,
            segmenter,
            source,
            sample_index: SampleIndex::new(&config.samples),
            chunks,
            suppress_progress,
            cancel: CancelFlag::default(),
        })
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn artifact_path(
        &self,
        stage: &str,
        chunk: &Chunk,
        input_idx: Option<usize>,
    ) -> PathBuf {
        let file_name = match input_idx {
            Some(idx) => format!("{}.input_{idx}.json", chunk.label()),
            None => format!("{}.json", chunk.label()),
        };
        self.work_dir.join(stage).join(file_name)
    }

    fn persist<T: Serialize>(&self, path: &Path, value: &T) -> EcResult<()> {
        self.cancel.check()?;
        let parent = path.parent().expect("artifacts live under work_dir");
        std::fs::create_dir_all(parent)?;
        let tmp = path.with_extension("json.tmp");
        let fh = std::fs::File::create(&tmp)?;
        serde_json::to_writer(std::io::BufWriter::new(fh), value)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, path: &Path) -> EcResult<T> {
        let fh = std::fs::File::open(path).map_err(|e| {
            EcError::IoUnavailable(format!(
                "missing upstream artifact {path:?}, {e}"
            ))
        })?;
        Ok(serde_json::from_reader(std::io::BufReader::new(fh))?)
    }

    fn input_matcher(&self, input: &Path) -> EcResult<TagMatcher> {
        TagMatcher::new(&self.config.tags_for_input(input))
    }

    fn open_input(&self, input: &Path) -> EcResult<bam::IndexedReader> {
        bam::IndexedReader::from_path(input).map_err(|e| {
            EcError::IoUnavailable(format!("failed to open {input:?}, {e}"))
        })
    }

    fn stage_progress(&self, stage: &str, jobs: usize) -> ProgressBar {
        if self.suppress_progress {
            ProgressBar::hidden()
        } else {
            let pb = get_master_progress_bar(jobs);
            pb.set_message(stage.to_owned());
            pb
        }
    }

    /// Jobs of a per-(input x chunk) stage, skipping completed ones.
    fn per_input_jobs(&self, stage: &str) -> Vec<(usize, &Chunk)> {
        let n_inputs = self.config.inputs().len();
        self.chunks
            .iter()
            .cartesian_product(0..n_inputs)
            .map(|(chunk, input_idx)| (input_idx, chunk))
            .filter(|(input_idx, chunk)| {
                !self.artifact_path(stage, chunk, Some(*input_idx)).exists()
            })
            .collect()
    }

    fn per_chunk_jobs(&self, stage: &str) -> Vec<&Chunk> {
        self.chunks
            .iter()
            .filter(|chunk| {
                !self.artifact_path(stage, chunk, None).exists()
            })
            .collect()
    }

    pub fn run(&self) -> EcResult<()> {
        info!("starting pipeline over {} stages", STAGES.len());
        self.run_per_input_stage(STAGE_TAG_COUNTS, |input_idx, chunk| {
            self.run_tag_counts_job(input_idx, chunk)
        })?;
        self.run_per_input_stage(STAGE_BINS, |input_idx, chunk| {
            self.run_bins_job(input_idx, chunk)
        })?;
        self.run_per_input_stage(STAGE_PEAKS, |input_idx, chunk| {
            self.run_peaks_job(input_idx, chunk)
        })?;
        self.run_per_chunk_stage(STAGE_REGIONS, |chunk| {
            self.run_regions_job(chunk)
        })?;
        self.run_per_input_stage(STAGE_ENDS, |input_idx, chunk| {
            self.run_ends_job(input_idx, chunk)
        })?;
        self.run_per_chunk_stage(STAGE_MERGED_ENDS, |chunk| {
            self.run_merged_ends_job(chunk)
        })?;
        self.run_per_chunk_stage(STAGE_FILTERED, |chunk| {
            self.run_filtered_job(chunk)
        })?;
        self.run_per_chunk_stage(STAGE_CHOSEN, |chunk| {
            self.run_chosen_job(chunk)
        })?;
        self.run_per_input_stage(STAGE_COUNTS, |input_idx, chunk| {
            self.run_counts_job(input_idx, chunk)
        })?;
        self.run_per_chunk_stage(STAGE_TABLE, |chunk| {
            self.run_table_job(chunk)
        })?;
        info!("pipeline complete");
        Ok(())
    }

    fn run_per_input_stage<F>(&self, stage: &str, job: F) -> EcResult<()>
    where
        F: Fn(usize, &Chunk) -> EcResult<()> + Sync,
    {
        self.cancel.check()?;
        let jobs = self.per_input_jobs(stage);
        debug!("stage {stage}: {} jobs to run", jobs.len());
        let pb = self.stage_progress(stage, jobs.len());
        let result = jobs
            .par_iter()
            .map(|(input_idx, chunk)| {
                let job_result = job(*input_idx, chunk);
                pb.inc(1);
                job_result
            })
            .collect::<EcResult<Vec<()>>>();
        pb.finish_and_clear();
        result.map(|_| ())
    }

    fn run_per_chunk_stage<F>(&self, stage: &str, job: F) -> EcResult<()>
    where
        F: Fn(&Chunk) -> EcResult<()> + Sync,
    {
        self.cancel.check()?;
        let jobs = self.per_chunk_jobs(stage);
        debug!("stage {stage}: {} jobs to run", jobs.len());
        let pb = self.stage_progress(stage, jobs.len());
        let result = jobs
            .par_iter()
            .map(|chunk| {
                let job_result = job(chunk);
                pb.inc(1);
                job_result
            })
            .collect::<EcResult<Vec<()>>>();
        pb.finish_and_clear();
        result.map(|_| ())
    }

    fn run_tag_counts_job(
        &self,
        input_idx: usize,
        chunk: &Chunk,
    ) -> EcResult<()> {
        let input = self.config.inputs()[input_idx].clone();
        let matcher = self.input_matcher(&input)?;
        let mut reader = self.open_input(&input)?;
        let mut rejects = RejectCounts::default();
        let mut tallies: Vec<(String, FxHashMap<String, u64>)> =
            Vec::with_capacity(chunk.sequences.len());
        for reference in &chunk.sequences {
            self.cancel.check()?;
            let tag_counts = count_tag_occurrences(
                &mut reader,
                reference,
                &matcher,
                &mut rejects,
                &self.cancel,
            )?;
            tallies.push((reference.name.clone(), tag_counts));
        }
        self.persist(
            &self.artifact_path(STAGE_TAG_COUNTS, chunk, Some(input_idx)),
            &tallies,
        )
    }

    fn run_bins_job(&self, input_idx: usize, chunk: &Chunk) -> EcResult<()> {
        let input = self.config.inputs()[input_idx].clone();
        let matcher = self.input_matcher(&input)?;
        let mut reader = self.open_input(&input)?;
        let mut rejects = RejectCounts::default();
        let mut binned: NamedBins = Vec::with_capacity(chunk.sequences.len());
        for reference in &chunk.sequences {
            self.cancel.check()?;
            let coverage = bin_read2_coverage(
                &mut reader,
                reference,
                self.config.bin_size,
                self.config.mismatch_threshold(),
                &matcher,
                &mut rejects,
                &self.cancel,
            )?;
            binned.push((reference.name.clone(), coverage));
        }
        debug!(
            "bins {}/{input:?} rejects:\n{}",
            chunk.label(),
            rejects.to_table()
        );
        self.persist(
            &self.artifact_path(STAGE_BINS, chunk, Some(input_idx)),
            &binned,
        )
    }

    fn run_peaks_job(&self, input_idx: usize, chunk: &Chunk) -> EcResult<()> {
        let input = self.config.inputs()[input_idx].clone();
        let matcher = self.input_matcher(&input)?;
        let mut reader = self.open_input(&input)?;
        let mut rejects = RejectCounts::default();
        let mut peaks: NamedPeaks = Vec::with_capacity(chunk.sequences.len());
        for reference in &chunk.sequences {
            self.cancel.check()?;
            let stranded = collect_peaks(
                &mut reader,
                reference,
                self.config.peak_buffer_width,
                self.config.mismatch_threshold(),
                &matcher,
                &mut rejects,
                &self.cancel,
            )?;
            peaks.push((reference.name.clone(), stranded));
        }
        self.persist(
            &self.artifact_path(STAGE_PEAKS, chunk, Some(input_idx)),
            &peaks,
        )
    }

    fn run_regions_job(&self, chunk: &Chunk) -> EcResult<()> {
        let n_inputs = self.config.inputs().len();
        let per_input_bins = (0..n_inputs)
            .map(|idx| {
                self.load::<NamedBins>(
                    &self.artifact_path(STAGE_BINS, chunk, Some(idx)),
                )
            })
            .collect::<EcResult<Vec<NamedBins>>>()?;
        let per_input_peaks = (0..n_inputs)
            .map(|idx| {
                self.load::<NamedPeaks>(
                    &self.artifact_path(STAGE_PEAKS, chunk, Some(idx)),
                )
            })
            .collect::<EcResult<Vec<NamedPeaks>>>()?;

        let mut regions = Vec::new();
        for reference in &chunk.sequences {
            for strand in [Strand::Positive, Strand::Negative] {
                self.cancel.check()?;
                let peak_lists = per_input_peaks
                    .iter()
                    .filter_map(|named| {
                        named
                            .iter()
                            .find(|(name, _)| *name == reference.name)
                            .map(|(_, stranded)| stranded.peaks(strand))
                    })
                    .collect::<Vec<&[Peak]>>();
                let merged_peaks = merge_peak_lists(
                    &peak_lists,
                    self.config.peak_buffer_width,
                );
                if merged_peaks.is_empty() {
                    continue;
                }

                let mut bin_counts: FxHashMap<u64, u64> =
                    FxHashMap::default();
                for named in &per_input_bins {
                    if let Some((_, coverage)) = named
                        .iter()
                        .find(|(name, _)| *name == reference.name)
                    {
                        for (bin, count) in coverage.bins(strand) {
                            *bin_counts.entry(*bin).or_insert(0) += count;
                        }
                    }
                }
                let selected = bin_counts
                    .iter()
                    .filter(|(bin, _)| {
                        bin_overlaps_peaks(
                            **bin,
                            self.config.bin_size,
                            &merged_peaks,
                        )
                    })
                    .map(|(bin, count)| (*bin, *count))
                    .sorted()
                    .collect::<Vec<(u64, u64)>>();
                if selected.is_empty() {
                    continue;
                }
                let summary = BinSummary::new(
                    reference.length,
                    self.config.read2_length,
                    self.config.hmm_sig_level,
                    self.config.bin_size,
                );
                let states = self.segmenter.segment(&selected, &summary)?;
                regions.extend(join_positive_bins(
                    &states,
                    &bin_counts,
                    self.config.bin_size,
                    &reference.name,
                    strand,
                ));
            }
        }
        self.persist(&self.artifact_path(STAGE_REGIONS, chunk, None), &regions)
    }

    fn run_ends_job(&self, input_idx: usize, chunk: &Chunk) -> EcResult<()> {
        let regions = self.load::<Vec<Region>>(
            &self.artifact_path(STAGE_REGIONS, chunk, None),
        )?;
        let input = self.config.inputs()[input_idx].clone();
        let matcher = self.input_matcher(&input)?;
        let mut reader = self.open_input(&input)?;
        let mut rejects = RejectCounts::default();
        let enriched = extract_for_regions(
            &mut reader,
            &regions,
            &matcher,
            self.config.mismatch_threshold(),
            &mut rejects,
            &self.cancel,
        )?;
        debug!(
            "ends {}/{input:?} rejects:\n{}",
            chunk.label(),
            rejects.to_table()
        );
        self.persist(
            &self.artifact_path(STAGE_ENDS, chunk, Some(input_idx)),
            &enriched,
        )
    }

    fn run_merged_ends_job(&self, chunk: &Chunk) -> EcResult<()> {
        let n_inputs = self.config.inputs().len();
        let per_input = (0..n_inputs)
            .map(|idx| {
                self.load::<Vec<Region>>(
                    &self.artifact_path(STAGE_ENDS, chunk, Some(idx)),
                )
            })
            .collect::<EcResult<Vec<Vec<Region>>>>()?;
        let merged = merge_candidate_lists(&chunk.label(), &per_input)?;
        self.persist(
            &self.artifact_path(STAGE_MERGED_ENDS, chunk, None),
            &merged,
        )
    }

    fn run_filtered_job(&self, chunk: &Chunk) -> EcResult<()> {
        let mut regions = self.load::<Vec<Region>>(
            &self.artifact_path(STAGE_MERGED_ENDS, chunk, None),
        )?;
        for region in regions.iter_mut() {
            self.cancel.check()?;
            filter_region_candidates(region, self.source)?;
        }
        self.persist(&self.artifact_path(STAGE_FILTERED, chunk, None), &regions)
    }

    fn run_chosen_job(&self, chunk: &Chunk) -> EcResult<()> {
        let mut regions = self.load::<Vec<Region>>(
            &self.artifact_path(STAGE_FILTERED, chunk, None),
        )?;
        regions.iter_mut().for_each(choose_region_end);
        self.persist(&self.artifact_path(STAGE_CHOSEN, chunk, None), &regions)
    }

    fn run_counts_job(&self, input_idx: usize, chunk: &Chunk) -> EcResult<()> {
        let regions = self.load::<Vec<Region>>(
            &self.artifact_path(STAGE_CHOSEN, chunk, None),
        )?;
        let input = self.config.inputs()[input_idx].clone();
        let matcher = self.input_matcher(&input)?;
        let mut reader = self.open_input(&input)?;
        let mut rejects = RejectCounts::default();
        let counted = regions
            .iter()
            .map(|region| {
                self.cancel.check()?;
                let counts = count_region_reads(
                    &mut reader,
                    region,
                    &matcher,
                    self.config.mismatch_threshold(),
                    &mut rejects,
                    &self.cancel,
                )?;
                Ok(RegionCounts { region: region.clone(), counts })
            })
            .collect::<EcResult<Vec<RegionCounts>>>()?;
        self.persist(
            &self.artifact_path(STAGE_COUNTS, chunk, Some(input_idx)),
            &counted,
        )
    }

    fn run_table_job(&self, chunk: &Chunk) -> EcResult<()> {
        let per_input = self
            .config
            .inputs()
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                let counts = self.load::<Vec<RegionCounts>>(
                    &self.artifact_path(STAGE_COUNTS, chunk, Some(idx)),
                )?;
                Ok(((*input).clone(), counts))
            })
            .collect::<EcResult<Vec<(PathBuf, Vec<RegionCounts>)>>>()?;
        let merged = merge_region_counts(
            &chunk.label(),
            &self.sample_index,
            &per_input,
        )?;
        self.persist(&self.artifact_path(STAGE_TABLE, chunk, None), &merged)
    }

    /// All finished regions across chunks, ordered by chromosome (header
    /// ordinal) then region start.
    pub fn collect_regions(&self) -> EcResult<Vec<Region>> {
        let ordinals = self
            .chunks
            .iter()
            .flat_map(|chunk| chunk.sequences.iter())
            .map(|reference| (reference.name.clone(), reference.tid))
            .collect::<FxHashMap<String, u32>>();
        let mut regions = Vec::new();
        for chunk in &self.chunks {
            regions.extend(self.load::<Vec<Region>>(
                &self.artifact_path(STAGE_TABLE, chunk, None),
            )?);
        }
        regions.sort_by_key(|region| {
            (
                ordinals.get(&region.ref_name).copied().unwrap_or(u32::MAX),
                region.start,
                region.end,
            )
        });
        Ok(regions)
    }

    pub fn sample_names(&self) -> &[String] {
        self.sample_index.names()
    }
}

fn bin_overlaps_peaks(bin: u64, bin_size: u64, peaks: &[Peak]) -> bool {
    let bin_start = bin * bin_size + 1;
    let bin_end = (bin + 1) * bin_size;
    // peaks are coordinate-ordered, find the first that could reach the
    // bin
    let idx = peaks.partition_point(|p| p.end < bin_start);
    peaks.get(idx).map(|p| p.start <= bin_end).unwrap_or(false)
}
