use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use derive_new::new;
use itertools::Itertools;
use nom::bytes::complete::tag;
use nom::number::complete::double;
use nom::IResult;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errs::{EcError, EcResult};
use crate::regions::Region;
use crate::util::Strand;

/// Per-reference summary handed to the segmentation model alongside the
/// binned counts.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSummary {
    pub total_bp: u64,
    pub read_length: u32,
    pub sig_level: f64,
    pub bin_size: u64,
}

/// One bin's state assignment from the segmentation model.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinState {
    pub bin: u64,
    pub state: u8,
    pub log_prob: f64,
}

/// The segmentation boundary. The production implementation shells out
/// to the HMM binary; tests substitute an in-memory table.
pub trait Segmenter: Send + Sync {
    /// `bins` are (bin, read count) pairs in ascending bin order.
    fn segment(
        &self,
        bins: &[(u64, u64)],
        summary: &BinSummary,
    ) -> EcResult<Vec<BinState>>;
}

/// Drives the external HMM binary: bins on stdin as `bin\tcount` lines,
/// the summary as arguments, one `bin\tstate\tlog_prob` line per bin on
/// stdout. Non-zero exit is fatal.
#[derive(new, Debug, Clone)]
pub struct SubprocessSegmenter {
    binary: PathBuf,
}

fn parse_state_line(line: &str) -> IResult<&str, BinState> {
    let (rest, bin) = nom::character::complete::u64(line)?;
    let (rest, _) = tag("\t")(rest)?;
    let (rest, state) = nom::character::complete::u8(rest)?;
    let (rest, _) = tag("\t")(rest)?;
    let (rest, log_prob) = double(rest)?;
    Ok((rest, BinState::new(bin, state, log_prob)))
}

impl Segmenter for SubprocessSegmenter {
    fn segment(
        &self,
        bins: &[(u64, u64)],
        summary: &BinSummary,
    ) -> EcResult<Vec<BinState>> {
        let command_label = self.binary.to_string_lossy().to_string();
        let mut child = Command::new(&self.binary)
            .arg(format!("{}", summary.total_bp))
            .arg(format!("{}", summary.read_length))
            .arg(format!("{}", summary.sig_level))
            .arg(format!("{}", summary.bin_size))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                EcError::IoUnavailable(format!(
                    "failed to spawn {command_label}, {e}"
                ))
            })?;
        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                EcError::IoUnavailable(format!(
                    "no stdin handle for {command_label}"
                ))
            })?;
            for (bin, count) in bins {
                stdin.write_all(format!("{bin}\t{count}\n").as_bytes())?;
            }
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EcError::SubprocessFailure {
                command: command_label,
                status: output.status.code().unwrap_or(-1),
            });
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| {
                parse_state_line(l).map(|(_, state)| state).map_err(|_| {
                    EcError::SubprocessOutputInvalid(l.to_string())
                })
            })
            .collect::<EcResult<Vec<BinState>>>()
    }
}

/// Canned state assignments, the unit-test plug point. Bins absent from
/// the table are assigned state 0.
#[derive(new, Debug, Default)]
pub struct TableSegmenter {
    states: FxHashMap<u64, (u8, f64)>,
}

impl Segmenter for TableSegmenter {
    fn segment(
        &self,
        bins: &[(u64, u64)],
        _summary: &BinSummary,
    ) -> EcResult<Vec<BinState>> {
        Ok(bins
            .iter()
            .map(|(bin, _count)| {
                let (state, log_prob) =
                    self.states.get(bin).copied().unwrap_or((0, 0.0));
                BinState::new(*bin, state, log_prob)
            })
            .collect())
    }
}

/// Join runs of consecutive positive-state bins into regions carrying
/// the per-bin maximum read count and the summed log probability.
/// Region coordinates are 1-based inclusive.
pub fn join_positive_bins(
    states: &[BinState],
    counts: &FxHashMap<u64, u64>,
    bin_size: u64,
    ref_name: &str,
    strand: Strand,
) -> Vec<Region> {
    let positive = states
        .iter()
        .filter(|b| b.state > 0)
        .sorted_by_key(|b| b.bin)
        .collect::<Vec<&BinState>>();

    let mut regions = Vec::new();
    let mut run: Vec<&BinState> = Vec::new();
    for bin_state in positive {
        if let Some(last) = run.last() {
            if bin_state.bin != last.bin + 1 {
                regions.push(run_to_region(
                    &run, counts, bin_size, ref_name, strand,
                ));
                run.clear();
            }
        }
        run.push(bin_state);
    }
    if !run.is_empty() {
        regions.push(run_to_region(&run, counts, bin_size, ref_name, strand));
    }
    regions
}

fn run_to_region(
    run: &[&BinState],
    counts: &FxHashMap<u64, u64>,
    bin_size: u64,
    ref_name: &str,
    strand: Strand,
) -> Region {
    let first = run.first().expect("bin run cannot be empty");
    let last = run.last().expect("bin run cannot be empty");
    let max_read_count = run
        .iter()
        .map(|b| counts.get(&b.bin).copied().unwrap_or(0))
        .max()
        .unwrap_or(0);
    let log_prob_sum = run.iter().map(|b| b.log_prob).sum::<f64>();
    Region::new(
        ref_name.to_owned(),
        first.bin * bin_size + 1,
        (last.bin + 1) * bin_size,
        max_read_count,
        log_prob_sum,
        strand,
    )
}

#[cfg(test)]
mod hmm_tests {
    use rustc_hash::FxHashMap;
    use similar_asserts::assert_eq;

    use super::{
        join_positive_bins, parse_state_line, BinState, BinSummary, Segmenter,
        TableSegmenter,
    };
    use crate::util::Strand;

    #[test]
    fn test_hmm_state_line_parses() {
        let (_, state) = parse_state_line("12\t1\t-3.25").unwrap();
        assert_eq!(state, BinState::new(12, 1, -3.25));
        assert!(parse_state_line("twelve\t1\t-3.25").is_err());
    }

    #[test]
    fn test_hmm_table_segmenter_defaults_to_zero_state() {
        let mut states = FxHashMap::default();
        states.insert(2u64, (1u8, -1.5f64));
        let segmenter = TableSegmenter::new(states);
        let summary = BinSummary::new(10_000, 54, 0.001, 100);
        let assigned = segmenter
            .segment(&[(1, 4), (2, 9), (3, 2)], &summary)
            .unwrap();
        assert_eq!(
            assigned,
            vec![
                BinState::new(1, 0, 0.0),
                BinState::new(2, 1, -1.5),
                BinState::new(3, 0, 0.0),
            ]
        );
    }

    #[test]
    fn test_hmm_join_contiguous_positive_bins() {
        let states = vec![
            BinState::new(1, 1, -1.0),
            BinState::new(2, 1, -2.0),
            BinState::new(3, 0, 0.0),
            BinState::new(5, 1, -4.0),
        ];
        let counts = [(1u64, 5u64), (2, 9), (5, 3)]
            .into_iter()
            .collect::<FxHashMap<u64, u64>>();
        let regions =
            join_positive_bins(&states, &counts, 100, "1", Strand::Positive);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].start, 101);
        assert_eq!(regions[0].end, 300);
        assert_eq!(regions[0].max_read_count, 9);
        assert_eq!(regions[0].log_prob_sum, -3.0);
        assert_eq!(regions[1].start, 501);
        assert_eq!(regions[1].end, 600);
        assert_eq!(regions[1].max_read_count, 3);
    }

    #[test]
    fn test_hmm_no_positive_bins_no_regions() {
        let states = vec![BinState::new(1, 0, 0.0)];
        let counts = FxHashMap::default();
        let regions =
            join_positive_bins(&states, &counts, 100, "1", Strand::Negative);
        assert!(regions.is_empty());
    }
}
