use std::path::PathBuf;

use clap::ValueEnum;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_htslib::bam::{self, Read};
use rustc_hash::FxHashMap;

use crate::errs::{EcError, EcResult};
use crate::filters::{is_paired, is_properly_paired, mate_is_mapped};

/// Which read pairs participate in downsampling.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum PairingSense {
    /// Any paired record
    #[clap(name = "paired")]
    Paired,
    /// Paired with both mates mapped
    #[clap(name = "mapped")]
    MappedPaired,
    /// Properly paired per the aligner
    #[clap(name = "proper")]
    ProperlyPaired,
}

impl PairingSense {
    fn accepts(&self, record: &bam::Record) -> bool {
        match self {
            Self::Paired => is_paired(record),
            Self::MappedPaired => {
                is_paired(record)
                    && !record.is_unmapped()
                    && mate_is_mapped(record)
            }
            Self::ProperlyPaired => is_properly_paired(record),
        }
    }
}

/// Count the pairs a downsampling run would draw from.
pub fn count_pairs(bam_fp: &PathBuf, sense: PairingSense) -> EcResult<u64> {
    let mut reader = bam::Reader::from_path(bam_fp)?;
    let mut record = bam::Record::new();
    let mut records = 0u64;
    while let Some(result) = reader.read(&mut record) {
        result?;
        if sense.accepts(&record) {
            records += 1;
        }
    }
    Ok(records / 2)
}

/// Reservoir-style retention of whole mate pairs down to `target`
/// pairs. The keep decision is made on first sight of a read name with
/// probability target/source and memoized until the sibling mate
/// appears; the memo entry is evicted as soon as both mates are
/// handled, bounding memory to in-flight pairs. Output keeps the
/// source header. Returns the number of pairs written.
pub fn downsample(
    in_fp: &PathBuf,
    out_fp: &PathBuf,
    target: u64,
    source: u64,
    sense: PairingSense,
    seed: u64,
) -> EcResult<u64> {
    if source == 0 {
        return Err(EcError::ConfigInvalid(
            "cannot downsample an input with no pairs".to_string(),
        ));
    }
    let keep_probability =
        (target as f64 / source as f64).clamp(0.0, 1.0);
    info!(
        "downsampling {in_fp:?} to {target} of {source} pairs \
         (p = {keep_probability:.4})"
    );

    let mut reader = bam::Reader::from_path(in_fp)?;
    let header = bam::Header::from_template(reader.header());
    let mut writer =
        bam::Writer::from_path(out_fp, &header, bam::Format::Bam)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut pending: FxHashMap<Vec<u8>, bool> = FxHashMap::default();
    let mut kept_pairs = 0u64;
    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result?;
        if !sense.accepts(&record) {
            continue;
        }
        let qname = record.qname().to_vec();
        match pending.remove(&qname) {
            Some(keep) => {
                // second mate, the pair's fate was sealed on first sight
                if keep {
                    writer.write(&record)?;
                }
            }
            None => {
                let keep = kept_pairs < target
                    && rng.gen_bool(keep_probability);
                if keep {
                    writer.write(&record)?;
                    kept_pairs += 1;
                }
                pending.insert(qname, keep);
            }
        }
    }
    info!("kept {kept_pairs} pairs, {} unpaired decisions", pending.len());
    Ok(kept_pairs)
}
