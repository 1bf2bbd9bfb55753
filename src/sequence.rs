use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rust_htslib::bam::{self, Read};
use rust_htslib::faidx;
use rustc_hash::FxHashMap;

use crate::errs::{EcError, EcResult};
use crate::util::{get_targets, Strand};

/// Reference-name/length pairs from a BAM header, in header order.
pub fn reference_lengths<P: AsRef<Path>>(
    bam_fp: P,
) -> EcResult<IndexMap<String, u64>> {
    let reader = bam::Reader::from_path(bam_fp.as_ref()).map_err(|e| {
        EcError::IoUnavailable(format!(
            "failed to open {:?}, {e}",
            bam_fp.as_ref()
        ))
    })?;
    Ok(get_targets(reader.header())
        .into_iter()
        .map(|rec| (rec.name, rec.length))
        .collect())
}

/// Random access to reference subsequences. Coordinates are 1-based and
/// inclusive; a negative-strand query returns the reverse complement.
pub trait SequenceSource: Send + Sync {
    fn sequence_length(&self, name: &str) -> Option<u64>;

    /// Out-of-range bounds are clipped to the sequence; a query entirely
    /// outside the sequence yields an empty string (sources backed by a
    /// remote annotation database instead pad with `N` past the end).
    fn get_subsequence(
        &self,
        name: &str,
        start: i64,
        end: i64,
        strand: Strand,
    ) -> EcResult<String>;

    fn get_downstream_subsequence(
        &self,
        name: &str,
        pos: i64,
        strand: Strand,
        length: u64,
    ) -> EcResult<String> {
        match strand {
            Strand::Positive => {
                self.get_subsequence(name, pos + 1, pos + length as i64, strand)
            }
            Strand::Negative => {
                self.get_subsequence(name, pos - length as i64, pos - 1, strand)
            }
        }
    }

    fn get_upstream_subsequence(
        &self,
        name: &str,
        pos: i64,
        strand: Strand,
        length: u64,
    ) -> EcResult<String> {
        match strand {
            Strand::Positive => {
                self.get_subsequence(name, pos - length as i64, pos - 1, strand)
            }
            Strand::Negative => {
                self.get_subsequence(name, pos + 1, pos + length as i64, strand)
            }
        }
    }
}

fn orient(seq: String, strand: Strand) -> String {
    match strand {
        Strand::Positive => seq,
        Strand::Negative => {
            String::from_utf8(bio::alphabets::dna::revcomp(seq.into_bytes()))
                .expect("reverse complement should stay UTF-8")
        }
    }
}

/// Indexed FASTA-backed source.
pub struct FastaSource {
    reader: faidx::Reader,
    lengths: FxHashMap<String, u64>,
}

// faidx::Reader holds a raw pointer, access is read-only
unsafe impl Send for FastaSource {}
unsafe impl Sync for FastaSource {}

impl FastaSource {
    pub fn from_path(fp: &PathBuf) -> EcResult<Self> {
        let reader = faidx::Reader::from_path(fp).map_err(|e| {
            EcError::IoUnavailable(format!("failed to open FASTA {fp:?}, {e}"))
        })?;
        let lengths = (0..reader.n_seqs())
            .map(|i| {
                let name = reader.seq_name(i as i32)?;
                let length = reader.fetch_seq_len(&name);
                Ok((name, length))
            })
            .collect::<Result<FxHashMap<String, u64>, rust_htslib::errors::Error>>()?;
        Ok(Self { reader, lengths })
    }
}

impl SequenceSource for FastaSource {
    fn sequence_length(&self, name: &str) -> Option<u64> {
        self.lengths.get(name).copied()
    }

    fn get_subsequence(
        &self,
        name: &str,
        start: i64,
        end: i64,
        strand: Strand,
    ) -> EcResult<String> {
        let length = self
            .sequence_length(name)
            .ok_or_else(|| EcError::ContigMissing(name.to_owned()))?;
        let start = std::cmp::max(start, 1);
        let end = std::cmp::min(end, length as i64);
        if start > end {
            return Ok(String::new());
        }
        let seq = self
            .reader
            .fetch_seq(name, (start - 1) as usize, (end - 1) as usize)
            .map(|bs| String::from_utf8_lossy(bs).to_uppercase())?;
        Ok(orient(seq, strand))
    }
}

/// In-memory source. With `pad_past_end` it reproduces the remote
/// annotation-database contract, `N`-padded strings past the sequence
/// end; without it, FASTA clipping semantics. Doubles as the unit-test
/// plug point.
pub struct MemorySequenceSource {
    seqs: FxHashMap<String, String>,
    pad_past_end: bool,
}

impl MemorySequenceSource {
    pub fn new(seqs: FxHashMap<String, String>) -> Self {
        Self { seqs, pad_past_end: false }
    }

    pub fn new_padding(seqs: FxHashMap<String, String>) -> Self {
        Self { seqs, pad_past_end: true }
    }
}

impl SequenceSource for MemorySequenceSource {
    fn sequence_length(&self, name: &str) -> Option<u64> {
        self.seqs.get(name).map(|s| s.len() as u64)
    }

    fn get_subsequence(
        &self,
        name: &str,
        start: i64,
        end: i64,
        strand: Strand,
    ) -> EcResult<String> {
        let seq = self
            .seqs
            .get(name)
            .ok_or_else(|| EcError::ContigMissing(name.to_owned()))?;
        let length = seq.len() as i64;
        let clipped_start = std::cmp::max(start, 1);
        let clipped_end = std::cmp::min(end, length);
        let mut sub = if clipped_start > clipped_end {
            String::new()
        } else {
            seq[(clipped_start - 1) as usize..clipped_end as usize].to_owned()
        };
        if self.pad_past_end && end > length {
            let deficit = (end - std::cmp::max(length, clipped_start - 1))
                as usize;
            sub.push_str(&"N".repeat(deficit));
        }
        Ok(orient(sub, strand))
    }
}

#[cfg(test)]
mod sequence_tests {
    use rustc_hash::FxHashMap;
    use similar_asserts::assert_eq;

    use super::{MemorySequenceSource, SequenceSource};
    use crate::util::Strand;

    fn source() -> MemorySequenceSource {
        let mut seqs = FxHashMap::default();
        seqs.insert("1".to_string(), "ACGTACGTAC".to_string());
        MemorySequenceSource::new(seqs)
    }

    #[test]
    fn test_sequence_forward_and_reverse_fetch() {
        let source = source();
        assert_eq!(
            source.get_subsequence("1", 1, 4, Strand::Positive).unwrap(),
            "ACGT".to_string()
        );
        assert_eq!(
            source.get_subsequence("1", 1, 4, Strand::Negative).unwrap(),
            "ACGT".to_string()
        );
        // bases 2..=5 are CGTA, reverse complement is TACG
        assert_eq!(
            source.get_subsequence("1", 2, 5, Strand::Negative).unwrap(),
            "TACG".to_string()
        );
    }

    #[test]
    fn test_sequence_bounds_are_clipped() {
        let source = source();
        assert_eq!(
            source.get_subsequence("1", -5, 3, Strand::Positive).unwrap(),
            "ACG".to_string()
        );
        assert_eq!(
            source.get_subsequence("1", 8, 100, Strand::Positive).unwrap(),
            "TAC".to_string()
        );
        assert_eq!(
            source.get_subsequence("1", 11, 20, Strand::Positive).unwrap(),
            String::new()
        );
        assert!(source
            .get_subsequence("notachrom", 1, 5, Strand::Positive)
            .is_err());
    }

    #[test]
    fn test_sequence_padding_source_pads_past_end() {
        let mut seqs = FxHashMap::default();
        seqs.insert("1".to_string(), "ACGTACGTAC".to_string());
        let source = MemorySequenceSource::new_padding(seqs);
        assert_eq!(
            source.get_subsequence("1", 8, 13, Strand::Positive).unwrap(),
            "TACNNN".to_string()
        );
        assert_eq!(
            source.get_subsequence("1", 11, 13, Strand::Positive).unwrap(),
            "NNN".to_string()
        );
    }

    #[test]
    fn test_sequence_downstream_window_respects_strand() {
        let source = source();
        // downstream of pos 4 on + is bases 5..: ACGTAC
        assert_eq!(
            source
                .get_downstream_subsequence("1", 4, Strand::Positive, 3)
                .unwrap(),
            "ACG".to_string()
        );
        // downstream of pos 4 on - is bases ..3, reverse complemented
        assert_eq!(
            source
                .get_downstream_subsequence("1", 4, Strand::Negative, 3)
                .unwrap(),
            "CGT".to_string()
        );
        // upstream mirrors downstream
        assert_eq!(
            source
                .get_upstream_subsequence("1", 4, Strand::Positive, 3)
                .unwrap(),
            "ACG".to_string()
        );
    }
}
