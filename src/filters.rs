use prettytable::row;
use rust_htslib::bam::{self, record::Cigar};

use crate::errs::EcResult;
use crate::util::{get_human_readable_table, parse_nm};

#[inline]
pub fn is_read2(record: &bam::Record) -> bool {
    record.is_last_in_template()
}

#[inline]
pub fn is_paired(record: &bam::Record) -> bool {
    record.is_paired()
}

#[inline]
pub fn is_properly_paired(record: &bam::Record) -> bool {
    record.is_proper_pair()
}

#[inline]
pub fn is_duplicate(record: &bam::Record) -> bool {
    record.is_duplicate()
}

#[inline]
pub fn is_mapped(record: &bam::Record) -> bool {
    !record.is_unmapped()
}

#[inline]
pub fn mate_is_mapped(record: &bam::Record) -> bool {
    !record.is_mate_unmapped()
}

#[inline]
pub fn mate_on_same_reference(record: &bam::Record) -> bool {
    record.mtid() >= 0 && record.mtid() == record.tid()
}

pub fn soft_clipped_bases(record: &bam::Record) -> u32 {
    record
        .cigar()
        .iter()
        .map(|op| match op {
            Cigar::SoftClip(len) => *len,
            _ => 0u32,
        })
        .sum::<u32>()
}

/// Edit distance plus soft-clipped bases.
pub fn mismatch_score(record: &bam::Record) -> EcResult<u32> {
    let nm = parse_nm(record)?;
    Ok(nm + soft_clipped_bases(record))
}

pub fn above_mismatch_threshold(
    record: &bam::Record,
    threshold: u32,
) -> EcResult<bool> {
    mismatch_score(record).map(|score| score > threshold)
}

/// Per-predicate reject tallies for one traversal. Rejects are
/// diagnostics, not errors.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct RejectCounts {
    pub not_read2: usize,
    pub duplicate: usize,
    pub unmapped: usize,
    pub mate_unmapped: usize,
    pub wrong_strand: usize,
    pub above_mismatch: usize,
    pub tag_unmatched: usize,
    pub missing_mate_cigar: usize,
}

impl RejectCounts {
    pub fn total(&self) -> usize {
        self.not_read2
            + self.duplicate
            + self.unmapped
            + self.mate_unmapped
            + self.wrong_strand
            + self.above_mismatch
            + self.tag_unmatched
            + self.missing_mate_cigar
    }

    pub fn op_mut(&mut self, other: &Self) {
        self.not_read2 += other.not_read2;
        self.duplicate += other.duplicate;
        self.unmapped += other.unmapped;
        self.mate_unmapped += other.mate_unmapped;
        self.wrong_strand += other.wrong_strand;
        self.above_mismatch += other.above_mismatch;
        self.tag_unmatched += other.tag_unmatched;
        self.missing_mate_cigar += other.missing_mate_cigar;
    }

    pub fn to_table(&self) -> prettytable::Table {
        let mut tab = get_human_readable_table();
        tab.set_titles(row!["filter", "rejected"]);
        tab.add_row(row!["not read-2", self.not_read2]);
        tab.add_row(row!["duplicate", self.duplicate]);
        tab.add_row(row!["unmapped", self.unmapped]);
        tab.add_row(row!["mate unmapped/other reference", self.mate_unmapped]);
        tab.add_row(row!["wrong strand", self.wrong_strand]);
        tab.add_row(row!["above mismatch threshold", self.above_mismatch]);
        tab.add_row(row!["no barcode match", self.tag_unmatched]);
        tab.add_row(row!["missing mate CIGAR", self.missing_mate_cigar]);
        tab
    }
}

#[cfg(test)]
pub(crate) mod filters_tests {
    use rust_htslib::bam::{self, header::HeaderRecord};
    use similar_asserts::assert_eq;

    use super::{
        mate_on_same_reference, mismatch_score, soft_clipped_bases,
        RejectCounts,
    };

    pub(crate) fn test_header() -> bam::HeaderView {
        let mut header = bam::Header::new();
        let mut chr1 = HeaderRecord::new(b"SQ");
        chr1.push_tag(b"SN", &"1");
        chr1.push_tag(b"LN", &10_000);
        header.push_record(&chr1);
        let mut chr2 = HeaderRecord::new(b"SQ");
        chr2.push_tag(b"SN", &"2");
        chr2.push_tag(b"LN", &10_000);
        header.push_record(&chr2);
        bam::HeaderView::from_header(&header)
    }

    pub(crate) fn record_from_sam(
        header: &bam::HeaderView,
        sam: &str,
    ) -> bam::Record {
        bam::Record::from_sam(header, sam.as_bytes()).unwrap()
    }

    #[test]
    fn test_filters_mismatch_score_adds_soft_clips() {
        let header = test_header();
        let sam = "r1#AACC\t163\t1\t100\t255\t4S6M\t=\t200\t150\t\
                   AACCGGTTAC\t**********\tNM:i:2";
        let record = record_from_sam(&header, sam);
        assert_eq!(soft_clipped_bases(&record), 4);
        assert_eq!(mismatch_score(&record).unwrap(), 6);
        let sam = "r2#AACC\t163\t1\t100\t255\t10M\t=\t200\t150\t\
                   AACCGGTTAC\t**********\tNM:i:0";
        let record = record_from_sam(&header, sam);
        assert_eq!(mismatch_score(&record).unwrap(), 0);
    }

    #[test]
    fn test_filters_missing_nm_is_an_error() {
        let header = test_header();
        let sam = "r1#AACC\t163\t1\t100\t255\t10M\t=\t200\t150\t\
                   AACCGGTTAC\t**********";
        let record = record_from_sam(&header, sam);
        assert!(mismatch_score(&record).is_err());
    }

    #[test]
    fn test_filters_mate_reference_check() {
        let header = test_header();
        let same = "r1#AACC\t163\t1\t100\t255\t10M\t=\t200\t150\t\
                    AACCGGTTAC\t**********\tNM:i:0";
        let record = record_from_sam(&header, same);
        assert!(mate_on_same_reference(&record));
        let other = "r1#AACC\t163\t1\t100\t255\t10M\t2\t200\t0\t\
                     AACCGGTTAC\t**********\tNM:i:0";
        let record = record_from_sam(&header, other);
        assert!(!mate_on_same_reference(&record));
    }

    #[test]
    fn test_filters_reject_counts_combine() {
        let mut a = RejectCounts::default();
        a.duplicate = 2;
        a.tag_unmatched = 1;
        let mut b = RejectCounts::default();
        b.duplicate = 1;
        b.wrong_strand = 4;
        a.op_mut(&b);
        assert_eq!(a.duplicate, 3);
        assert_eq!(a.wrong_strand, 4);
        assert_eq!(a.total(), 8);
    }
}
