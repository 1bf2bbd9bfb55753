use std::path::{Path, PathBuf};

use rust_htslib::bam::{self, header::HeaderRecord};

pub(crate) fn test_bam_header() -> bam::Header {
    let mut header = bam::Header::new();
    for name in ["1", "2"] {
        let mut sq = HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", &name);
        sq.push_tag(b"LN", &10_000);
        header.push_record(&sq);
    }
    header
}

/// Write coordinate-sorted records to a BAM with a sibling .bai index.
pub(crate) fn write_indexed_bam(
    dir: &Path,
    name: &str,
    sam_lines: &[String],
) -> PathBuf {
    let header = test_bam_header();
    let header_view = bam::HeaderView::from_header(&header);
    let mut records = sam_lines
        .iter()
        .map(|sam| {
            bam::Record::from_sam(&header_view, sam.as_bytes())
                .expect("test SAM line should parse")
        })
        .collect::<Vec<bam::Record>>();
    records.sort_by_key(|rec| (rec.tid(), rec.pos()));

    let path = dir.join(name);
    {
        let mut writer =
            bam::Writer::from_path(&path, &header, bam::Format::Bam).unwrap();
        for record in &records {
            writer.write(record).unwrap();
        }
    }
    bam::index::build(&path, None, bam::index::Type::Bai, 1).unwrap();
    path
}

pub(crate) fn open_indexed(path: &Path) -> bam::IndexedReader {
    bam::IndexedReader::from_path(path).unwrap()
}

/// One aligned read-2 with its mate-derived fields, the shape the
/// extractor and counter consume.
pub(crate) fn read2_sam(
    qname: &str,
    flag: u16,
    ref_name: &str,
    pos_1based: i64,
    cigar: &str,
    mate_pos_1based: i64,
    nm: u32,
    mate_cigar: &str,
) -> String {
    let seq = "A".repeat(10);
    let qual = "*";
    format!(
        "{qname}\t{flag}\t{ref_name}\t{pos_1based}\t255\t{cigar}\t=\t\
         {mate_pos_1based}\t0\t{seq}\t{qual}\tNM:i:{nm}\tMC:Z:{mate_cigar}"
    )
}
