use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use similar_asserts::assert_eq;

use endcount::config::{Config, Sample};
use endcount::hmm::TableSegmenter;
use endcount::pipeline::Pipeline;
use endcount::regions::ThreePrimeEnd;
use endcount::sequence::MemorySequenceSource;
use endcount::util::Strand;
use rust_htslib::bam::{self, header::HeaderRecord};

const READ2_FWD: u16 = 163; // paired, proper, read-2, mate reverse
const READ1_REV: u16 = 83; // paired, proper, read-1, reverse

fn test_header() -> bam::Header {
    let mut header = bam::Header::new();
    for name in ["1", "2"] {
        let mut sq = HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", &name);
        sq.push_tag(b"LN", &10_000);
        header.push_record(&sq);
    }
    header
}

fn write_indexed_bam(dir: &Path, name: &str, sam_lines: &[String]) -> PathBuf {
    let header = test_header();
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

/// A read pair: the read-2 sits on the forward strand inside the
/// region, its mate (read-1) is reverse and supplies the 3'-end
/// position.
fn pair(qname: &str, read2_pos: i64, mate_pos: i64) -> Vec<String> {
    let seq = "A".repeat(10);
    vec![
        format!(
            "{qname}\t{READ2_FWD}\t1\t{read2_pos}\t255\t10M\t=\t{mate_pos}\t\
             0\t{seq}\t*\tNM:i:0\tMC:Z:10M"
        ),
        format!(
            "{qname}\t{READ1_REV}\t1\t{mate_pos}\t255\t10M\t=\t{read2_pos}\t\
             0\t{seq}\t*\tNM:i:0\tMC:Z:10M"
        ),
    ]
}

fn test_config(input_1: &Path, input_2: &Path) -> Config {
    Config {
        name: "integration".to_string(),
        chunk_total: 1,
        ref_fasta: None,
        mismatch_threshold: 0,
        bin_size: 100,
        peak_buffer_width: 100,
        hmm_sig_level: 0.001,
        read2_length: 10,
        hmm_binary: PathBuf::from("unused-by-stub"),
        ensembl_host: None,
        ensembl_port: None,
        ensembl_user: None,
        ensembl_pass: None,
        ensembl_dbname: None,
        test_chunk: None,
        skip_sequences: HashSet::new(),
        samples: vec![
            Sample {
                name: "wt_1".to_string(),
                bam_file: input_1.to_path_buf(),
                tag: "CCTT".to_string(),
                condition: "wt".to_string(),
                groups: vec!["1".to_string()],
            },
            Sample {
                name: "mut_1".to_string(),
                bam_file: input_2.to_path_buf(),
                tag: "GGTT".to_string(),
                condition: "mut".to_string(),
                groups: vec!["2".to_string()],
            },
        ],
    }
}

#[test]
fn test_pipeline_end_to_end_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let mut input_1_lines = Vec::new();
    for (i, read2_pos) in [201i64, 221, 241].iter().enumerate() {
        input_1_lines.extend(pair(&format!("wt_{i}#CCTT"), *read2_pos, 301));
    }
    let mut input_2_lines = Vec::new();
    for (i, read2_pos) in [205i64, 215].iter().enumerate() {
        input_2_lines.extend(pair(&format!("mut_{i}#GGTT"), *read2_pos, 301));
    }
    let input_1 = write_indexed_bam(dir.path(), "wt.bam", &input_1_lines);
    let input_2 = write_indexed_bam(dir.path(), "mut.bam", &input_2_lines);
    let config = test_config(&input_1, &input_2);
    config.validate().unwrap();
    config.validate_inputs().unwrap();

    // all five read-2s land in bin 2, the stub calls it transcribed
    let segmenter = TableSegmenter::new(
        [(2u64, (1u8, -5.0f64))].into_iter().collect(),
    );
    // downstream of the 3' end is T-rich, nothing is polyA-rejected
    let mut seqs = FxHashMap::default();
    seqs.insert("1".to_string(), "T".repeat(10_000));
    seqs.insert("2".to_string(), "T".repeat(10_000));
    let source = MemorySequenceSource::new(seqs);

    let work_dir = dir.path().join("work");
    let pipeline = Pipeline::new(
        &config,
        work_dir.clone(),
        &segmenter,
        &source,
        true,
    )
    .unwrap();
    pipeline.run().unwrap();

    let regions = pipeline.collect_regions().unwrap();
    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert_eq!(region.ref_name, "1".to_string());
    assert_eq!(region.start, 201);
    // the chosen end pulled the forward bound to the mate end
    assert_eq!(region.end, 310);
    assert_eq!(region.max_read_count, 5);
    assert_eq!(region.log_prob_sum, -5.0);
    assert_eq!(region.strand, Strand::Positive);
    assert_eq!(
        region.chosen,
        Some(ThreePrimeEnd::Present {
            ref_name: "1".to_string(),
            pos: 310,
            strand: Strand::Positive,
            read_count: 5,
        })
    );
    assert_eq!(region.sample_counts, vec![3, 2]);

    // a second run over the same working directory is a no-op and
    // reproduces the table
    pipeline.run().unwrap();
    let resumed = pipeline.collect_regions().unwrap();
    assert_eq!(resumed, regions);
}

#[test]
fn test_pipeline_low_support_region_has_no_chosen_end() {
    let dir = tempfile::tempdir().unwrap();
    // two pairs only: the fused 3'-end count of 2 is under the floor
    let mut input_1_lines = Vec::new();
    for (i, read2_pos) in [201i64, 221].iter().enumerate() {
        input_1_lines.extend(pair(&format!("wt_{i}#CCTT"), *read2_pos, 301));
    }
    let input_1 = write_indexed_bam(dir.path(), "wt.bam", &input_1_lines);
    // both samples read the same input, distinguished by barcode
    let config = test_config(&input_1, &input_1);

    let segmenter = TableSegmenter::new(
        [(2u64, (1u8, -2.0f64))].into_iter().collect(),
    );
    let mut seqs = FxHashMap::default();
    seqs.insert("1".to_string(), "T".repeat(10_000));
    seqs.insert("2".to_string(), "T".repeat(10_000));
    let source = MemorySequenceSource::new(seqs);

    let pipeline = Pipeline::new(
        &config,
        dir.path().join("work"),
        &segmenter,
        &source,
        true,
    )
    .unwrap();
    pipeline.run().unwrap();
    let regions = pipeline.collect_regions().unwrap();
    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert_eq!(
        region.chosen,
        Some(ThreePrimeEnd::Absent { strand: Strand::Positive })
    );
    // the region keeps its segmentation bounds when nothing survives
    assert_eq!(region.start, 201);
    assert_eq!(region.end, 300);
    assert_eq!(region.sample_counts, vec![2, 0]);
}
