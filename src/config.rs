use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::info;
use rust_htslib::bam::{self, Read};
use serde::Deserialize;

use crate::errs::{EcError, EcResult};
use crate::sequence::reference_lengths;
use crate::tags::TagMatcher;
use crate::util::get_query_name_string;

pub const MAX_NAME_LENGTH: usize = 128;
/// Records inspected per input when checking that every configured
/// barcode is actually present in the read population.
const TAG_SCAN_RECORDS: usize = 10_000;

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct Sample {
    pub name: String,
    pub bam_file: PathBuf,
    pub tag: String,
    pub condition: String,
    pub groups: Vec<String>,
}

/// One project configuration, deserialized from YAML and validated
/// before the pipeline starts.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub name: String,
    pub chunk_total: i64,
    #[serde(default)]
    pub ref_fasta: Option<PathBuf>,
    pub mismatch_threshold: i64,
    pub bin_size: u64,
    pub peak_buffer_width: u64,
    pub hmm_sig_level: f64,
    pub read2_length: u32,
    pub hmm_binary: PathBuf,
    #[serde(default)]
    pub ensembl_host: Option<String>,
    #[serde(default)]
    pub ensembl_port: Option<i64>,
    #[serde(default)]
    pub ensembl_user: Option<String>,
    #[serde(default)]
    pub ensembl_pass: Option<String>,
    #[serde(default)]
    pub ensembl_dbname: Option<String>,
    #[serde(default)]
    pub test_chunk: Option<usize>,
    #[serde(default)]
    pub skip_sequences: HashSet<String>,
    pub samples: Vec<Sample>,
}

impl Config {
    pub fn from_yaml_file(fp: &Path) -> EcResult<Self> {
        let fh = File::open(fp).map_err(|e| {
            EcError::IoUnavailable(format!("failed to open {fp:?}, {e}"))
        })?;
        let config: Config = serde_yaml::from_reader(fh).map_err(|e| {
            EcError::IoUnavailable(format!("unreadable YAML {fp:?}, {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn mismatch_threshold(&self) -> u32 {
        self.mismatch_threshold as u32
    }

    pub fn chunk_total(&self) -> usize {
        self.chunk_total as usize
    }

    /// Input BAMs in first-seen sample order.
    pub fn inputs(&self) -> Vec<&PathBuf> {
        let mut seen = IndexMap::new();
        for sample in &self.samples {
            seen.entry(&sample.bam_file).or_insert(());
        }
        seen.into_keys().collect()
    }

    pub fn tags_for_input(&self, input: &Path) -> Vec<&str> {
        self.samples
            .iter()
            .filter(|s| s.bam_file == input)
            .map(|s| s.tag.as_str())
            .collect()
    }

    pub fn sample_names(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.name.as_str()).collect()
    }

    /// Semantic validation, no file access beyond existence checks.
    pub fn validate(&self) -> EcResult<()> {
        if self.name.trim().is_empty() {
            return Err(EcError::ConfigInvalid(
                "name must not be empty or blank".to_string(),
            ));
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(EcError::ConfigInvalid(format!(
                "name must be at most {MAX_NAME_LENGTH} characters"
            )));
        }
        if self.chunk_total <= 0 {
            return Err(EcError::ConfigInvalid(format!(
                "chunk_total must be positive, got {}",
                self.chunk_total
            )));
        }
        if self.mismatch_threshold < 0 {
            return Err(EcError::ConfigInvalid(format!(
                "mismatch_threshold must be non-negative, got {}",
                self.mismatch_threshold
            )));
        }
        if self.bin_size == 0 {
            return Err(EcError::ConfigInvalid(
                "bin_size must be positive".to_string(),
            ));
        }
        if self.peak_buffer_width == 0 {
            return Err(EcError::ConfigInvalid(
                "peak_buffer_width must be positive".to_string(),
            ));
        }
        if let Some(port) = self.ensembl_port {
            if !(1..=65_535).contains(&port) {
                return Err(EcError::ConfigInvalid(format!(
                    "invalid ensembl_port {port}"
                )));
            }
        }
        if let Some(fasta) = self.ref_fasta.as_ref() {
            File::open(fasta).map_err(|e| {
                EcError::ConfigInvalid(format!(
                    "ref_fasta {fasta:?} is not readable, {e}"
                ))
            })?;
        }
        self.validate_samples()
    }

    fn validate_samples(&self) -> EcResult<()> {
        if self.samples.is_empty() {
            return Err(EcError::ConfigInvalid(
                "at least one sample is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        let mut input_tags = HashSet::new();
        let group_cardinality = self.samples[0].groups.len();
        // a group label names one grouping level, it cannot recur at
        // another level
        let mut label_levels: HashMap<&String, usize> = HashMap::new();
        for sample in &self.samples {
            if !names.insert(&sample.name) {
                return Err(EcError::ConfigInvalid(format!(
                    "duplicate sample name {}",
                    sample.name
                )));
            }
            if !input_tags.insert((&sample.bam_file, &sample.tag)) {
                return Err(EcError::ConfigInvalid(format!(
                    "duplicate tag {} for input {:?}",
                    sample.tag, sample.bam_file
                )));
            }
            if sample.groups.len() != group_cardinality {
                return Err(EcError::ConfigInvalid(format!(
                    "sample {} has {} groups, expected {group_cardinality}",
                    sample.name,
                    sample.groups.len()
                )));
            }
            for (level, label) in sample.groups.iter().enumerate() {
                match label_levels.get(label) {
                    Some(seen) if *seen != level => {
                        return Err(EcError::ConfigInvalid(format!(
                            "group label {label} appears at more than one \
                             grouping level"
                        )));
                    }
                    _ => {
                        label_levels.insert(label, level);
                    }
                }
            }
        }
        // barcode alphabet errors surface here rather than mid-run
        TagMatcher::new(
            &self
                .samples
                .iter()
                .map(|s| s.tag.as_str())
                .collect::<Vec<&str>>(),
        )?;
        Ok(())
    }

    /// Input-side validation: indices present, one reference universe,
    /// every barcode observed in its input's read names.
    pub fn validate_inputs(&self) -> EcResult<()> {
        let mut reference_universe = None;
        for input in self.inputs() {
            if !input.exists() {
                return Err(EcError::IoUnavailable(format!(
                    "input {input:?} is missing"
                )));
            }
            if !has_sibling_index(input) {
                return Err(EcError::IoUnavailable(format!(
                    "input {input:?} has no sibling index"
                )));
            }
            let lengths = reference_lengths(input)?;
            match reference_universe.as_ref() {
                None => reference_universe = Some(lengths),
                Some(expected) if *expected != lengths => {
                    return Err(EcError::ConfigInvalid(format!(
                        "input {input:?} references a different genome \
                         assembly than the other inputs"
                    )));
                }
                Some(_) => {}
            }
            self.validate_input_tags(input)?;
        }
        Ok(())
    }

    fn validate_input_tags(&self, input: &Path) -> EcResult<()> {
        let tags = self.tags_for_input(input);
        let matcher = TagMatcher::new(&tags)?;
        let mut unseen =
            tags.iter().map(|t| *t).collect::<HashSet<&str>>();
        let mut reader = bam::Reader::from_path(input)?;
        let mut record = bam::Record::new();
        let mut inspected = 0usize;
        while let Some(result) = reader.read(&mut record) {
            result?;
            if let Some(hit) =
                matcher.match_read_name(&get_query_name_string(&record)?)
            {
                unseen.remove(hit.tag);
            }
            inspected += 1;
            if unseen.is_empty() || inspected >= TAG_SCAN_RECORDS {
                break;
            }
        }
        if !unseen.is_empty() {
            return Err(EcError::ConfigInvalid(format!(
                "tags {unseen:?} were not observed in the first \
                 {inspected} records of {input:?}"
            )));
        }
        info!("observed all {} tags for {input:?}", tags.len());
        Ok(())
    }
}

fn has_sibling_index(bam_fp: &Path) -> bool {
    ["bai", "csi"].iter().any(|ext| {
        let mut index_fp = bam_fp.as_os_str().to_owned();
        index_fp.push(format!(".{ext}"));
        PathBuf::from(index_fp).exists()
    })
}

#[cfg(test)]
mod config_tests {
    use similar_asserts::assert_eq;

    use super::Config;

    fn base_yaml() -> String {
        r#"
name: zmp_ph1
chunk_total: 20
mismatch_threshold: 2
bin_size: 100
peak_buffer_width: 100
hmm_sig_level: 0.001
read2_length: 54
hmm_binary: /usr/local/bin/hmm_segment
samples:
  - name: wt_1
    bam_file: wt.bam
    tag: NNNNBGAGGC
    condition: sibling
    groups: ["1"]
  - name: mut_1
    bam_file: mut.bam
    tag: NNNNBAGAAG
    condition: mutant
    groups: ["2"]
"#
        .to_string()
    }

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_config_parses_and_validates() {
        let config = parse(&base_yaml());
        config.validate().unwrap();
        assert_eq!(config.name, "zmp_ph1".to_string());
        assert_eq!(config.chunk_total(), 20);
        assert_eq!(config.inputs().len(), 2);
        assert_eq!(
            config.tags_for_input(std::path::Path::new("wt.bam")),
            vec!["NNNNBGAGGC"]
        );
    }

    #[test]
    fn test_config_rejects_blank_name() {
        let mut config = parse(&base_yaml());
        config.name = "   ".to_string();
        assert!(config.validate().is_err());
        config.name = "x".repeat(200);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_nonpositive_chunk_total() {
        let mut config = parse(&base_yaml());
        config.chunk_total = 0;
        assert!(config.validate().is_err());
        config.chunk_total = -4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_duplicate_sample_identities() {
        let mut config = parse(&base_yaml());
        config.samples[1].name = "wt_1".to_string();
        assert!(config.validate().is_err());

        let mut config = parse(&base_yaml());
        config.samples[1].bam_file = config.samples[0].bam_file.clone();
        config.samples[1].tag = config.samples[0].tag.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_group_shape_violations() {
        let mut config = parse(&base_yaml());
        config.samples[1].groups = vec!["2".to_string(), "3".to_string()];
        assert!(config.validate().is_err());

        let mut config = parse(&base_yaml());
        config.samples[0].groups = vec!["1".to_string(), "a".to_string()];
        config.samples[1].groups = vec!["2".to_string(), "1".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_invalid_port_and_barcode() {
        let mut config = parse(&base_yaml());
        config.ensembl_port = Some(99_999);
        assert!(config.validate().is_err());

        let mut config = parse(&base_yaml());
        config.samples[0].tag = "NNNNXGAGGC".to_string();
        assert!(config.validate().is_err());
    }
}
