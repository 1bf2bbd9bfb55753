use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use derive_new::new;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rust_htslib::bam::{self, record::Aux, HeaderView};
use serde::{Deserialize, Serialize};

use crate::errs::{EcError, EcResult};

pub(crate) const MISSING_SYMBOL: &'static str = ".";

pub(crate) fn create_out_directory<T: AsRef<std::ffi::OsStr>>(
    raw_path: T,
) -> anyhow::Result<()> {
    if let Some(p) = Path::new(&raw_path).parent() {
        if !p.exists() && p != Path::new("") {
            info!("creating directory at {p:?}");
            std::fs::create_dir_all(p)?;
        }
    }
    Ok(())
}

fn get_master_progress_bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.green/yellow} {pos:>7}/{len:7} {msg}",
    )
    .unwrap()
    .progress_chars("##-")
}

pub(crate) fn get_master_progress_bar(n: usize) -> ProgressBar {
    ProgressBar::new(n as u64).with_style(get_master_progress_bar_style())
}

/// Cooperative cancellation flag. Record traversals check it between
/// alignment records, so a cancelled job stops after the record it is
/// on and its partial output is never persisted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> EcResult<()> {
        if self.is_cancelled() {
            Err(EcError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Alignment strand, serialized as +1/-1 in artifacts and the output
/// table.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    Default,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(into = "i32", try_from = "i32")]
pub enum Strand {
    #[default]
    Positive,
    Negative,
}

impl Strand {
    pub fn parse_char(x: char) -> EcResult<Self> {
        match x {
            '+' => Ok(Self::Positive),
            '-' => Ok(Self::Negative),
            _ => Err(EcError::InvalidStrand),
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            Strand::Positive => '+',
            Strand::Negative => '-',
        }
    }

    pub fn to_int(&self) -> i32 {
        match self {
            Strand::Positive => 1,
            Strand::Negative => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Strand::Positive => Strand::Negative,
            Strand::Negative => Strand::Positive,
        }
    }

    pub fn from_record(record: &bam::Record) -> Self {
        if record.is_reverse() {
            Strand::Negative
        } else {
            Strand::Positive
        }
    }

    pub fn of_mate(record: &bam::Record) -> Self {
        if record.is_mate_reverse() {
            Strand::Negative
        } else {
            Strand::Positive
        }
    }
}

impl From<Strand> for i32 {
    fn from(value: Strand) -> Self {
        value.to_int()
    }
}

impl TryFrom<i32> for Strand {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Positive),
            -1 => Ok(Self::Negative),
            _ => Err(format!("illegal strand {value}")),
        }
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// A reference sequence as described by a BAM header, `tid` is its
/// ordinal position within the assembly.
#[derive(new, Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub tid: u32,
    pub name: String,
    pub length: u64,
}

pub(crate) fn get_targets(header: &HeaderView) -> Vec<ReferenceRecord> {
    (0..header.target_count())
        .filter_map(|tid| {
            let chrom_name = String::from_utf8(header.tid2name(tid).to_vec())
                .unwrap_or("???".to_owned());
            match header.target_len(tid) {
                Some(size) => Some(ReferenceRecord::new(tid, chrom_name, size)),
                None => {
                    debug!("no size information for {chrom_name} (tid: {tid})");
                    None
                }
            }
        })
        .collect::<Vec<ReferenceRecord>>()
}

pub(crate) fn get_query_name_string(record: &bam::Record) -> EcResult<String> {
    String::from_utf8(record.qname().to_vec())
        .map_err(|_e| EcError::InvalidRecordName)
}

pub(crate) fn parse_nm(record: &bam::Record) -> EcResult<u32> {
    let invalid_nm = || EcError::InvalidAuxTag {
        name: "NM",
        read_id: get_query_name_string(record)
            .unwrap_or("failed-to-parse-utf8".to_owned()),
    };
    let nm_tag = record.aux("NM".as_bytes()).map_err(|_| invalid_nm())?;
    match nm_tag {
        Aux::U8(x) => Ok(x as u32),
        Aux::U16(x) => Ok(x as u32),
        Aux::U32(x) => Ok(x),
        Aux::I8(x) => Ok(x as u32),
        Aux::I16(x) => Ok(x as u32),
        Aux::I32(x) => Ok(x as u32),
        _ => Err(invalid_nm()),
    }
}

pub(crate) fn get_human_readable_table() -> prettytable::Table {
    let mut tab = prettytable::Table::new();
    tab.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    tab
}
