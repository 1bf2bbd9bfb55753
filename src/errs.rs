use thiserror::Error;

pub type EcResult<T> = Result<T, EcError>;

/// Hard failures surfaced to the orchestrator. Filter rejects are
/// counters, not errors (see `filters::RejectCounts`).
#[derive(Error, Debug)]
pub enum EcError {
    #[error("invalid configuration, {0}")]
    ConfigInvalid(String),
    #[error("input unavailable, {0}")]
    IoUnavailable(String),
    #[error("structural mismatch in {branch}, {message}")]
    StructuralMismatch { branch: String, message: String },
    #[error("subprocess {command} exited with status {status}")]
    SubprocessFailure { command: String, status: i32 },
    #[error("unparseable segmentation output, {0}")]
    SubprocessOutputInvalid(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("reference sequence {0} missing")]
    ContigMissing(String),
    #[error("record name is not valid UTF-8")]
    InvalidRecordName,
    #[error("invalid {name} tag on record {read_id}")]
    InvalidAuxTag { name: &'static str, read_id: String },
    #[error("invalid barcode {0}, must be IUPAC [ACGTNRYKMSWBDHV]")]
    InvalidBarcode(String),
    #[error("invalid strand")]
    InvalidStrand,
    #[error("htslib error, {0}")]
    HtsLibError(#[from] rust_htslib::errors::Error),
    #[error("I/O error, {0}")]
    IoError(#[from] std::io::Error),
    #[error("serialization error, {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl EcError {
    pub(crate) fn structural<B: Into<String>, M: Into<String>>(
        branch: B,
        message: M,
    ) -> Self {
        Self::StructuralMismatch {
            branch: branch.into(),
            message: message.into(),
        }
    }
}
