use thiserror::Error;

pub type Result<T> = std::result::Result<T, HprofError>;

/// Everything that can go wrong while reading an hprof file.
///
/// Framing and index errors (`BadFormat`, `OutOfBounds`) are fatal for the
/// scan that produced them; lookup and narrowing errors are recoverable.
#[derive(Debug, Error)]
pub enum HprofError {
    /// The bytes violate an hprof format invariant.
    #[error("bad hprof data: {0}")]
    BadFormat(String),

    /// A read reached past the end of the source.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// An id was looked up but no record carries it.
    #[error("no {kind} record for id {id:#x}")]
    RefError { kind: &'static str, id: u64 },

    /// A class id or name has no matching class load record.
    #[error("no class load record for {0}")]
    ClassNotFound(String),

    /// Narrowing to a non-supertype, or array access on a non-array.
    #[error("type error: {0}")]
    TypeError(String),

    /// Field lookup walked the whole class chain without a match.
    #[error("type {class} has no field {field:?}")]
    NoSuchField { class: String, field: String },

    /// The byte source was closed while handles to it were still in use.
    #[error("byte source is closed")]
    ClosedSource,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
