use chrono::{DateTime, Utc};
use nom::{IResult, Parser, combinator::map};

use crate::errors::{HprofError, Result};
use crate::parser::primitive_parsers::{IdSize, parse_c_string, parse_u32, parse_u64};

const MAGIC: &str = "JAVA PROFILE ";
const SUPPORTED_VERSIONS: [&str; 2] = ["1.0.2", "1.0.3"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Version string from the header, e.g. `1.0.3`.
    pub version: String,
    pub id_size: IdSize,
    /// Milliseconds since the Unix epoch.
    pub timestamp_millis: u64,
}

impl FileHeader {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp_millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }
}

fn raw_header(i: &[u8]) -> IResult<&[u8], (&[u8], u32, u64)> {
    map(
        (parse_c_string, parse_u32, parse_u64),
        |(label, size_pointers, timestamp)| (label, size_pointers, timestamp),
    )
    .parse(i)
}

/// Decodes and validates the file header.
///
/// Returns the header together with the absolute offset of the first record.
pub fn parse_file_header(data: &[u8]) -> Result<(FileHeader, usize)> {
    let (rest, (label, size_pointers, timestamp_millis)) = raw_header(data)
        .map_err(|_| HprofError::BadFormat("truncated or unterminated file header".to_string()))?;
    let label = std::str::from_utf8(label)
        .map_err(|_| HprofError::BadFormat("file header is not ASCII".to_string()))?;
    let version = label.strip_prefix(MAGIC).ok_or_else(|| {
        HprofError::BadFormat(format!("expected \"{MAGIC}\" magic, found {label:?}"))
    })?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(HprofError::BadFormat(format!(
            "unsupported hprof version {version:?}, expected one of {SUPPORTED_VERSIONS:?}"
        )));
    }
    let id_size = (3..=8)
        .contains(&size_pointers)
        .then(|| IdSize::new(size_pointers))
        .flatten()
        .ok_or_else(|| HprofError::BadFormat(format!("invalid identifier size {size_pointers}")))?;
    let first_record = data.len() - rest.len();
    Ok((
        FileHeader {
            version: version.to_string(),
            id_size,
            timestamp_millis,
        },
        first_record,
    ))
}
