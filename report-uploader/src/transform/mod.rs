//! CSV post-processing: tag every row with the platform it came from

use bytes::Bytes;
use csv::{ByteRecord, ReaderBuilder, Terminator, WriterBuilder};
use tracing::debug;

use crate::source::{ContentKind, Payload};
use crate::types::{PipelineError, PipelineResult};

/// Header of the appended column
pub const SOURCE_COLUMN: &str = "source";

/// Normalizes a source tag, falling back to `default_label` when unset or blank
#[must_use]
pub fn source_tag(tag: Option<&str>, default_label: &str) -> String {
    tag.map(str::trim)
        .filter(|tag| !tag.is_empty())
        .unwrap_or(default_label)
        .trim()
        .to_lowercase()
}

/// Appends a `source` column holding `tag` (lower-cased) to every row
///
/// Existing columns, cells and row order are kept. Records are written with
/// `\n` terminators and quoted only where needed.
///
/// # Errors
///
/// Returns `PipelineError::Parse` if the input has no header row or rows of
/// differing lengths
pub fn append_source_column(input: &[u8], tag: &str) -> PipelineResult<Bytes> {
    let tag = tag.to_lowercase();

    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);
    let mut headers = reader.byte_headers()?.clone();
    if headers.is_empty() {
        return Err(PipelineError::Parse(
            "CSV payload has no header row".to_string(),
        ));
    }
    headers.push_field(SOURCE_COLUMN.as_bytes());

    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(input.len() + input.len() / 8));
    writer.write_byte_record(&headers)?;

    let mut record = ByteRecord::new();
    let mut rows = 0_usize;
    while reader.read_byte_record(&mut record)? {
        record.push_field(tag.as_bytes());
        writer.write_byte_record(&record)?;
        rows += 1;
    }

    let output = writer
        .into_inner()
        .map_err(|e| PipelineError::Parse(format!("cannot finish CSV output: {e}")))?;

    debug!("Tagged {} CSV rows with source='{}'", rows, tag);
    Ok(Bytes::from(output))
}

/// Applies the CSV transform to CSV payloads; JSON passes through untouched
///
/// # Errors
///
/// Returns `PipelineError::Parse` if a CSV payload is malformed
pub fn apply(payload: Payload, tag: &str) -> PipelineResult<Payload> {
    match payload.kind {
        ContentKind::Json => Ok(payload),
        ContentKind::Csv => Ok(Payload {
            bytes: append_source_column(&payload.bytes, tag)?,
            ..payload
        }),
    }
}
