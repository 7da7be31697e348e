//! Newline-delimited JSON record codec.
//!
//! [`LineDecoder`] is an incremental splitter: bytes go in chunk by chunk,
//! complete records come out. Peak memory is one buffered line, so readers
//! never hold the full dataset. The async helpers wrap it over tokio I/O;
//! the writer awaits every line write, which is where downstream
//! backpressure is observed.

use deltasync_types::{FieldSet, Result, SyncError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read chunk size for the async reader.
const READ_BUF_SIZE: usize = 8 * 1024;

/// How much of a malformed line to quote in the parse error.
const ERROR_PREFIX_LEN: usize = 60;

/// Incremental NDJSON record decoder.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    line_no: u64,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, appending every record completed by it to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Parse`] naming the offending line's prefix when
    /// a non-empty line is not a valid record. The whole read is considered
    /// failed at that point.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<FieldSet>) -> Result<()> {
        for &byte in chunk {
            if byte == b'\n' {
                if let Some(record) = self.take_line()? {
                    out.push(record);
                }
            } else {
                self.buf.push(byte);
            }
        }
        Ok(())
    }

    /// Flush the trailing unterminated line, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Parse`] if the trailing line is malformed.
    pub fn finish(&mut self) -> Result<Option<FieldSet>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        self.take_line()
    }

    fn take_line(&mut self) -> Result<Option<FieldSet>> {
        self.line_no += 1;
        let line = std::mem::take(&mut self.buf);
        let trimmed = trim_ascii(&line);
        if trimmed.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice::<FieldSet>(trimmed) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                let prefix: String = String::from_utf8_lossy(trimmed)
                    .chars()
                    .take(ERROR_PREFIX_LEN)
                    .collect();
                Err(SyncError::parse(format!(
                    "line {}: invalid record near '{prefix}': {e}",
                    self.line_no
                )))
            }
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Read all records from an NDJSON byte stream.
///
/// # Errors
///
/// Returns [`SyncError::Io`] on read failure or [`SyncError::Parse`] on a
/// malformed line.
pub async fn read_records<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<FieldSet>> {
    let mut decoder = LineDecoder::new();
    let mut records = Vec::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        decoder.push(&buf[..n], &mut records)?;
    }
    if let Some(last) = decoder.finish()? {
        records.push(last);
    }
    Ok(records)
}

/// Encode one record as a newline-terminated JSON line.
///
/// # Errors
///
/// Returns [`SyncError::Parse`] when the record cannot be serialized.
pub fn encode_line(record: &FieldSet) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)
        .map_err(|e| SyncError::parse(format!("record not serializable: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Write records one per line, awaiting each write so downstream
/// backpressure throttles the producer. Returns the record count.
///
/// # Errors
///
/// Returns [`SyncError::Io`] on write failure.
pub async fn write_records<W: AsyncWrite + Unpin>(
    writer: &mut W,
    records: &[FieldSet],
) -> Result<u64> {
    let mut written = 0u64;
    for record in records {
        let line = encode_line(record)?;
        writer.write_all(&line).await?;
        written += 1;
    }
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_types::Field;
    use serde_json::json;

    fn rec(id: i64, hash: &str) -> FieldSet {
        let mut r = FieldSet::new(vec![Field::new("id", id)]);
        r.hash = Some(hash.to_string());
        r
    }

    #[tokio::test]
    async fn roundtrip() {
        let records = vec![rec(1, "h1"), rec(2, "h2")];
        let mut buf = Vec::new();
        let written = write_records(&mut buf, &records).await.unwrap();
        assert_eq!(written, 2);

        let back = read_records(buf.as_slice()).await.unwrap();
        assert_eq!(back, records);
    }

    #[tokio::test]
    async fn empty_lines_skipped() {
        let input = b"\n{\"fieldValues\":[{\"id\":1}]}\n\n  \n{\"fieldValues\":[{\"id\":2}]}\n";
        let records = read_records(&input[..]).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn missing_trailing_newline_still_parses() {
        let input = b"{\"fieldValues\":[{\"id\":1}]}";
        let records = read_records(&input[..]).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn malformed_line_fails_naming_prefix() {
        let input = b"{\"fieldValues\":[{\"id\":1}]}\n{not json at all\n";
        let err = read_records(&input[..]).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 2"), "got: {msg}");
        assert!(msg.contains("{not json"), "got: {msg}");
    }

    #[test]
    fn decoder_handles_chunk_boundaries() {
        let line = b"{\"fieldValues\":[{\"id\":1}],\"hash\":\"abc\"}\n";
        let mut decoder = LineDecoder::new();
        let mut out = Vec::new();
        let (head, tail) = line.split_at(17);
        decoder.push(head, &mut out).unwrap();
        assert!(out.is_empty());
        decoder.push(tail, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hash.as_deref(), Some("abc"));
    }

    #[test]
    fn decoder_finish_on_clean_state_is_none() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.finish().unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_survive_roundtrip() {
        let mut r = FieldSet::new(vec![Field::new("email", json!("not-an-email"))]);
        r.add_message("email", "value is not a valid email address");
        let mut buf = Vec::new();
        write_records(&mut buf, std::slice::from_ref(&r)).await.unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("validationMessages"));
        let back = read_records(buf.as_slice()).await.unwrap();
        assert_eq!(back[0], r);
    }
}
