//! Flat-file line codecs for the manifest and path index.
//!
//! ```text
//! manifest:   relativePath|hashHex|sizeDecimal|modifiedEpochSeconds
//! path index: relativePath|hashHex
//! ```
//!
//! Parsing happens here, at the deserialization boundary: a line that does
//! not decode into a typed record is dropped, never passed on as an error.
//! Trailing fields are split off from the right, so a `|` inside a path
//! survives a save/load cycle.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use hoard_types::{ContentHash, FileRecord};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{IndexError, IndexResult};

/// Separator between fields on a record line.
pub const FIELD_SEPARATOR: char = '|';

/// Decode one manifest line. Returns `None` for blank or malformed lines.
pub fn parse_manifest_line(line: &str) -> Option<(String, FileRecord)> {
    let line = trim_line_ending(line);
    let mut fields = line.rsplitn(4, FIELD_SEPARATOR);
    let modified = fields.next()?.parse::<i64>().ok()?;
    let size = fields.next()?.parse::<u64>().ok()?;
    let hash = ContentHash::from_hex(fields.next()?).ok()?;
    let path = fields.next().filter(|p| !p.is_empty())?;
    Some((path.to_string(), FileRecord::new(hash, size, modified)))
}

/// Encode one manifest line (without the trailing newline).
pub fn format_manifest_line(path: &str, record: &FileRecord) -> String {
    format!(
        "{path}{sep}{}{sep}{}{sep}{}",
        record.hash,
        record.size,
        record.modified,
        sep = FIELD_SEPARATOR
    )
}

/// Decode one path index line. Returns `None` for blank or malformed lines.
pub fn parse_index_line(line: &str) -> Option<(String, ContentHash)> {
    let line = trim_line_ending(line);
    let (path, hash) = line.rsplit_once(FIELD_SEPARATOR)?;
    if path.is_empty() {
        return None;
    }
    let hash = ContentHash::from_hex(hash).ok()?;
    Some((path.to_string(), hash))
}

/// Encode one path index line (without the trailing newline).
pub fn format_index_line(path: &str, hash: &ContentHash) -> String {
    format!("{path}{FIELD_SEPARATOR}{hash}")
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Decode every valid line of `reader`, skipping the rest.
///
/// Lines that are not valid UTF-8 count as malformed.
pub(crate) fn read_records<R, T>(
    mut reader: R,
    parse: fn(&str) -> Option<T>,
) -> io::Result<Vec<T>>
where
    R: BufRead,
{
    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let parsed = std::str::from_utf8(&buf).ok().and_then(parse);
        match parsed {
            Some(record) => records.push(record),
            None if buf.iter().all(|b| b.is_ascii_whitespace()) => {}
            None => debug!(line = line_no, "skipping malformed record line"),
        }
    }
    Ok(records)
}

/// Load and decode a record file. `Ok(None)` means the file does not exist.
pub(crate) fn load_file<T>(path: &Path, parse: fn(&str) -> Option<T>) -> IndexResult<Option<Vec<T>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IndexError::io(path, e)),
    };
    let records = read_records(BufReader::new(file), parse).map_err(|e| IndexError::io(path, e))?;
    Ok(Some(records))
}

/// Replace the file at `path` with `lines`, one per line.
///
/// The new content is written to a temporary file beside the target and
/// renamed over it, so readers see either the old file or the new one.
pub(crate) fn save_file<I>(path: &Path, lines: I) -> IndexResult<()>
where
    I: IntoIterator<Item = String>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir).map_err(|e| IndexError::io(path, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for line in lines {
            writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .map_err(|e| IndexError::io(path, e))?;
        }
        writer.flush().map_err(|e| IndexError::io(path, e))?;
    }
    tmp.as_file().sync_all().map_err(|e| IndexError::io(path, e))?;
    tmp.persist(path).map_err(|e| IndexError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
