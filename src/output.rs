use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::parser::ParsedRecord;

/// Leaves room for an extension under the usual 255-byte name limit.
const MAX_NAME_BYTES: usize = 200;

/// File stem for a url or source name: scheme dropped, path separators and
/// characters most filesystems reject turned into `_`.
pub fn safe_name(reference: &str) -> String {
    let bare = reference
        .strip_prefix("https://")
        .or_else(|| reference.strip_prefix("http://"))
        .unwrap_or(reference);
    let mut name = String::new();
    for c in bare.chars() {
        let c = match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        if name.len() + c.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        name.push(c);
    }
    if name.trim_matches('_').is_empty() {
        "record".to_string()
    } else {
        name
    }
}

/// Pretty JSON with 4-space indentation; non-ASCII written as-is.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Write one record as `<dir>/<name>.json`, named from its url, else from
/// `fallback` (source file name or fetched url).
pub fn write_record_json(dir: &Path, record: &ParsedRecord, fallback: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stem = safe_name(record.url.as_deref().unwrap_or(fallback));
    let path = dir.join(format!("{}.json", stem));
    fs::write(&path, to_pretty_json(record)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn write_combined(path: &Path, records: &[ParsedRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, to_pretty_json(records)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
