//! Minimal CSV writer: RFC 4180 quoting, CRLF row terminators.

use std::path::Path;

use kbase_core::KbError;

/// Quote a field when it contains a delimiter, quote or line break.
pub(crate) fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub(crate) fn to_csv<R, F>(rows: R) -> String
where
    R: IntoIterator<Item = Vec<F>>,
    F: AsRef<str>,
{
    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = row.iter().map(|f| escape_field(f.as_ref())).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

pub(crate) fn write_csv<R, F>(path: &Path, rows: R) -> Result<(), KbError>
where
    R: IntoIterator<Item = Vec<F>>,
    F: AsRef<str>,
{
    std::fs::write(path, to_csv(rows))?;
    Ok(())
}
