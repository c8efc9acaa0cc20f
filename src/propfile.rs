//! Parser for the `key=value` properties-file format used both for the
//! startup configuration file and for each deposit's `deposit.properties`
//! record (`spec.md` §6). One key per line, UTF-8, blank lines and `#`
//! comments ignored.

use nom::{
    bytes::complete::{is_not, take_while},
    character::complete::char,
    combinator::{map, opt},
    sequence::{pair, terminated},
    IResult,
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed properties line {line_no}: {line:?}")]
pub(crate) struct PropertiesParseError {
    line_no: usize,
    line: String,
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'
}

fn key(input: &str) -> IResult<&str, &str> {
    take_while(is_key_char)(input)
}

fn entry(input: &str) -> IResult<&str, (&str, &str)> {
    pair(terminated(key, char('=')), is_not("\n\r"))(input)
}

/// Parse the full contents of a properties file into an ordered list of
/// `(key, value)` pairs. Later duplicate keys override earlier ones when
/// the caller folds the result into a map, matching plain `key=value`
/// semantics.
pub(crate) fn parse(contents: &str) -> Result<Vec<(String, String)>, PropertiesParseError> {
    let mut out = Vec::new();

    for (line_no, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match map(opt(entry), |parsed| parsed)(line) {
            Ok((rest, Some((k, v)))) if rest.is_empty() && !k.is_empty() => {
                out.push((k.to_owned(), v.trim().to_owned()));
            }
            _ => {
                return Err(PropertiesParseError {
                    line_no: line_no + 1,
                    line: raw_line.to_owned(),
                })
            }
        }
    }

    Ok(out)
}

/// Serialize `(key, value)` pairs back into `key=value\n` lines, in order.
pub(crate) fn serialize<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (k, v) in entries {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}
