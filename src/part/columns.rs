//! Column list persisted as `columns.txt`
//!
//! ```text
//! columns format version: 1
//! 2 columns:
//! `id` UInt64
//! `payload` String
//! ```

use crate::error::{PartError, Result};

const HEADER: &str = "columns format version: 1";

/// Ordered `(name, type)` pairs of a part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnsDescription {
    columns: Vec<(String, String)>,
}

impl ColumnsDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, type_name: impl Into<String>) {
        self.columns.push((name.into(), type_name.into()));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{}\n{} columns:\n", HEADER, self.columns.len());
        for (name, type_name) in &self.columns {
            out.push('`');
            for c in name.chars() {
                match c {
                    '`' | '\\' => {
                        out.push('\\');
                        out.push(c);
                    }
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    _ => out.push(c),
                }
            }
            out.push_str("` ");
            out.push_str(type_name);
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| PartError::Serialization(format!("columns file is not UTF-8: {}", e)))?;
        let mut lines = text.lines();

        if lines.next() != Some(HEADER) {
            return Err(PartError::Serialization(
                "columns file has unknown header".to_string(),
            ));
        }

        let count: usize = lines
            .next()
            .and_then(|l| l.strip_suffix(" columns:"))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| {
                PartError::Serialization("columns file has malformed column count".to_string())
            })?;

        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let line = lines.next().ok_or_else(|| {
                PartError::Serialization(format!(
                    "columns file lists {} columns but ends after {}",
                    count,
                    columns.len()
                ))
            })?;
            columns.push(parse_column(line)?);
        }

        Ok(Self { columns })
    }
}

/// "`name` Type" with `\`-escaped backquotes and control characters inside the name
fn parse_column(line: &str) -> Result<(String, String)> {
    let malformed = || PartError::Serialization(format!("malformed column line: {:?}", line));

    let rest = line.strip_prefix('`').ok_or_else(malformed)?;
    let mut name = String::new();
    let mut chars = rest.char_indices();
    let mut type_start = None;

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => name.push(match chars.next().ok_or_else(malformed)?.1 {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                escaped => escaped,
            }),
            '`' => {
                type_start = Some(i + 1);
                break;
            }
            _ => name.push(c),
        }
    }

    let type_name = type_start
        .and_then(|start| rest[start..].strip_prefix(' '))
        .filter(|t| !t.is_empty())
        .ok_or_else(malformed)?;

    Ok((name, type_name.to_string()))
}
