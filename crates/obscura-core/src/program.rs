//! Program source parsing
//!
//! The engine only needs a program's record type map: which record kinds it
//! declares and which fields each carries. Sources look like:
//!
//! ```text
//! program credits.obs;
//!
//! record credits:
//!     owner as address.private;
//!     microcredits as u64.private;
//!
//! function transfer_private:
//!     ...
//! ```
//!
//! The parser is line based and deliberately tolerant of anything outside
//! the `program`/`record`/`function` declarations it cares about.

use crate::{Error, Result};

/// One declared field of a record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    /// Field name
    pub name: String,
    /// Declared type (e.g. `address`, `u64`, `field`)
    pub type_name: String,
    /// Declared visibility (`private` or `public`), when present
    pub visibility: Option<String>,
}

/// One record kind declared by a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    /// Record kind name
    pub name: String,
    /// Declared fields in source order
    pub fields: Vec<RecordField>,
}

/// Parsed program surface: id, record kinds, function names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Program id (e.g. `credits.obs`)
    pub id: String,
    /// Declared record kinds
    pub records: Vec<RecordType>,
    /// Declared function names
    pub functions: Vec<String>,
}

impl Program {
    /// Parse a program source string
    pub fn parse(source: &str) -> Result<Self> {
        let mut id: Option<String> = None;
        let mut records: Vec<RecordType> = Vec::new();
        let mut functions: Vec<String> = Vec::new();
        let mut current_record: Option<RecordType> = None;

        for (line_no, raw) in source.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix("program ") {
                let declared = rest.trim_end_matches(';').trim();
                if declared.is_empty() {
                    return Err(Error::InvalidProgram(format!(
                        "line {}: empty program id",
                        line_no + 1
                    )));
                }
                if id.is_some() {
                    return Err(Error::InvalidProgram(format!(
                        "line {}: duplicate program declaration",
                        line_no + 1
                    )));
                }
                id = Some(declared.to_string());
                continue;
            }

            if let Some(rest) = line.strip_prefix("record ") {
                if let Some(finished) = current_record.take() {
                    records.push(finished);
                }
                let name = rest.trim_end_matches(':').trim();
                if name.is_empty() {
                    return Err(Error::InvalidProgram(format!(
                        "line {}: empty record name",
                        line_no + 1
                    )));
                }
                current_record = Some(RecordType {
                    name: name.to_string(),
                    fields: Vec::new(),
                });
                continue;
            }

            if let Some(rest) = line.strip_prefix("function ") {
                if let Some(finished) = current_record.take() {
                    records.push(finished);
                }
                let name = rest.trim_end_matches(':').trim();
                if !name.is_empty() {
                    functions.push(name.to_string());
                }
                continue;
            }

            // Any other declaration keyword ends the current record block.
            if is_declaration(line) {
                if let Some(finished) = current_record.take() {
                    records.push(finished);
                }
                continue;
            }

            if let Some(record) = current_record.as_mut() {
                if let Some(field) = parse_field(line) {
                    record.fields.push(field);
                }
            }
        }

        if let Some(finished) = current_record.take() {
            records.push(finished);
        }

        let id = id.ok_or_else(|| Error::InvalidProgram("missing program declaration".to_string()))?;
        Ok(Self {
            id,
            records,
            functions,
        })
    }

    /// Look up a declared record kind by name
    pub fn record_type(&self, name: &str) -> Option<&RecordType> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Find the record kind whose field set matches a decrypted plaintext
    pub fn matching_record_type(&self, plaintext: &crate::record::RecordPlaintext) -> Option<&RecordType> {
        self.records.iter().find(|r| plaintext.matches_type(r))
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn is_declaration(line: &str) -> bool {
    const KEYWORDS: [&str; 6] = ["struct ", "mapping ", "closure ", "finalize ", "import ", "transition "];
    KEYWORDS.iter().any(|k| line.starts_with(k))
}

/// Parse `name as type.visibility;` into a field.
fn parse_field(line: &str) -> Option<RecordField> {
    let line = line.trim_end_matches(';').trim();
    let (name, type_part) = line.split_once(" as ")?;
    let name = name.trim();
    let type_part = type_part.trim();
    if name.is_empty() || type_part.is_empty() || name.contains(' ') {
        return None;
    }
    let (type_name, visibility) = match type_part.split_once('.') {
        Some((t, v)) => (t.to_string(), Some(v.to_string())),
        None => (type_part.to_string(), None),
    };
    Some(RecordField {
        name: name.to_string(),
        type_name,
        visibility,
    })
}
