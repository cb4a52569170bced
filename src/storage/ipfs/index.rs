/// Record key to content-address index file
///
/// Plain text, one `<method:subject> <address>` pair per line; lines starting
/// with `#` are comments. Keys can't carry whitespace since the format has no
/// escaping.
use crate::error::{AgentError, AgentResult};
use std::collections::BTreeMap;

const HEADER: &str = "# did-agent index: <method:subject> <address>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: BTreeMap<String, String>,
}

impl Index {
    /// Parse index contents, skipping comments and malformed lines
    pub fn parse(contents: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(subject), Some(address), None) => {
                    entries.insert(subject.to_string(), address.to_string());
                }
                _ => tracing::warn!(line, "skipping malformed index line"),
            }
        }
        Self { entries }
    }

    /// Sorted rendering with a header comment
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + 1 + self.entries.len() * 80);
        out.push_str(HEADER);
        out.push('\n');
        for (subject, address) in &self.entries {
            out.push_str(subject);
            out.push(' ');
            out.push_str(address);
            out.push('\n');
        }
        out
    }

    pub fn get(&self, subject: &str) -> Option<&str> {
        self.entries.get(subject).map(String::as_str)
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.entries.contains_key(subject)
    }

    /// Add or replace the entry for `subject`
    pub fn insert(&mut self, subject: &str, address: &str) -> AgentResult<()> {
        validate_entry(subject)?;
        validate_entry(address)?;
        self.entries.insert(subject.to_string(), address.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(value: &str) -> AgentResult<()> {
    if value.is_empty() || value.starts_with('#') || value.chars().any(char::is_whitespace) {
        return Err(AgentError::Validation(format!(
            "value can't be stored in the index: {:?}",
            value
        )));
    }
    Ok(())
}
