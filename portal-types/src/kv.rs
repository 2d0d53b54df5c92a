//! Flat `key=value` wire document.
//!
//! Roster, registration, and poll payloads are exchanged as a text document
//! with one `key=value` pair per line. Values may contain `=`; keys may not.
//! Blank lines are ignored. Key order is preserved, which matters for
//! indexed keys like `item.0`, `item.1`.

use crate::WireError;

/// An ordered `key=value` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvDocument {
    pairs: Vec<(String, String)>,
}

impl KvDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, replacing an existing pair with the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        if let Some(pair) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            pair.1 = value;
        } else {
            self.pairs.push((key, value));
        }
        self
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a value by key, erroring when absent.
    pub fn require(&self, key: &str) -> Result<&str, WireError> {
        self.get(key).ok_or_else(|| WireError::MissingKey {
            key: key.to_string(),
        })
    }

    /// Collect the values of an indexed key family (`prefix.0`, `prefix.1`, ...)
    /// in index order, stopping at the first gap.
    pub fn indexed(&self, prefix: &str) -> Vec<&str> {
        let mut values = Vec::new();
        for i in 0.. {
            match self.get(&format!("{prefix}.{i}")) {
                Some(v) => values.push(v),
                None => break,
            }
        }
        values
    }

    /// Number of pairs in the document.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the document has no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate over pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode as `key=value` lines.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.pairs {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    /// Parse from `key=value` lines.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let mut doc = Self::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| WireError::InvalidLine {
                line: line.to_string(),
            })?;
            doc.pairs.push((key.to_string(), value.to_string()));
        }
        Ok(doc)
    }

    /// Parse from raw bytes (must be UTF-8).
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::NotUtf8)?;
        Self::parse(text)
    }
}
