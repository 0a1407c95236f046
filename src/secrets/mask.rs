//! Secret masking

use std::fmt;

/// Replaces known secret values in text with a placeholder
#[derive(Clone)]
pub struct Masker {
    placeholder: String,
    /// Longest first, so a value containing another is replaced whole
    values: Vec<String>,
}

impl Masker {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Masker {
            placeholder: placeholder.into(),
            values: Vec::new(),
        }
    }

    /// Register a sensitive value. Empty values are ignored.
    pub fn add(&mut self, value: &str) {
        if value.is_empty() || self.values.iter().any(|v| v == value) {
            return;
        }
        self.values.push(value.to_string());
        self.values.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn add_all<'a>(&mut self, values: impl IntoIterator<Item = &'a str>) {
        for value in values {
            self.add(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every occurrence of every registered value
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for value in &self.values {
            if masked.contains(value.as_str()) {
                masked = masked.replace(value.as_str(), &self.placeholder);
            }
        }
        masked
    }
}

impl Default for Masker {
    fn default() -> Self {
        Self::new("<<SENSITIVE>>")
    }
}

impl fmt::Debug for Masker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Masker")
            .field("placeholder", &self.placeholder)
            .field("values", &self.values.len())
            .finish()
    }
}
