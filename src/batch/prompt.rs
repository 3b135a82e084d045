//! Prompt assembly: base prompt, auto-captions, and the optional prompt list.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Split a comma-separated tag string, dropping empty entries.
#[must_use]
pub fn split_tags(caption: &str) -> Vec<String> {
    caption
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Append `extra` to `base` with a single `", "` between them.
#[must_use]
pub fn join_prompt(base: &str, extra: &str) -> String {
    let base = base.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
    let extra = extra.trim();
    match (base.is_empty(), extra.is_empty()) {
        (true, _) => extra.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}, {extra}"),
    }
}

/// Keeps consecutive captions consistent: tags shared with the previous image
/// come first, then the tags new to this image.
#[derive(Debug, Clone, Default)]
pub struct CaptionMemory {
    previous: Vec<String>,
}

impl CaptionMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reorder `caption` against the previous one and remember it.
    pub fn carry_over(&mut self, caption: &str) -> String {
        let current = split_tags(caption);

        let (shared, novel): (Vec<&String>, Vec<&String>) = current
            .iter()
            .partition(|tag| self.previous.contains(*tag));

        let merged = shared
            .into_iter()
            .chain(novel)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        self.previous = current;
        merged
    }
}

/// Prompts read from the first column of a headerless CSV file.
#[derive(Debug, Clone, Default)]
pub struct PromptList {
    prompts: Vec<String>,
}

impl PromptList {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|source| Error::PromptList {
                path: path.to_path_buf(),
                source,
            })?;
        Self::collect(reader).map_err(|source| Error::PromptList {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the data is not valid CSV.
    pub fn from_reader<R: Read>(reader: R) -> csv::Result<Self> {
        Self::collect(
            csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(reader),
        )
    }

    fn collect<R: Read>(mut reader: csv::Reader<R>) -> csv::Result<Self> {
        let mut prompts = Vec::new();
        for record in reader.records() {
            let record = record?;
            prompts.push(record.get(0).unwrap_or_default().trim().to_string());
        }
        Ok(Self { prompts })
    }

    /// Prompt for the `frame`-th generated image.
    #[must_use]
    pub fn get(&self, frame: usize) -> Option<&str> {
        self.prompts.get(frame).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_prompt() {
        assert_eq!(join_prompt("", "a, b"), "a, b");
        assert_eq!(join_prompt("masterpiece", ""), "masterpiece");
        assert_eq!(join_prompt("masterpiece, ", "1girl"), "masterpiece, 1girl");
    }

    #[test]
    fn test_carry_over_puts_shared_tags_first() {
        let mut memory = CaptionMemory::new();
        assert_eq!(memory.carry_over("1girl, smile, outdoors"), "1girl, smile, outdoors");
        assert_eq!(
            memory.carry_over("sky, outdoors, 1girl, hat"),
            "outdoors, 1girl, sky, hat"
        );
        // Memory holds the raw tags of the last caption.
        assert_eq!(memory.carry_over("cat, hat, sky"), "hat, sky, cat");
    }

    #[test]
    fn test_split_tags_ignores_blanks() {
        assert_eq!(split_tags(" a ,, b,"), vec!["a", "b"]);
    }

    #[test]
    fn test_prompt_list_first_column() {
        let data = "a red car,ignored\n\"a cat, sitting\"\nplain\n";
        let list = PromptList::from_reader(data.as_bytes()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0), Some("a red car"));
        assert_eq!(list.get(1), Some("a cat, sitting"));
        assert_eq!(list.get(3), None);
    }
}
