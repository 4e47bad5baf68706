use std::path::{Path, PathBuf};

use crate::{NarrateError, Result};

/// A document supplied by the text source: cleaned text plus a display name.
///
/// PDF extraction happens upstream; only plain text files are read here.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub text: String,
    /// Where the text came from, if it was read from disk.
    pub source: Option<PathBuf>,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            source: None,
        }
    }

    /// Read a UTF-8 text file. The display name is the file stem.
    pub fn from_text_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NarrateError::Document(format!(
                "Input file not found: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let text = text.replace("\r\n", "\n");
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        log::info!(
            "Loaded {} ({} words)",
            path.display(),
            text.split_whitespace().count()
        );
        Ok(Self {
            name,
            text,
            source: Some(path.to_path_buf()),
        })
    }

    /// File-system safe form of the display name, used for the job directory.
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let slug = slug.trim_matches('_').to_string();
        if slug.is_empty() {
            "document".to_string()
        } else {
            slug
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Document;

    #[test]
    fn reads_text_file_and_normalises_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("My Book.txt");
        std::fs::write(&path, "One.\r\n\r\nTwo.").unwrap();

        let doc = Document::from_text_file(&path).unwrap();
        assert_eq!(doc.name, "My Book");
        assert_eq!(doc.text, "One.\n\nTwo.");
        assert_eq!(doc.slug(), "my_book");
    }

    #[test]
    fn missing_file_is_a_document_error() {
        let err = Document::from_text_file(std::path::Path::new("/nonexistent/book.txt"));
        assert!(err.is_err());
    }
}
