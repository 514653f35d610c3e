//! Text extraction collaborator.
//!
//! Binary formats (PDF, DOCX) are extracted upstream; this crate only decodes
//! documents that already carry plain text.

/// Fewer non-whitespace characters than this counts as an unreadable document.
pub const MIN_READABLE_CHARS: usize = 10;

/// A candidate document as it entered the batch.
#[derive(Debug, Clone)]
pub struct CandidateDocument {
    pub filename: String,
    pub content: Vec<u8>,
}

impl CandidateDocument {
    pub fn from_text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: text.into().into_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub success: bool,
}

impl Extraction {
    pub fn failed() -> Self {
        Self {
            text: String::new(),
            success: false,
        }
    }

    /// True when the pipeline can run on this text.
    pub fn is_usable(&self) -> bool {
        self.success && !is_near_empty(&self.text)
    }
}

pub fn is_near_empty(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() < MIN_READABLE_CHARS
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, document: &CandidateDocument) -> Extraction;
}

/// Accepts UTF-8 content as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, document: &CandidateDocument) -> Extraction {
        match std::str::from_utf8(&document.content) {
            Ok(text) => Extraction {
                text: text.trim().to_string(),
                success: true,
            },
            Err(_) => Extraction::failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_trimmed() {
        let doc = CandidateDocument::from_text("ada.txt", "  5 years Python, BS CS \n");
        let extraction = PlainTextExtractor.extract(&doc);
        assert_eq!(extraction.text, "5 years Python, BS CS");
        assert!(extraction.is_usable());
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let doc = CandidateDocument {
            filename: "scan.pdf".into(),
            content: vec![0x25, 0x50, 0xff, 0xfe, 0x00],
        };
        let extraction = PlainTextExtractor.extract(&doc);
        assert!(!extraction.success);
        assert!(!extraction.is_usable());
    }

    #[test]
    fn test_near_empty_threshold() {
        assert!(is_near_empty("  a b c \n d e f g h i "));
        assert!(!is_near_empty("abcdefghij"));
        assert!(is_near_empty(""));
    }
}
