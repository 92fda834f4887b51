//! Accept-pattern matching for selected files.
//!
//! Patterns follow the HTML `accept` attribute: `.ext` matches the file name
//! suffix case-insensitively, `type/*` and `type/subtype` match the declared
//! MIME type.

use crate::types::UploadFile;

/// One parsed accept pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptPattern {
    /// `.png`, stored lowercase with the dot.
    Extension(String),
    /// `video/*`
    MimeWildcard(String),
    /// `application/pdf`
    Mime(String),
}

impl AcceptPattern {
    /// Parses a pattern. Returns `None` for blank or unrecognized input.
    pub fn parse(raw: &str) -> Option<Self> {
        let p = raw.trim().to_ascii_lowercase();
        if p.is_empty() {
            return None;
        }
        if p.starts_with('.') {
            return (p.len() > 1).then_some(Self::Extension(p));
        }
        let (kind, sub) = p.split_once('/')?;
        if kind.is_empty() || sub.is_empty() {
            return None;
        }
        if sub == "*" {
            Some(Self::MimeWildcard(kind.to_string()))
        } else {
            Some(Self::Mime(p))
        }
    }

    /// Returns `true` if `name`/`mime_type` satisfy this pattern.
    pub fn matches(&self, name: &str, mime_type: &str) -> bool {
        match self {
            Self::Extension(ext) => name.to_ascii_lowercase().ends_with(ext.as_str()),
            Self::MimeWildcard(kind) => mime_type
                .split_once('/')
                .is_some_and(|(k, _)| k.eq_ignore_ascii_case(kind)),
            Self::Mime(full) => mime_type.trim().eq_ignore_ascii_case(full),
        }
    }
}

/// A set of accept patterns.
///
/// An empty set accepts everything. A non-empty set whose patterns are all
/// unparseable accepts nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptFilter {
    patterns: Vec<AcceptPattern>,
    raw: Vec<String>,
}

impl AcceptFilter {
    /// Builds a filter from raw pattern strings, skipping unparseable ones.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let patterns = raw.iter().filter_map(|p| AcceptPattern::parse(p)).collect();
        Self { patterns, raw }
    }

    /// The patterns as originally given.
    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    /// Returns `true` if no patterns were given.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns `true` if the file satisfies at least one pattern.
    pub fn accepts(&self, file: &UploadFile) -> bool {
        self.accepts_name(&file.name, &file.mime_type)
    }

    pub fn accepts_name(&self, name: &str, mime_type: &str) -> bool {
        self.raw.is_empty() || self.patterns.iter().any(|p| p.matches(name, mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_patterns() {
        assert_eq!(
            AcceptPattern::parse(".PNG"),
            Some(AcceptPattern::Extension(".png".into()))
        );
        assert_eq!(
            AcceptPattern::parse("video/*"),
            Some(AcceptPattern::MimeWildcard("video".into()))
        );
        assert_eq!(
            AcceptPattern::parse(" application/pdf "),
            Some(AcceptPattern::Mime("application/pdf".into()))
        );
        assert_eq!(AcceptPattern::parse(""), None);
        assert_eq!(AcceptPattern::parse("."), None);
        assert_eq!(AcceptPattern::parse("video"), None);
        assert_eq!(AcceptPattern::parse("/*"), None);
    }

    #[test]
    fn png_or_video_filter() {
        let filter = AcceptFilter::new([".png", "video/*"]);
        assert!(filter.accepts_name("clip.mov", "video/quicktime"));
        assert!(!filter.accepts_name("doc.pdf", "application/pdf"));
        assert!(filter.accepts_name("SHOT.PNG", ""));
        assert!(!filter.accepts_name("png", "text/plain"));
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = AcceptFilter::default();
        assert!(filter.is_empty());
        assert!(filter.accepts_name("anything.xyz", ""));
    }

    #[test]
    fn exact_mime_match() {
        let filter = AcceptFilter::new(["image/jpeg"]);
        assert!(filter.accepts_name("a.jpg", "IMAGE/JPEG"));
        assert!(!filter.accepts_name("a.png", "image/png"));
    }

    #[test]
    fn raw_patterns_are_preserved() {
        let filter = AcceptFilter::new([".png", "bogus"]);
        assert_eq!(filter.raw(), &[".png".to_string(), "bogus".to_string()]);
        assert!(!filter.accepts_name("a.txt", "text/plain"));

        let garbage = AcceptFilter::new(["bogus"]);
        assert!(!garbage.is_empty());
        assert!(!garbage.accepts_name("a.txt", "text/plain"));
    }
}
