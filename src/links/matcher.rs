use super::service::{LinkShape, ServiceProfile};
use regex::Regex;

/// Where a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    PlainText,
    /// Text leaf of a decoded archive.
    ArchiveText,
    /// Value of a rich-text link attribute.
    LinkAttribute,
}

/// A substring that looks like a link for the active service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub shape: LinkShape,
    pub source: CandidateSource,
}

pub struct LinkMatcher {
    profile: &'static ServiceProfile,
    patterns: Vec<(LinkShape, Regex, bool)>,
}

/// Characters that continue a URL path segment.
fn continues_path(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@' | '%' | '~' | '+' | '=')
}

/// True when the URL path ends at byte `end`: end of text, a character that
/// cannot belong to a URL, or a `/` or `.` that is not followed by more path.
fn path_ends_at(text: &str, end: usize) -> bool {
    let mut rest = text[end..].chars();
    match rest.next() {
        None | Some('?') | Some('#') => true,
        Some('/') | Some('.') => !rest.next().is_some_and(|c| continues_path(c) || c == '/'),
        Some(c) => !continues_path(c),
    }
}

impl LinkMatcher {
    pub fn new(profile: &'static ServiceProfile) -> Self {
        let patterns = profile
            .shapes
            .iter()
            .map(|s| (s.shape, Regex::new(s.pattern).expect("static link pattern"), s.ends_path))
            .collect();
        Self { profile, patterns }
    }

    pub fn profile(&self) -> &'static ServiceProfile {
        self.profile
    }

    /// Scan `text` for non-overlapping candidates.
    ///
    /// Overlaps resolve to the earliest start, then the longest match, then
    /// the more specific shape.
    pub fn find_candidates(&self, text: &str, source: CandidateSource) -> Vec<Candidate> {
        let mut hits: Vec<(usize, usize, usize)> = Vec::new();
        for (order, (_, re, ends_path)) in self.patterns.iter().enumerate() {
            hits.extend(
                re.find_iter(text)
                    .filter(|m| !ends_path || path_ends_at(text, m.end()))
                    .map(|m| (m.start(), m.end(), order)),
            );
        }
        hits.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0)))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut candidates = Vec::new();
        let mut last_end = 0;
        for (start, end, order) in hits {
            if start < last_end {
                continue;
            }
            last_end = end;
            candidates.push(Candidate {
                text: text[start..end].to_string(),
                start,
                end,
                shape: self.patterns[order].0,
                source,
            });
        }
        candidates
    }

    pub fn is_match(&self, text: &str) -> bool {
        !self.find_candidates(text, CandidateSource::PlainText).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::service::{INSTAGRAM, TIKTOK};

    fn shapes(text: &str) -> Vec<(String, LinkShape)> {
        LinkMatcher::new(&TIKTOK)
            .find_candidates(text, CandidateSource::PlainText)
            .into_iter()
            .map(|c| (c.text, c.shape))
            .collect()
    }

    #[test]
    fn test_short_host() {
        assert_eq!(
            shapes("check this https://vm.tiktok.com/ZxQ9 lol"),
            vec![("https://vm.tiktok.com/ZxQ9".to_string(), LinkShape::ShortHost)]
        );
    }

    #[test]
    fn test_profile_link_not_swallowed_by_short_shape() {
        assert_eq!(
            shapes("https://www.tiktok.com/@alice.b/video/7312345678901234567?lang=en"),
            vec![(
                "https://www.tiktok.com/@alice.b/video/7312345678901234567".to_string(),
                LinkShape::ProfileContent
            )]
        );
    }

    #[test]
    fn test_bare_video_prefers_longest() {
        assert_eq!(
            shapes("https://tiktok.com/video/123"),
            vec![("https://tiktok.com/video/123".to_string(), LinkShape::Content)]
        );
    }

    #[test]
    fn test_multiple_candidates_in_order() {
        let found = shapes("a https://m.tiktok.com/t/AbC1 b https://vm.tiktok.com/Q2 c");
        assert_eq!(
            found,
            vec![
                ("https://m.tiktok.com/t/AbC1".to_string(), LinkShape::ShortLink),
                ("https://vm.tiktok.com/Q2".to_string(), LinkShape::ShortHost),
            ]
        );
    }

    #[test]
    fn test_case_insensitive_host() {
        assert_eq!(shapes("HTTPS://VM.TIKTOK.COM/Zz9").len(), 1);
    }

    #[test]
    fn test_site_pages_are_not_short_codes() {
        assert!(shapes("see https://www.tiktok.com/tag/funny").is_empty());
        assert!(shapes("https://www.tiktok.com/foryou?lang=en").is_empty());
        assert!(shapes("https://tiktok.com/explore").is_empty());
        assert!(shapes("https://www.tiktok.com/Tag2/funny").is_empty());
    }

    #[test]
    fn test_canonical_short_must_end_path() {
        for text in [
            "https://www.tiktok.com/ZxQ9",
            "https://www.tiktok.com/ZxQ9/",
            "(https://www.tiktok.com/ZxQ9) nice",
            "https://www.tiktok.com/ZxQ9?lang=en",
            "watch https://www.tiktok.com/ZxQ9/ now.",
            "end of sentence https://www.tiktok.com/ZxQ9.",
        ] {
            assert_eq!(
                shapes(text),
                vec![("https://www.tiktok.com/ZxQ9".to_string(), LinkShape::CanonicalShort)],
                "{}",
                text
            );
        }
        assert!(shapes("https://www.tiktok.com/ZxQ9.html").is_empty());
    }

    #[test]
    fn test_no_match() {
        assert!(shapes("see https://example.com/video/1").is_empty());
        assert!(!LinkMatcher::new(&TIKTOK).is_match("no links here"));
    }

    #[test]
    fn test_instagram_profile() {
        let matcher = LinkMatcher::new(&INSTAGRAM);
        let found = matcher.find_candidates(
            "https://www.instagram.com/reel/Cx1_ab-9/?igsh=abc",
            CandidateSource::PlainText,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "https://www.instagram.com/reel/Cx1_ab-9");
        assert_eq!(found[0].shape, LinkShape::Content);
    }
}
