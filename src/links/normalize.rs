//! Canonical link form: `https://<canonical host>/<path>/`, no query or fragment.

use super::matcher::{CandidateSource, LinkMatcher};
use super::service::ServiceProfile;
use std::borrow::Cow;

/// Drop every character outside printable ASCII. Archive text often carries
/// control bytes from the encoding interleaved with the link.
pub fn strip_noise(text: &str) -> Cow<'_, str> {
    if text.chars().all(|c| (' '..='~').contains(&c)) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| (' '..='~').contains(c)).collect())
    }
}

/// Clean and canonicalize a candidate. `None` means "not a usable link",
/// which is an expected outcome rather than an error.
pub fn normalize(matcher: &LinkMatcher, candidate: &str) -> Option<String> {
    let cleaned = strip_noise(candidate);
    let found = matcher
        .find_candidates(cleaned.trim(), CandidateSource::PlainText)
        .into_iter()
        .next()?;
    canonicalize(matcher.profile(), &found.text)
}

fn canonicalize(profile: &ServiceProfile, matched: &str) -> Option<String> {
    let mut url = url::Url::parse(matched).ok()?;
    url.set_scheme("https").ok()?;
    url.set_host(Some(profile.canonical_host)).ok()?;
    url.set_port(None).ok()?;
    url.set_query(None);
    url.set_fragment(None);

    let path = format!("{}/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Some(url.to_string())
}
