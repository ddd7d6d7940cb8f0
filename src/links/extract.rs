use super::matcher::{CandidateSource, LinkMatcher};
use super::normalize::{normalize, strip_noise};
use crate::archive::{DecodedArchive, DecodedValue};
use std::collections::BTreeSet;

/// Attribute keys whose value is expected to hold exactly one link.
pub const LINK_ATTRIBUTE_KEYS: &[&str] = &["NSLink", "NSLinkAttributeName", "__kIMLinkAttributeName"];

/// Key under which an archived URL object keeps its string form.
const URL_RELATIVE_KEY: &str = "NS.relative";

pub struct LinkExtractor<'m> {
    matcher: &'m LinkMatcher,
}

impl<'m> LinkExtractor<'m> {
    pub fn new(matcher: &'m LinkMatcher) -> Self {
        Self { matcher }
    }

    /// Canonical links found in a plain string.
    pub fn extract_text(&self, text: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        self.scan_text(text, CandidateSource::PlainText, &mut found);
        found
    }

    /// Canonical links found anywhere in a decoded archive.
    ///
    /// Depth-first over mappings, sequences and text leaves. Each object-table
    /// entry is entered at most once, so cyclic archives terminate.
    pub fn extract_archive(&self, archive: &DecodedArchive) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut visited = vec![false; archive.objects.len()];
        let mut stack: Vec<&DecodedValue> = vec![&archive.root];

        while let Some(value) = stack.pop() {
            match value {
                DecodedValue::Text(text) => {
                    self.scan_text(text, CandidateSource::ArchiveText, &mut found);
                }
                DecodedValue::OrderedSequence(items) => stack.extend(items.iter().rev()),
                DecodedValue::Mapping(mapping) => {
                    for (key, attr) in &mapping.entries {
                        if LINK_ATTRIBUTE_KEYS.contains(&key.as_str()) {
                            if let Some(url) = self.link_attribute(archive, attr) {
                                found.insert(url);
                            }
                        }
                    }
                    stack.extend(mapping.entries.values().rev());
                }
                DecodedValue::BackReference(index) => {
                    if let Some(seen) = visited.get_mut(*index) {
                        if !*seen {
                            *seen = true;
                            if let Some(target) = archive.objects.get(*index) {
                                stack.push(target);
                            }
                        }
                    }
                }
                DecodedValue::Null
                | DecodedValue::Boolean(_)
                | DecodedValue::Integer(_)
                | DecodedValue::FloatingPoint(_)
                | DecodedValue::ByteSequence(_) => {}
            }
        }
        found
    }

    /// Link attribute values are either a string or an archived URL object.
    fn link_attribute(&self, archive: &DecodedArchive, value: &DecodedValue) -> Option<String> {
        let text = match archive.resolve(value)? {
            DecodedValue::Text(text) => text.as_str(),
            DecodedValue::Mapping(mapping) => archive.resolve(mapping.get(URL_RELATIVE_KEY)?)?.as_text()?,
            _ => return None,
        };
        normalize(self.matcher, text)
    }

    fn scan_text(&self, text: &str, source: CandidateSource, found: &mut BTreeSet<String>) {
        // Control bytes may split a link; only the cleaned text is scanned
        let cleaned = strip_noise(text);
        for candidate in self.matcher.find_candidates(&cleaned, source) {
            if let Some(url) = normalize(self.matcher, &candidate.text) {
                found.insert(url);
            }
        }
    }
}
