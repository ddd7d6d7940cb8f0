//! Finding, cleaning and canonicalizing shared video links.

pub mod extract;
pub mod matcher;
pub mod normalize;
pub mod service;

pub use extract::{LinkExtractor, LINK_ATTRIBUTE_KEYS};
pub use matcher::{Candidate, CandidateSource, LinkMatcher};
pub use normalize::{normalize, strip_noise};
pub use service::{LinkShape, ServiceProfile};
