//! Link shapes per video service.
//!
//! Shapes are listed most specific first. The matcher relies on that order
//! to break ties between patterns that match at the same position.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkShape {
    /// `/@user/video/<id>` or `/<user>/p/<code>`
    ProfileContent,
    /// `/video/<id>`, `/p/<code>`, `/reel/<code>`
    Content,
    /// `/t/<code>` on the main host
    ShortLink,
    /// Dedicated short-link host (`vm.`, `vt.`, `instagr.am`)
    ShortHost,
    /// Short code served from the canonical host after rewriting
    CanonicalShort,
}

#[derive(Debug)]
pub struct ShapePattern {
    pub shape: LinkShape,
    pub pattern: &'static str,
    /// The match must end the URL path: a following path segment or
    /// word character rejects it.
    pub ends_path: bool,
}

#[derive(Debug)]
pub struct ServiceProfile {
    pub name: &'static str,
    /// Host every accepted link is rewritten to.
    pub canonical_host: &'static str,
    pub shapes: &'static [ShapePattern],
}

pub const TIKTOK: ServiceProfile = ServiceProfile {
    name: "tiktok",
    canonical_host: "www.tiktok.com",
    shapes: &[
        ShapePattern {
            shape: LinkShape::ProfileContent,
            pattern: r"(?i:https?://(?:www\.|m\.)?tiktok\.com)/@[A-Za-z0-9_.]+/video/[0-9]+",
            ends_path: false,
        },
        ShapePattern {
            shape: LinkShape::Content,
            pattern: r"(?i:https?://(?:www\.|m\.)?tiktok\.com)/video/[0-9]+",
            ends_path: false,
        },
        ShapePattern {
            shape: LinkShape::ShortLink,
            pattern: r"(?i:https?://(?:www\.|m\.)?tiktok\.com)/t/[A-Za-z0-9]+",
            ends_path: false,
        },
        ShapePattern {
            shape: LinkShape::ShortHost,
            pattern: r"(?i:https?://(?:vm|vt)\.tiktok\.com)/[A-Za-z0-9]+",
            ends_path: false,
        },
        ShapePattern {
            shape: LinkShape::CanonicalShort,
            // Generated codes carry an upper-case letter or digit; site pages
            // such as /foryou or /explore do not
            pattern: r"(?i:https?://(?:www\.)?tiktok\.com)/[A-Za-z0-9]*[A-Z0-9][A-Za-z0-9]*",
            ends_path: true,
        },
    ],
};

pub const INSTAGRAM: ServiceProfile = ServiceProfile {
    name: "instagram",
    canonical_host: "www.instagram.com",
    shapes: &[
        ShapePattern {
            shape: LinkShape::ProfileContent,
            pattern: r"(?i:https?://(?:www\.|m\.)?instagram\.com)/[A-Za-z0-9_.]+/(?:p|reel)/[A-Za-z0-9_-]+",
            ends_path: false,
        },
        ShapePattern {
            shape: LinkShape::Content,
            pattern: r"(?i:https?://(?:www\.|m\.)?instagram\.com)/(?:p|reels?|tv)/[A-Za-z0-9_-]+",
            ends_path: false,
        },
        ShapePattern {
            shape: LinkShape::ShortHost,
            pattern: r"(?i:https?://(?:www\.)?instagr\.am)/(?:p|reel)/[A-Za-z0-9_-]+",
            ends_path: false,
        },
    ],
};

pub const SERVICES: &[&ServiceProfile] = &[&TIKTOK, &INSTAGRAM];

pub fn by_name(name: &str) -> Option<&'static ServiceProfile> {
    SERVICES
        .iter()
        .copied()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}
