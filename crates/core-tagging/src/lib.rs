//! Routing tags: the group key the distributed cache uses to bundle related fetches.
//!
//! Tagging is best effort. A URL that does not parse yields an empty tag and a
//! warning; the request still goes out, only grouping suffers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use url::{Position, Url};

/// Header carrying the tag to the service.
pub const GROUP_HEADER: &str = "X-Ouinet-Group";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoutingTag(String);

impl RoutingTag {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoutingTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An explicit tag, bypassing derivation.
impl From<&str> for RoutingTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<RoutingTag> for String {
    fn from(t: RoutingTag) -> String {
        t.0
    }
}

/// Tag layout agreed with the grouping side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagFormat {
    /// `host[:port]`; host normalised, userinfo dropped, port kept as written.
    #[default]
    Authority,
    /// Everything after `scheme:` minus the leading `//`, i.e. `host/path?query`.
    SchemeSpecific,
}

/// Why a URL produced an empty tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggingWarning {
    Unparsable(String),
    NoHost,
}

impl fmt::Display for TaggingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggingWarning::Unparsable(e) => write!(f, "url does not parse: {e}"),
            TaggingWarning::NoHost => f.write_str("url has no host"),
        }
    }
}

/// Derive a tag, reporting why it came out empty.
pub fn try_tag(url: &str, format: TagFormat) -> Result<RoutingTag, TaggingWarning> {
    let url = url.trim();
    let parsed = Url::parse(url).map_err(|e| TaggingWarning::Unparsable(e.to_string()))?;
    let s = match format {
        TagFormat::Authority => {
            if parsed.host_str().map_or(true, str::is_empty) {
                return Err(TaggingWarning::NoHost);
            }
            let host = &parsed[Position::BeforeHost..Position::AfterHost];
            // url drops a port equal to the scheme default; keep it when written
            match parsed.port().or_else(|| written_port(url)) {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        TagFormat::SchemeSpecific => {
            let rest = &parsed[Position::AfterScheme..Position::AfterQuery];
            let rest = rest.strip_prefix(':').unwrap_or(rest);
            rest.strip_prefix("//").unwrap_or(rest).to_string()
        }
    };
    Ok(RoutingTag(s))
}

/// Port as it appears in the authority of the raw input.
fn written_port(url: &str) -> Option<u16> {
    let (_, rest) = url.split_once("//")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let (_, port) = host_port.rsplit_once(':')?;
    if port.contains(']') {
        return None;
    }
    port.parse().ok()
}

/// Derive the tag for `url`; never fails.
pub fn tag_with(url: &str, format: TagFormat) -> RoutingTag {
    match try_tag(url, format) {
        Ok(t) => t,
        Err(w) => {
            warn!(%url, warning = %w, "routing tag left empty");
            RoutingTag::empty()
        }
    }
}

/// [`tag_with`] using [`TagFormat::Authority`].
pub fn tag(url: &str) -> RoutingTag {
    tag_with(url, TagFormat::Authority)
}
