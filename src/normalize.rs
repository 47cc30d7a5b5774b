//! Title normalization for catalog/video matching.
//!
//! Reduces a raw title to its comparable core: label+bracket wrappers are
//! unwrapped, a lone bracketed segment is extracted, channel names after a
//! pipe and "- Site" suffixes are cut, whitespace is collapsed and decorative
//! edge characters are trimmed.
//!
//! CRITICAL: Scores and cross-reference results depend on this output. Run
//! tests after changes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::NormalizeConfig;
use crate::error::{Error, Result};

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Field separators: ASCII and fullwidth vertical bar.
pub static FIELD_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[|｜]").unwrap());

/// Innermost decorative bracket segment. One alternative per bracket pair;
/// the content may not contain any other decorative bracket.
pub static BRACKET_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"《([^《》〈〉「」『』【】]+)》",
        r"|〈([^《》〈〉「」『』【】]+)〉",
        r"|「([^《》〈〉「」『』【】]+)」",
        r"|『([^《》〈〉「」『』【】]+)』",
        r"|【([^《》〈〉「」『』【】]+)】",
    ))
    .unwrap()
});

/// Episode code like "EP06". Must not be glued to a preceding Latin letter
/// ("STEP2" is not an episode).
pub static EPISODE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z])(ep(\d+))").unwrap());

/// Regex to collapse whitespace runs into a single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Characters trimmed from both ends of a normalized title.
const EDGE_CHARS: &[char] = &[
    '《', '》', '〈', '〉', '「', '」', '『', '』', '【', '】', '[', ']', '(', ')', '（', '）',
    '｜', '|', '：', ':',
];

static DEFAULT_NORMALIZER: Lazy<Normalizer> =
    Lazy::new(|| Normalizer::from_config(&NormalizeConfig::default()).unwrap());

// ============================================================================
// WRAPPER RULES
// ============================================================================

/// One label+bracket wrapper: the regex decides whether the rule applies,
/// capture group 1 is the core title it extracts.
#[derive(Clone, Debug)]
pub struct WrapperRule {
    pattern: Regex,
}

impl WrapperRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let compiled = Regex::new(pattern).map_err(|source| Error::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        if compiled.captures_len() < 2 {
            return Err(Error::MissingCapture(pattern.to_string()));
        }
        Ok(Self { pattern: compiled })
    }

    pub fn extract<'a>(&self, raw: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Clone, Debug)]
pub struct Normalizer {
    wrappers: Vec<WrapperRule>,
    site_suffix: Option<Regex>,
}

impl Default for Normalizer {
    fn default() -> Self {
        DEFAULT_NORMALIZER.clone()
    }
}

impl Normalizer {
    pub fn from_config(config: &NormalizeConfig) -> Result<Self> {
        let wrappers = config
            .wrapper_patterns
            .iter()
            .map(|p| WrapperRule::new(p))
            .collect::<Result<Vec<_>>>()?;

        let sites: Vec<String> = config
            .site_suffixes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(regex::escape)
            .collect();
        let site_suffix = if sites.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\s*-\s*(?:{})", sites.join("|"));
            Some(Regex::new(&pattern).map_err(|source| Error::Pattern { pattern, source })?)
        };

        Ok(Self {
            wrappers,
            site_suffix,
        })
    }

    pub fn wrappers(&self) -> &[WrapperRule] {
        &self.wrappers
    }

    /// Normalize a title for matching.
    ///
    /// The single cleanup pass is repeated until its output stops changing, so
    /// the result is a fixed point: normalizing it again returns it unchanged.
    /// Every pass that changes the string either shortens it or only
    /// canonicalizes whitespace, so the loop terminates.
    pub fn normalize(&self, raw: &str) -> String {
        let mut current = self.normalize_once(raw);
        loop {
            let next = self.normalize_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn normalize_once(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return String::new();
        }

        // Wrapper table first, first rule wins; then the innermost bracket
        let core = self
            .wrappers
            .iter()
            .find_map(|rule| rule.extract(trimmed))
            .or_else(|| innermost_bracket(trimmed))
            .unwrap_or(trimmed);

        let core = match FIELD_SEPARATOR.find(core) {
            Some(m) => &core[..m.start()],
            None => core,
        };
        let core = match self.site_suffix.as_ref().and_then(|re| re.find(core)) {
            Some(m) => &core[..m.start()],
            None => core,
        };

        let collapsed = MULTI_SPACE.replace_all(core, " ");
        collapsed
            .trim_matches(|c: char| c.is_whitespace() || EDGE_CHARS.contains(&c))
            .to_string()
    }
}

/// Normalize with the built-in wrapper table and site suffixes.
pub fn normalize_title(raw: &str) -> String {
    DEFAULT_NORMALIZER.normalize(raw)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Content of the leftmost bracket pair that contains no other bracket.
pub fn innermost_bracket(s: &str) -> Option<&str> {
    let caps = BRACKET_SEGMENT.captures(s)?;
    caps.iter().skip(1).flatten().next().map(|m| m.as_str())
}

/// Episode code found in a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMarker<'a> {
    /// Text as written, e.g. "EP06"
    pub text: &'a str,
    pub number: u64,
}

/// First episode code in a title. "EP6" and "ep06" both carry number 6.
pub fn extract_episode(title: &str) -> Option<EpisodeMarker<'_>> {
    let caps = EPISODE_MARKER.captures(title)?;
    let text = caps.get(1)?.as_str();
    let number = caps.get(2)?.as_str().parse().ok()?;
    Some(EpisodeMarker { text, number })
}

/// Title with every occurrence of the marker text removed.
pub fn strip_episode(title: &str, marker: &EpisodeMarker<'_>) -> String {
    title.replace(marker.text, "")
}

// ============================================================================
// TESTS
// ============================================================================
