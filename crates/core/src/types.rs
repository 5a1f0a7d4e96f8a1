//! Core data types
//!
//! - [`DocKey`]: unique document identifier (the article URL)
//! - [`Record`]: the crawled article (title, content, contained links)
//! - [`Signature`]: fixed-length MinHash signature
//! - [`ShingleRule`]: one shingling rule for a record field
//! - [`Cluster`] / [`ClusterIndex`]: canonical clustering output

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Unique document identifier (the article URL).
pub type DocKey = String;

/// Canonical cluster: deduplicated document keys sorted ascending.
pub type Cluster = Vec<DocKey>;

/// Position of a cluster in the canonical cluster list.
pub type ClusterIndex = usize;

// ============================================================================
// Record
// ============================================================================

/// A crawled news article.
///
/// Every field defaults to empty so that partial query payloads
/// (`{"title": "..."}`) deserialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Article title
    #[serde(default)]
    pub title: String,
    /// Article body text
    #[serde(default)]
    pub content: String,
    /// Links found in the article: URL -> anchor text
    #[serde(default)]
    pub contained_urls: BTreeMap<String, String>,
}

impl Record {
    /// Field name of [`Record::title`] in shingle rules.
    pub const TITLE: &'static str = "title";
    /// Field name of [`Record::content`] in shingle rules.
    pub const CONTENT: &'static str = "content";
    /// Field name of [`Record::contained_urls`] in shingle rules.
    pub const CONTAINED_URLS: &'static str = "contained_urls";
    /// All field names recognized by shingle rules.
    pub const FIELDS: [&'static str; 3] = [Self::TITLE, Self::CONTENT, Self::CONTAINED_URLS];

    /// Create a record from its parts.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        contained_urls: BTreeMap<String, String>,
    ) -> Self {
        Record {
            title: title.into(),
            content: content.into(),
            contained_urls,
        }
    }

    /// Text view of the record used for shingling.
    ///
    /// `contained_urls` contributes the concatenation of its URL keys in
    /// ascending order. Anchor text is not shingled.
    pub fn shingle_fields(&self) -> BTreeMap<&'static str, Cow<'_, str>> {
        let urls: String = self.contained_urls.keys().map(String::as_str).collect();
        let mut fields = BTreeMap::new();
        fields.insert(Self::TITLE, Cow::Borrowed(self.title.as_str()));
        fields.insert(Self::CONTENT, Cow::Borrowed(self.content.as_str()));
        fields.insert(Self::CONTAINED_URLS, Cow::Owned(urls));
        fields
    }
}

// ============================================================================
// Signature
// ============================================================================

/// MinHash signature: entry `i` is the minimum of hash function `i` over
/// all shingles of a document.
///
/// Signatures are only comparable when built with the same hash family and
/// length. `Ord` is derived so signatures can key ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature {
    values: Vec<u64>,
}

impl Signature {
    /// Wrap raw hash minima.
    pub fn from_values(values: Vec<u64>) -> Self {
        Signature { values }
    }

    /// Raw hash minima.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Signature length (`num_perm`).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for a zero-length signature.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Estimated Jaccard similarity: fraction of equal positions.
    ///
    /// Returns 0.0 when the lengths differ or both are empty, so the result
    /// is always in `[0, 1]`.
    pub fn jaccard(&self, other: &Signature) -> f64 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return 0.0;
        }
        let equal = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.values.len() as f64
    }

    /// Number of positions where the signatures differ.
    pub fn hamming_distance(&self, other: &Signature) -> usize {
        debug_assert_eq!(self.values.len(), other.values.len());
        self.values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a != b)
            .count()
    }

    /// Hamming distance as a fraction of the signature length.
    pub fn normalized_hamming(&self, other: &Signature) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.hamming_distance(other) as f64 / self.values.len() as f64
    }
}

// ============================================================================
// ShingleRule
// ============================================================================

/// One shingling rule applied to a record field.
///
/// Serialized as the token `"words"` (case-insensitive, so `"WORDS"` also
/// parses) or as a two-element `[min_n, max_n]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr", into = "RuleRepr")]
pub enum ShingleRule {
    /// Split on runs of non-word characters
    Words,
    /// Every character n-gram with `min_n <= n <= max_n`
    NGrams {
        /// Shortest n-gram length
        min_n: usize,
        /// Longest n-gram length (inclusive)
        max_n: usize,
    },
}

impl ShingleRule {
    /// Character n-gram rule over `[min_n, max_n]`.
    pub fn ngrams(min_n: usize, max_n: usize) -> Self {
        ShingleRule::NGrams { min_n, max_n }
    }
}

impl fmt::Display for ShingleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShingleRule::Words => f.write_str("words"),
            ShingleRule::NGrams { min_n, max_n } => write!(f, "[{}, {}]", min_n, max_n),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RuleRepr {
    Token(String),
    Range(usize, usize),
}

impl TryFrom<RuleRepr> for ShingleRule {
    type Error = String;

    fn try_from(repr: RuleRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            RuleRepr::Token(token) if token.eq_ignore_ascii_case("words") => Ok(ShingleRule::Words),
            RuleRepr::Token(token) => Err(format!(
                "unknown shingle rule '{}', expected \"words\" or [min_n, max_n]",
                token
            )),
            RuleRepr::Range(min_n, max_n) => Ok(ShingleRule::NGrams { min_n, max_n }),
        }
    }
}

impl From<ShingleRule> for RuleRepr {
    fn from(rule: ShingleRule) -> Self {
        match rule {
            ShingleRule::Words => RuleRepr::Token("words".to_string()),
            ShingleRule::NGrams { min_n, max_n } => RuleRepr::Range(min_n, max_n),
        }
    }
}
