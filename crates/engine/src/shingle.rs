//! Shingle extraction
//!
//! Pipeline per configured field: apply each rule in order, concatenate the
//! outputs of every field, then sort by `(char length, lexical)`. The sort
//! order is part of the contract: identical input always yields an identical
//! sequence.

use neardup_core::{Error, Record, Result, ShingleConfig, ShingleRule};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Turns tagged text fields into an ordered shingle sequence.
///
/// Serialized with the corpus so stored signatures stay tied to the rules
/// that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShingleExtractor {
    rules: BTreeMap<String, Vec<ShingleRule>>,
    unique: bool,
    case_sensitive: bool,
}

impl ShingleExtractor {
    /// Build an extractor from a validated config.
    pub fn new(config: &ShingleConfig) -> Result<Self> {
        config.validate()?;
        Ok(ShingleExtractor {
            rules: config.fields.clone(),
            unique: config.unique,
            case_sensitive: config.case_sensitive,
        })
    }

    /// Field names this extractor reads.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Shingle a set of named text fields.
    ///
    /// Fields present in `fields` but not configured are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if a configured field is missing. Nothing is
    /// produced in that case.
    pub fn create_shingles<S: AsRef<str>>(&self, fields: &BTreeMap<&str, S>) -> Result<Vec<String>> {
        let mut texts = Vec::with_capacity(self.rules.len());
        for (name, rules) in &self.rules {
            let text = fields.get(name.as_str()).ok_or_else(|| {
                Error::configuration(
                    format!("shingles.fields.{}", name),
                    format!("field '{}' is configured but missing from the input", name),
                )
            })?;
            texts.push((text.as_ref(), rules));
        }

        let mut shingles = Vec::new();
        for (text, rules) in texts {
            for rule in rules {
                match *rule {
                    ShingleRule::Words => shingles.extend(self.words(text)),
                    ShingleRule::NGrams { min_n, max_n } => {
                        shingles.extend(self.ngrams(text, min_n, max_n))
                    }
                }
            }
        }

        sort_shingles(&mut shingles);
        if self.unique {
            shingles.dedup();
        }
        Ok(shingles)
    }

    /// Shingle a record through its [`Record::shingle_fields`] view.
    pub fn shingle_record(&self, record: &Record) -> Result<Vec<String>> {
        self.create_shingles(&record.shingle_fields())
    }

    fn fold<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.case_sensitive {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(text.to_lowercase())
        }
    }

    fn words(&self, text: &str) -> Vec<String> {
        let text = self.fold(text);
        let tokens = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self.maybe_unique(tokens)
    }

    fn ngrams(&self, text: &str, min_n: usize, max_n: usize) -> Vec<String> {
        let text = self.fold(text);
        let chars: Vec<char> = text.chars().collect();
        let grams = (min_n.max(1)..=max_n)
            .flat_map(|n| chars.windows(n).map(|w| w.iter().collect::<String>()));
        self.maybe_unique(grams)
    }

    fn maybe_unique(&self, shingles: impl Iterator<Item = String>) -> Vec<String> {
        if !self.unique {
            return shingles.collect();
        }
        let mut seen = FxHashSet::default();
        shingles.filter(|s| seen.insert(s.clone())).collect()
    }
}

/// Sort ascending by `(char length, lexical value)`.
pub fn sort_shingles(shingles: &mut [String]) {
    shingles.sort_by(|a, b| {
        a.chars()
            .count()
            .cmp(&b.chars().count())
            .then_with(|| a.cmp(b))
    });
}
