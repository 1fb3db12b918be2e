//! Full-text index over declared text fields.
//!
//! The index keeps term → document-id postings for the declared fields
//! (`title` by default). It is owned by the store and updated under the
//! store's write lock, so it is always consistent with the collection.
//!
//! # Tokenizer
//!
//! Text is lowercased, decomposed (NFD) with combining marks dropped, and
//! split on every non-alphanumeric character. `"Ångström Notes"` yields the
//! terms `angstrom` and `notes`.

use crate::{Document, RecordId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Fields indexed when no explicit set is declared.
pub const DEFAULT_INDEXED_FIELDS: &[&str] = &["title"];

/// Split text into folded search terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Prefix-searchable inverted index.
#[derive(Debug, Clone)]
pub struct FullTextIndex {
    fields: Vec<String>,
    postings: BTreeMap<String, BTreeSet<RecordId>>,
    terms: HashMap<RecordId, BTreeSet<String>>,
}

impl Default for FullTextIndex {
    fn default() -> Self {
        Self::new(DEFAULT_INDEXED_FIELDS.iter().copied())
    }
}

impl FullTextIndex {
    /// Create an empty index over the given fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            postings: BTreeMap::new(),
            terms: HashMap::new(),
        }
    }

    /// The indexed field names.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Replace the postings of a document with its current terms.
    ///
    /// Tombstones end up with no postings.
    pub fn reindex(&mut self, document: &Document) {
        self.remove(&document.id);
        if document.deleted {
            return;
        }

        let mut terms = BTreeSet::new();
        for field in &self.fields {
            if let Some(text) = document.str_field(field) {
                terms.extend(tokenize(text));
            }
        }
        if terms.is_empty() {
            return;
        }

        for term in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(document.id.clone());
        }
        self.terms.insert(document.id.clone(), terms);
    }

    /// Remove every posting of a document.
    pub fn remove(&mut self, id: &str) {
        let Some(terms) = self.terms.remove(id) else {
            return;
        };
        for term in terms {
            if let Some(ids) = self.postings.get_mut(&term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    /// Drop all postings and index the given documents.
    pub fn rebuild<'a>(&mut self, documents: impl IntoIterator<Item = &'a Document>) {
        self.postings.clear();
        self.terms.clear();
        for document in documents {
            self.reindex(document);
        }
    }

    /// Documents with a term starting with every token of `query`.
    ///
    /// A query without tokens matches nothing.
    pub fn search(&self, query: &str) -> BTreeSet<RecordId> {
        let mut result: Option<BTreeSet<RecordId>> = None;

        for token in tokenize(query) {
            let matches = self.prefix_matches(&token);
            result = Some(match result {
                Some(acc) => acc.intersection(&matches).cloned().collect(),
                None => matches,
            });
            if result.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }

        result.unwrap_or_default()
    }

    fn prefix_matches(&self, prefix: &str) -> BTreeSet<RecordId> {
        self.postings
            .range(prefix.to_owned()..)
            .take_while(|(term, _)| term.starts_with(prefix))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Terms currently indexed for a document.
    pub fn terms_for(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.terms.get(id)
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }
}
