use std::ops::Range;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, Debug)]
pub struct Span {
    offs: usize,
    len: usize,
}

impl Span {
    pub fn new(offs: usize, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn offs(&self) -> usize {
        self.offs
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn end(&self) -> usize {
        self.offs + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offs..self.end()
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

/// Label name along with where it was written.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Label {
    pub name: String,
    pub span: Span,
}

impl Label {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Label {
            name: name.into(),
            span,
        }
    }
}

/// Label name -> absolute byte address within the emitted code.
///
/// Insertion order is kept so that listings are stable between runs.
#[derive(Debug, Default)]
pub struct SymbolTable(FxMap<String, usize>);

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable(IndexMap::with_hasher(FxBuildHasher::default()))
    }

    /// Bind `name` to `addr`. Returns the previously bound address if the label was already taken,
    /// leaving the table unchanged.
    pub fn insert(&mut self, name: &str, addr: usize) -> Result<(), usize> {
        if let Some(&prev) = self.0.get(name) {
            return Err(prev);
        }
        self.0.insert(name.to_owned(), addr);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}
