//! Paper storage: an integer handle mapped to a content blob plus details.
//!
//! Content and details live behind one lock together with the id counter, so
//! an id is allocated and both records are written in a single critical
//! section. Two concurrent `add` calls can never observe the same id.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::PaperError;

pub type PaperId = u32;

/// Metadata record kept for every paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperDetails {
    pub author: String,
    pub title: String,
    pub format: String,
}

/// Identifying metadata returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub paper_id: PaperId,
    pub author: String,
    pub title: String,
    pub format: String,
}

/// A paper submitted for storage; the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaper {
    pub author: String,
    pub title: String,
    pub format: String,
    pub content: Vec<u8>,
}

impl NewPaper {
    /// Rejects papers with blank author, title or format.
    ///
    /// Content may be empty.
    pub fn validate(&self) -> Result<(), PaperError> {
        for (field, value) in [
            ("author", &self.author),
            ("title", &self.title),
            ("format", &self.format),
        ] {
            if value.trim().is_empty() {
                return Err(PaperError::EmptyField { field });
            }
        }
        Ok(())
    }

    pub fn details(&self) -> PaperDetails {
        PaperDetails {
            author: self.author.clone(),
            title: self.title.clone(),
            format: self.format.clone(),
        }
    }
}

struct Papers {
    next_id: PaperId,
    contents: BTreeMap<PaperId, Vec<u8>>,
    details: BTreeMap<PaperId, PaperDetails>,
}

/// Thread-safe paper store. Ids start at 1 and are never reused.
pub struct PaperStore {
    inner: Mutex<Papers>,
}

impl Default for PaperStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Papers {
                next_id: 1,
                contents: BTreeMap::new(),
                details: BTreeMap::new(),
            }),
        }
    }

    /// Stores the paper and returns its freshly allocated id.
    pub fn add(&self, paper: NewPaper) -> PaperId {
        let NewPaper {
            author,
            title,
            format,
            content,
        } = paper;

        let mut papers = self.lock();
        let id = papers.next_id;
        papers.next_id += 1;
        papers.contents.insert(id, content);
        papers.details.insert(
            id,
            PaperDetails {
                author,
                title,
                format,
            },
        );
        id
    }

    pub fn details(&self, id: PaperId) -> Option<PaperDetails> {
        self.lock().details.get(&id).cloned()
    }

    pub fn content(&self, id: PaperId) -> Option<Vec<u8>> {
        self.lock().contents.get(&id).cloned()
    }

    /// Snapshot of every stored paper's metadata, ordered by id.
    pub fn list(&self) -> Vec<PaperSummary> {
        self.lock()
            .details
            .iter()
            .map(|(id, details)| PaperSummary {
                paper_id: *id,
                author: details.author.clone(),
                title: details.title.clone(),
                format: details.format.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Papers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
