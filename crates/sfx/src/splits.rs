//! 🧩 Splits: the units of work a fetcher owns.
//!
//! A split is an id plus whatever the reader needs to find its data. A file path.
//! A range of integers. A partition of something expensive. The fetch loop only
//! cares about the id; the reader cares about the rest.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;

/// 🏷️ Anything with a stable id can be a split.
pub trait SourceSplit: Clone + fmt::Debug + Send + Sync + 'static {
    fn split_id(&self) -> &str;
}

/// 🔄 A change to a reader's assignment, applied on the fetch thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitsChange<S> {
    Addition(Vec<S>),
    Removal(Vec<S>),
}

impl<S> SplitsChange<S> {
    pub fn splits(&self) -> &[S] {
        match self {
            SplitsChange::Addition(splits) | SplitsChange::Removal(splits) => splits,
        }
    }

    /// 🔧 Converts every split, bailing on the first one the converter refuses.
    pub fn try_map<T, F>(self, convert: F) -> Result<SplitsChange<T>>
    where
        F: FnMut(S) -> Result<T>,
    {
        Ok(match self {
            SplitsChange::Addition(splits) => {
                SplitsChange::Addition(splits.into_iter().map(convert).collect::<Result<_>>()?)
            }
            SplitsChange::Removal(splits) => {
                SplitsChange::Removal(splits.into_iter().map(convert).collect::<Result<_>>()?)
            }
        })
    }
}

/// 🔢 A half-open range `[start, end)` of generated integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSplit {
    pub id: String,
    pub start: u64,
    pub end: u64,
}

impl RangeSplit {
    pub fn new(id: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            id: id.into(),
            start,
            end,
        }
    }
}

impl SourceSplit for RangeSplit {
    fn split_id(&self) -> &str {
        &self.id
    }
}

/// 📂 One newline-delimited file, optionally gzipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSplit {
    pub id: String,
    pub path: PathBuf,
}

impl FileSplit {
    /// The path doubles as the id. Two splits for the same file would be a bad time anyway.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
        }
    }
}

impl SourceSplit for FileSplit {
    fn split_id(&self) -> &str {
        &self.id
    }
}

/// 🎭 Every split the built-in readers understand, in one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split {
    Range(RangeSplit),
    File(FileSplit),
}

impl SourceSplit for Split {
    fn split_id(&self) -> &str {
        match self {
            Split::Range(split) => split.split_id(),
            Split::File(split) => split.split_id(),
        }
    }
}
