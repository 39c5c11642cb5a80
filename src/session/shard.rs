//! Per-rank data shards.
//!
//! Every worker trains on its own shard of the data set. The shards are numbered from one and
//! named after the data set: the shard of rank `0` of `data/train.csv` is `data/train_1.csv`.
//! A shard is a comma separated file of numbers with the label in the first column.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use displaydoc::Display;
use thiserror::Error;

use crate::session::DataMatrix;

/// Error that occurs while loading a shard.
#[derive(Debug, Display, Error)]
pub enum ShardError {
    /// failed to read shard {path:?}: {source}
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// invalid value {value:?} in column {column} on line {line} of shard {path:?}
    InvalidValue {
        path: PathBuf,
        line: usize,
        column: usize,
        value: String,
    },
    /// line {line} of shard {path:?} has {found} columns, expected {expected}
    Ragged {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    /// shard {path:?} does not contain any rows
    Empty { path: PathBuf },
}

/// Derives the path of the shard of `rank` from the path of the data set.
pub fn shard_path(base: impl AsRef<Path>, rank: u32) -> PathBuf {
    let base = base.as_ref();
    let mut name = base
        .file_stem()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(format!("_{}", rank + 1));
    if let Some(extension) = base.extension() {
        name.push(".");
        name.push(extension);
    }
    base.with_file_name(name)
}

/// Parses the rows of a shard, `path` only names the shard in errors.
pub fn parse_shard(path: &Path, text: &str) -> Result<DataMatrix, ShardError> {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut expected = None;

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let values = line
            .split(',')
            .enumerate()
            .map(|(column, value)| {
                value
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| ShardError::InvalidValue {
                        path: path.to_path_buf(),
                        line: i + 1,
                        column: column + 1,
                        value: value.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let columns = *expected.get_or_insert(values.len());
        if values.len() != columns {
            return Err(ShardError::Ragged {
                path: path.to_path_buf(),
                line: i + 1,
                expected: columns,
                found: values.len(),
            });
        }

        let mut values = values.into_iter();
        // a line is never empty here, so there is always a label
        labels.extend(values.next());
        rows.push(values.collect());
    }

    if rows.is_empty() {
        return Err(ShardError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(DataMatrix::new(rows, labels))
}

/// Reads and parses the shard of `rank` of the data set at `base`.
pub fn load_shard(base: impl AsRef<Path>, rank: u32) -> Result<DataMatrix, ShardError> {
    let path = shard_path(base, rank);
    let text = std::fs::read_to_string(&path).map_err(|source| ShardError::Io {
        path: path.clone(),
        source,
    })?;
    parse_shard(&path, &text)
}
