//! Column sharding for encoded materialized paths.
//!
//! Backends cap the indexable length of a text column, so the encoded path is cut
//! into `columns` pieces of at most `column_len` bytes. Byte `n` (1-based) of the
//! encoding lives in column `ceil(n / column_len)`. Unused trailing columns hold
//! the empty string, which keeps multi-column equality exact.

use super::MPath;
use crate::error::StorageError;

/// Fixed column geometry for the `mpathN` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MPathLayout {
    columns: usize,
    column_len: usize,
}

impl Default for MPathLayout {
    fn default() -> Self {
        Self {
            columns: 4,
            column_len: 255,
        }
    }
}

/// A SQL boolean fragment over the `mpathN` (and `level`) columns, with its bound
/// parameters in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPredicate {
    pub clause: String,
    pub params: Vec<String>,
}

impl MPathLayout {
    pub fn new(columns: usize, column_len: usize) -> Result<Self, StorageError> {
        if columns == 0 || column_len == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "materialized path layout needs at least one column of non-zero length (got {}x{})",
                columns, column_len
            )));
        }
        Ok(Self {
            columns,
            column_len,
        })
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn column_len(&self) -> usize {
        self.column_len
    }

    /// Longest encoding the layout can hold.
    pub fn capacity(&self) -> usize {
        self.columns * self.column_len
    }

    /// Column index (1-based) holding byte `n` (1-based) of the encoding.
    pub fn column_for_byte(&self, n: usize) -> usize {
        n.div_ceil(self.column_len)
    }

    pub fn column_names(&self) -> Vec<String> {
        (1..=self.columns).map(|i| format!("mpath{}", i)).collect()
    }

    /// Split a path into exactly `columns` values.
    pub fn split(&self, path: &MPath) -> Result<Vec<String>, StorageError> {
        let encoded = path.encode();
        if encoded.len() > self.capacity() {
            return Err(StorageError::InvalidArgument(format!(
                "path too deep: encoding of {} bytes exceeds {} columns of {} bytes",
                encoded.len(),
                self.columns,
                self.column_len
            )));
        }
        let mut out = self.chunks(&encoded);
        out.resize(self.columns, String::new());
        Ok(out)
    }

    /// Rebuild a path from its column values.
    pub fn join<S: AsRef<str>>(&self, values: &[S]) -> Result<MPath, StorageError> {
        let encoded: String = values.iter().map(|v| v.as_ref()).collect();
        MPath::decode(&encoded)
    }

    /// Predicate matching exactly one node.
    pub fn exact(&self, path: &MPath) -> Result<PathPredicate, StorageError> {
        let values = self.split(path)?;
        let clause = self
            .column_names()
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        Ok(PathPredicate {
            clause,
            params: values,
        })
    }

    /// Predicate matching every node strictly below `path`. A path at the
    /// layout's depth limit gets a predicate matching nothing.
    ///
    /// The prefix `encode(path) + "."` is sharded like any other value: columns
    /// it fills completely are compared for equality and the column it ends in is
    /// matched with `LIKE 'chunk%'`. Columns past that are unconstrained.
    pub fn descendants(&self, path: &MPath) -> Result<PathPredicate, StorageError> {
        let prefix = format!("{}.", path.encode());
        if prefix.len() >= self.capacity() {
            // no descendant encoding fits in the columns
            return Ok(PathPredicate {
                clause: "1 = 0".to_string(),
                params: Vec::new(),
            });
        }
        let names = self.column_names();
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (i, chunk) in self.chunks(&prefix).into_iter().enumerate() {
            if chunk.len() == self.column_len {
                clauses.push(format!("{} = ?", names[i]));
                params.push(chunk);
            } else {
                clauses.push(format!("{} LIKE ?", names[i]));
                params.push(format!("{}%", chunk));
            }
        }
        Ok(PathPredicate {
            clause: clauses.join(" AND "),
            params,
        })
    }

    /// Predicate matching the direct children of `path`.
    pub fn children(&self, path: &MPath) -> Result<PathPredicate, StorageError> {
        let mut predicate = self.descendants(path)?;
        predicate.clause = format!("{} AND level = {}", predicate.clause, path.level() + 1);
        Ok(predicate)
    }

    fn chunks(&self, encoded: &str) -> Vec<String> {
        // The encoding is ASCII, so byte chunks are valid UTF-8.
        encoded
            .as_bytes()
            .chunks(self.column_len)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }
}
