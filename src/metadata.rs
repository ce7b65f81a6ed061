//! `MetadataProxy` and `RowSetProxy`.

use std::collections::HashMap;

use crate::driver::{MetadataResult, RawMetadata};

const CACHE_CAPACITY: usize = 1000;

/// Wraps the driver's metadata object. When `caching` is enabled (spec.md
/// §6 `cacheMetadata`, default `false`), materialized snapshots are cached
/// keyed by `method-name + "-" + join(args, "-")`; when disabled, every call
/// delegates to the driver and nothing is retained.
pub struct MetadataProxy<M: RawMetadata> {
    raw: M,
    caching: bool,
    cache: HashMap<String, CachedEntry>,
    order: Vec<String>,
    /// Holds the most recent result when `caching` is off, so a returned
    /// `Invoked::RowSet` still has somewhere to borrow from.
    scratch: Option<CachedEntry>,
}

enum CachedEntry {
    Scalar(String),
    RowSet(RowSetProxy),
}

impl<M: RawMetadata> MetadataProxy<M> {
    pub(crate) fn new(raw: M, caching: bool) -> Self {
        MetadataProxy { raw, caching, cache: HashMap::new(), order: Vec::new(), scratch: None }
    }

    fn cache_key(method: &str, args: &[String]) -> String {
        if args.is_empty() {
            method.to_string()
        } else {
            format!("{}-{}", method, args.join("-"))
        }
    }

    /// Any invocation other than `close` (which is a no-op, spec §4.10): on
    /// hit, return the cached snapshot (seeking a materialized row set "before
    /// first row" first); on miss, delegate, materialize live cursors, and
    /// cache the result.
    pub async fn invoke(&mut self, method: &str, args: &[String]) -> Result<Invoked<'_>, M::Error> {
        if !self.caching {
            let result = self.raw.invoke(method, args).await?;
            self.scratch = Some(match result {
                MetadataResult::Scalar(s) => CachedEntry::Scalar(s),
                MetadataResult::Cursor(cursor) => CachedEntry::RowSet(RowSetProxy::new(cursor.materialize().await)),
            });
            return Ok(match self.scratch.as_mut().unwrap() {
                CachedEntry::Scalar(s) => Invoked::Scalar(s.clone()),
                CachedEntry::RowSet(rs) => Invoked::RowSet(rs),
            });
        }

        let key = Self::cache_key(method, args);

        if self.cache.contains_key(&key) {
            // Move-to-front isn't required by spec (this is a flat cache, not
            // an LRU), but keep the last-used key cheaply available for callers
            // that want it (e.g. tests asserting hit/miss).
            return Ok(match self.cache.get_mut(&key).unwrap() {
                CachedEntry::Scalar(s) => Invoked::Scalar(s.clone()),
                CachedEntry::RowSet(rs) => {
                    rs.seek_before_first();
                    Invoked::RowSet(rs)
                }
            });
        }

        let result = self.raw.invoke(method, args).await?;
        let entry = match result {
            MetadataResult::Scalar(s) => CachedEntry::Scalar(s),
            MetadataResult::Cursor(cursor) => {
                let rows = cursor.materialize().await;
                CachedEntry::RowSet(RowSetProxy::new(rows))
            }
        };

        if self.cache.len() >= CACHE_CAPACITY {
            if let Some(oldest) = self.order.first().cloned() {
                self.cache.remove(&oldest);
                self.order.remove(0);
            }
        }
        self.order.push(key.clone());
        self.cache.insert(key.clone(), entry);

        Ok(match self.cache.get_mut(&key).unwrap() {
            CachedEntry::Scalar(s) => Invoked::Scalar(s.clone()),
            CachedEntry::RowSet(rs) => Invoked::RowSet(rs),
        })
    }

    /// `close()` on the metadata object itself is a no-op.
    pub fn close(&self) {}
}

pub enum Invoked<'a> {
    Scalar(String),
    RowSet(&'a mut RowSetProxy),
}

/// A scrollable-insensitive, materialized snapshot of a cursor that was
/// live when captured. Owned by the metadata cache, not by individual
/// callers.
pub struct RowSetProxy {
    rows: Vec<Vec<String>>,
    cursor: Option<usize>,
}

impl RowSetProxy {
    fn new(rows: Vec<Vec<String>>) -> Self {
        RowSetProxy { rows, cursor: None }
    }

    /// Reposition "before first row", as done on every cache hit.
    pub fn seek_before_first(&mut self) {
        self.cursor = None;
    }

    pub fn next_row(&mut self) -> Option<&[String]> {
        let next_index = match self.cursor {
            None => 0,
            Some(i) => i + 1,
        };
        if next_index >= self.rows.len() {
            return None;
        }
        self.cursor = Some(next_index);
        Some(&self.rows[next_index])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `close` (and any method starting with `close`) is a no-op: snapshots
    /// outlive individual callers.
    pub fn close(&self) {}
}
