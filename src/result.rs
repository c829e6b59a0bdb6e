//! Lazy, single-pass results.
//!
//! A statement's records arrive while the stream is polled; nothing is
//! buffered ahead. Dropping a stream before its trailing summary marks the
//! borrowed connection drain-required, and the pool issues RESET before the
//! connection is reused.

use crate::bolt::connection::BoltConnection;
use crate::bolt::message::Response;
use crate::errors::Result;
use crate::packstream::{Value, ValueMap};
use std::sync::Arc;

/// One row of a result, paired with the statement's field names.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(fields: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { fields, values }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value under the projected name, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        let idx = self.fields.iter().position(|f| f == field)?;
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// The summary closing a result stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub metadata: ValueMap,
}

impl Summary {
    /// Statement type reported by the server: `r`, `w`, `rw`, or `s`.
    pub fn query_type(&self) -> Option<&str> {
        self.metadata.get("type").and_then(Value::as_str)
    }

    pub fn bookmark(&self) -> Option<&str> {
        self.metadata.get("bookmark").and_then(Value::as_str)
    }

    /// Update counters as reported under `stats`.
    pub fn stats(&self) -> Option<&ValueMap> {
        self.metadata.get("stats").and_then(Value::as_map)
    }
}

/// Single-pass record iterator over one borrowed connection.
pub struct RecordStream<'c> {
    conn: &'c mut BoltConnection,
    fields: Arc<Vec<String>>,
    summary: Option<Summary>,
    finished: bool,
}

impl<'c> RecordStream<'c> {
    pub(crate) fn new(conn: &'c mut BoltConnection, fields: Vec<String>) -> Self {
        Self {
            conn,
            fields: Arc::new(fields),
            summary: None,
            finished: false,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The next record, or `None` once the trailing summary has arrived.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.finished {
            return Ok(None);
        }
        let response = match self.conn.recv().await {
            Ok(response) => response,
            Err(e) => {
                // The stream is unusable after an error; the pool will
                // reset or discard the connection on release.
                self.finished = true;
                return Err(e);
            }
        };
        match response {
            Response::Record(values) => Ok(Some(Record::new(self.fields.clone(), values))),
            summary => {
                self.finished = true;
                let meta = self.conn.expect_success(summary)?;
                if let Some(bookmark) = meta.get("bookmark").and_then(Value::as_str) {
                    self.conn.note_bookmark(bookmark.to_owned());
                }
                self.summary = Some(Summary { metadata: meta });
                Ok(None)
            }
        }
    }

    /// Drain the remainder and return the summary.
    pub async fn consume(mut self) -> Result<Summary> {
        while self.next().await?.is_some() {}
        self.take_summary()
    }

    /// Eagerly materialize all records plus the summary. A convenience on
    /// top of the lazy contract, not the contract itself.
    pub async fn collect(mut self) -> Result<(Vec<Record>, Summary)> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        let summary = self.take_summary()?;
        Ok((records, summary))
    }

    /// Available once the stream has been fully consumed via `next`.
    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    fn take_summary(&mut self) -> Result<Summary> {
        self.summary.take().ok_or(crate::errors::Error::Cancelled)
    }
}

impl Drop for RecordStream<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Unconsumed server-side cursor: force an implicit discard via
            // RESET when the connection is reclaimed.
            self.conn.mark_drain_required();
        }
    }
}
