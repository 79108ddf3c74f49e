//! Streaming binary COPY writer.
//!
//! A [`BinaryCopyWriter`] owns one open `COPY ... FROM STDIN (FORMAT BINARY)`
//! stream bound to a single table and encodes rows in strict column order.
//! Access is serialized by an internal mutex, so multiple logical producers
//! can drive one writer without interleaving row frames; the gate is held for
//! the duration of one row's encoding.
//!
//! Nothing is materialized on the server until [`BinaryCopyWriter::complete`]
//! runs. Dropping an uncompleted writer drops the sink, which aborts the copy
//! and discards every row already sent.

use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_postgres::{Client, CopyInSink};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BulkError, Result};
use crate::metadata::ColumnDescriptor;
use crate::sqlgen;
use crate::value::SqlValue;

/// PGCOPY binary header: signature, flags word, extension area length.
const COPY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

/// Encoded bytes accumulate until the buffer crosses this threshold, then a
/// chunk is handed to the sink. Keeps memory bounded on large collections.
const FLUSH_THRESHOLD: usize = 64 * 1024;

/// A single-table binary COPY stream with a single-writer discipline.
pub struct BinaryCopyWriter<'d, T> {
    columns: &'d [ColumnDescriptor<T>],
    table: String,
    inner: Mutex<WriterInner>,
}

struct WriterInner {
    sink: Pin<Box<CopyInSink<Bytes>>>,
    buf: BytesMut,
    rows_written: u64,
    completed: bool,
}

impl<'d, T> BinaryCopyWriter<'d, T> {
    /// Bind a writer to a live COPY stream on `table`.
    ///
    /// The column order fixed here is the order every subsequent row is
    /// encoded in; it must match the order used for the finalize DML.
    pub async fn open(
        client: &Client,
        table: &str,
        columns: &'d [ColumnDescriptor<T>],
    ) -> Result<Self> {
        let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
        let statement = sqlgen::copy_in_statement(table, &names)?;

        let sink: CopyInSink<Bytes> = client.copy_in(statement.as_str()).await.map_err(|e| {
            BulkError::connection(e.to_string(), format!("opening COPY stream to {}", table))
        })?;

        let mut buf = BytesMut::with_capacity(FLUSH_THRESHOLD + 1024);
        put_copy_header(&mut buf);

        debug!(table = %table, columns = names.len(), "opened binary COPY stream");

        Ok(Self {
            columns,
            table: table.to_string(),
            inner: Mutex::new(WriterInner {
                sink: Box::pin(sink),
                buf,
                rows_written: 0,
                completed: false,
            }),
        })
    }

    /// Encode one entity as a row, applying each column accessor in order.
    ///
    /// Returns the number of rows written to the stream so far.
    pub async fn write_row(&self, entity: &T) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;

        inner.buf.put_i16(self.columns.len() as i16);
        for column in self.columns {
            column.value_of(entity).encode(&mut inner.buf);
        }
        inner.rows_written += 1;

        self.flush_if_full(&mut inner).await?;
        Ok(inner.rows_written)
    }

    /// Write one row from pre-extracted values, bypassing accessor lookup.
    ///
    /// The values must already be in column order and match the bound column
    /// count.
    pub async fn write_values(&self, values: &[SqlValue]) -> Result<u64> {
        if values.len() != self.columns.len() {
            return Err(BulkError::Validation(format!(
                "row has {} values but table {} is bound to {} columns",
                values.len(),
                self.table,
                self.columns.len()
            )));
        }

        let mut inner = self.inner.lock().await;
        inner.check_open()?;

        put_row_values(&mut inner.buf, values);
        inner.rows_written += 1;

        self.flush_if_full(&mut inner).await?;
        Ok(inner.rows_written)
    }

    /// Write every entity in the sequence, checking the cancellation signal
    /// before each row (never mid-row). Returns the rows written so far.
    ///
    /// On cancellation the rows already sent stay in the uncommitted stream;
    /// they are discarded because `complete` is never called on that path.
    pub async fn write_rows<'a, I>(&self, entities: I, cancel: &CancellationToken) -> Result<u64>
    where
        T: 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut written = 0;
        for entity in entities {
            if cancel.is_cancelled() {
                return Err(BulkError::Cancelled);
            }
            written = self.write_row(entity).await?;
        }
        Ok(written)
    }

    /// Finalize the stream; the server materializes all rows and reports the
    /// count. May be called at most once; later writes fail with
    /// `InvalidState`.
    pub async fn complete(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        inner.completed = true;

        inner.buf.put_i16(-1);
        let data = inner.buf.split().freeze();
        inner
            .sink
            .send(data)
            .await
            .map_err(|e| BulkError::from_copy(&self.table, e))?;

        let count = inner
            .sink
            .as_mut()
            .finish()
            .await
            .map_err(|e| BulkError::from_copy(&self.table, e))?;

        debug!(table = %self.table, rows = count, "binary COPY completed");
        Ok(count)
    }

    /// Rows written to the stream so far.
    pub async fn rows_written(&self) -> u64 {
        self.inner.lock().await.rows_written
    }

    async fn flush_if_full(&self, inner: &mut WriterInner) -> Result<()> {
        if inner.buf.len() >= FLUSH_THRESHOLD {
            let chunk = inner.buf.split().freeze();
            inner
                .sink
                .send(chunk)
                .await
                .map_err(|e| BulkError::from_copy(&self.table, e))?;
        }
        Ok(())
    }
}

impl WriterInner {
    fn check_open(&self) -> Result<()> {
        if self.completed {
            return Err(BulkError::InvalidState("writer already completed"));
        }
        Ok(())
    }
}

/// Signature, flags word, and extension area length.
fn put_copy_header(buf: &mut BytesMut) {
    buf.put_slice(COPY_SIGNATURE);
    buf.put_i32(0);
    buf.put_i32(0);
}

/// One row frame: column count, then each value's length-prefixed encoding.
fn put_row_values(buf: &mut BytesMut, values: &[SqlValue]) {
    buf.put_i16(values.len() as i16);
    for value in values {
        value.encode(buf);
    }
}
