//! Asynchronous CSV reader with batch interface
//!
//! Streams intent records from a CSV source and hands them out in batches, so
//! arbitrarily long replay files never have to fit in memory.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of Intents
//!                  ↓
//!           csv_format module
//!           (IntentRecord, convert_intent_record)
//! ```
//!
//! Rows that fail to parse or convert are logged with their line number and
//! skipped.

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

use crate::io::csv_format::{convert_intent_record, Intent, IntentRecord};

/// Batched reader of replay intents
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    /// Data rows consumed so far (the header is line 1)
    rows: u64,
    /// Rows skipped as invalid
    skipped: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a reader over `reader`
    ///
    /// Fields are trimmed and rows may omit trailing columns.
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            rows: 0,
            skipped: 0,
        }
    }

    /// Read up to `batch_size` valid intents
    ///
    /// Returns an empty batch once the input is exhausted.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<Intent> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<IntentRecord>();

        while batch.len() < batch_size {
            let Some(next) = records.next().await else {
                break;
            };
            self.rows += 1;
            let line = self.rows + 1;

            match next {
                Ok(record) => match convert_intent_record(record) {
                    Ok(intent) => batch.push(intent),
                    Err(e) => {
                        self.skipped += 1;
                        warn!(line, error = %e, "skipping invalid intent");
                    }
                },
                Err(e) => {
                    self.skipped += 1;
                    warn!(line, error = %e, "skipping unparsable row");
                }
            }
        }

        batch
    }

    /// Number of rows skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
