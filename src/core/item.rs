use serde_json::Value;

use crate::{BatchError, core::context::ExecutionContext};

/// Result of reading one item: `Ok(None)` once the source is exhausted.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out of the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of writing one chunk.
pub type ItemWriterResult = Result<(), BatchError>;

/// An ordered, resumable and finite supply of items.
///
/// Readers take `&self` and keep their cursor in `Cell`/`RefCell`, so a step
/// can borrow them for its whole lifetime.
///
/// # Restart
///
/// A reader that can resume implements [`current_position`](ItemReader::current_position)
/// and restores itself in [`open`](ItemReader::open) from
/// [`ExecutionContext::restart_position`]. The token is opaque to the engine:
/// it is only stored at commit time and handed back on the next run.
pub trait ItemReader<I> {
    /// Prepares the reader, resuming from the context's restart position if present.
    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Reads the next item, `Ok(None)` signalling exhaustion.
    fn read(&self) -> ItemReaderResult<I>;

    /// Position right after the last item returned by [`read`](ItemReader::read).
    fn current_position(&self) -> Option<Value> {
        None
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Per-item transformation applied between read and write.
///
/// Implementations must not keep state across items: a chunk may be
/// processed again after a rollback.
pub trait ItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

impl<I, O, F> ItemProcessor<I, O> for F
where
    F: Fn(&I) -> ItemProcessorResult<O>,
{
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        self(item)
    }
}

/// Bulk consumer of a whole chunk.
///
/// `write` followed by `flush` forms the commit of a chunk. Both may be called
/// again with the same items after a failure, so sinks should either be
/// idempotent or roll back their own partial work.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

impl<O, F> ItemWriter<O> for F
where
    F: Fn(&[O]) -> ItemWriterResult,
{
    fn write(&self, items: &[O]) -> ItemWriterResult {
        self(items)
    }
}

/// Processor returning a clone of its input.
#[derive(Default, Debug, Clone, Copy)]
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}
