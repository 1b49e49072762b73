//! Driver that pulls reads from a feed and folds their evidence into a sink.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::checkpoint::{
    CheckpointCoordinator, CheckpointError, CheckpointHandle, CheckpointOutcome, DriverLink,
};
use crate::genomics::{EvidenceExtractor, FeedError, ReadMessage, ReferenceWindow};
use crate::store::{LocusSink, StoreError};

/// Default number of reads between progress log lines.
pub const DEFAULT_LOG_EVERY: u64 = 10_000;

/// Counters reported by [`StreamConsumer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Reads that produced evidence (possibly none, if outside the window).
    pub reads_processed: u64,
    /// Malformed reads that were logged and dropped.
    pub reads_skipped: u64,
    /// Evidence tuples handed to the sink.
    pub evidence_recorded: u64,
    /// `New` messages sent to the checkpoint coordinator.
    pub notifications_sent: u64,
}

/// Consumes read messages one at a time.
///
/// When a checkpoint link is attached, every read first polls for `Saved`
/// and then reports new data; the link itself debounces repeated reports.
#[derive(Debug)]
pub struct StreamConsumer<'w, S> {
    sink: S,
    window: &'w ReferenceWindow,
    link: Option<DriverLink>,
    stats: ConsumerStats,
    log_every: u64,
    started: Instant,
}

impl<'w, S: LocusSink> StreamConsumer<'w, S> {
    /// Create a consumer with no checkpoint link.
    pub fn new(sink: S, window: &'w ReferenceWindow) -> Self {
        Self {
            sink,
            window,
            link: None,
            stats: ConsumerStats::default(),
            log_every: DEFAULT_LOG_EVERY,
            started: Instant::now(),
        }
    }

    /// Attach the driver end of a checkpoint channel.
    pub fn with_checkpoint_link(mut self, link: DriverLink) -> Self {
        self.link = Some(link);
        self
    }

    /// Log progress every `log_every` reads (0 disables progress lines).
    pub fn with_log_every(mut self, log_every: u64) -> Self {
        self.log_every = log_every;
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give the sink back.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn handshake(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if link.poll_ack() {
                debug!("checkpoint acknowledged");
            }
            if link.notify() {
                self.stats.notifications_sent += 1;
            }
        }
    }

    /// Process one read. Malformed reads are logged and skipped; only sink
    /// failures are returned.
    pub fn process(&mut self, read: &ReadMessage) -> Result<(), StoreError> {
        self.handshake();

        match EvidenceExtractor::new(read, self.window) {
            Ok(extractor) => {
                for evidence in extractor {
                    self.sink.record(&evidence)?;
                    self.stats.evidence_recorded += 1;
                }
                self.stats.reads_processed += 1;
            }
            Err(err) => {
                warn!(
                    pos = read.alignment_start,
                    cigar = %read.cigar_string(),
                    error = %err,
                    "skipping malformed read"
                );
                self.stats.reads_skipped += 1;
            }
        }
        self.sink.end_read()?;

        let seen = self.stats.reads_processed + self.stats.reads_skipped;
        if self.log_every > 0 && seen % self.log_every == 0 {
            info!(
                reads = seen,
                skipped = self.stats.reads_skipped,
                evidence = self.stats.evidence_recorded,
                elapsed = ?self.started.elapsed(),
                "stream progress"
            );
        }
        Ok(())
    }

    /// Process every read the feed yields, then [`StreamConsumer::finish`].
    pub fn run<I>(&mut self, feed: I) -> Result<ConsumerStats, StoreError>
    where
        I: IntoIterator<Item = ReadMessage>,
    {
        for read in feed {
            self.process(&read)?;
        }
        self.finish()
    }

    /// Flush the sink and report the tail batch to the coordinator.
    pub fn finish(&mut self) -> Result<ConsumerStats, StoreError> {
        self.sink.flush()?;
        self.handshake();
        info!(
            processed = self.stats.reads_processed,
            skipped = self.stats.reads_skipped,
            evidence = self.stats.evidence_recorded,
            notifications = self.stats.notifications_sent,
            elapsed = ?self.started.elapsed(),
            "stream finished"
        );
        Ok(self.stats)
    }
}

/// Adapts a raw feed into read messages.
///
/// Undecodable messages are logged and dropped. The first reader failure
/// ends iteration and is kept for [`DecodedReads::into_failure`].
#[derive(Debug)]
pub struct DecodedReads<I> {
    feed: I,
    undecodable: u64,
    failure: Option<FeedError>,
}

impl<I> DecodedReads<I>
where
    I: Iterator<Item = Result<ReadMessage, FeedError>>,
{
    /// Wrap a feed.
    pub fn new(feed: I) -> Self {
        Self {
            feed,
            undecodable: 0,
            failure: None,
        }
    }

    /// Messages dropped because they did not decode.
    pub fn undecodable(&self) -> u64 {
        self.undecodable
    }

    /// Reader failure that ended the stream early, if any.
    pub fn failure(&self) -> Option<&FeedError> {
        self.failure.as_ref()
    }

    /// Take the reader failure that ended the stream early, if any.
    pub fn into_failure(self) -> Option<FeedError> {
        self.failure
    }
}

impl<I> Iterator for DecodedReads<I>
where
    I: Iterator<Item = Result<ReadMessage, FeedError>>,
{
    type Item = ReadMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failure.is_some() {
            return None;
        }
        loop {
            match self.feed.next()? {
                Ok(read) => return Some(read),
                Err(err @ FeedError::Json { .. }) => {
                    warn!(error = %err, "dropping undecodable read message");
                    self.undecodable += 1;
                }
                Err(err) => {
                    error!(error = %err, "read feed failed; ending stream");
                    self.failure = Some(err);
                    return None;
                }
            }
        }
    }
}

/// Everything a checkpointed run produced.
#[derive(Debug)]
pub struct CheckpointedRun<S> {
    /// Consumer result; an error means the stream stopped early.
    pub stream: Result<ConsumerStats, StoreError>,
    /// Coordinator after its final snapshot.
    pub coordinator: CheckpointCoordinator<S>,
    /// Outcome of the final snapshot.
    pub last: Result<CheckpointOutcome, CheckpointError>,
}

/// Drain `reads` through `consumer`, then stop the coordinator behind
/// `handle`. The final snapshot is taken whether or not the stream failed.
pub fn run_with_checkpoints<K, S, I>(
    consumer: &mut StreamConsumer<'_, K>,
    handle: CheckpointHandle<S>,
    reads: I,
) -> Result<CheckpointedRun<S>, CheckpointError>
where
    K: LocusSink,
    I: IntoIterator<Item = ReadMessage>,
{
    let stream = consumer.run(reads);
    if let Err(err) = &stream {
        error!(error = %err, "stream failed; writing final checkpoint before exit");
    }
    let (coordinator, last) = handle.shutdown()?;
    Ok(CheckpointedRun {
        stream,
        coordinator,
        last,
    })
}
