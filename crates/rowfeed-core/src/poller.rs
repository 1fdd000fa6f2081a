//! Change-feed poller.
//!
//! One call to [`ChangeFeedPoller::run_tick`] runs two flows in order:
//!
//! 1. Arrivals: fetch records newer than the cursor (or newer than the
//!    lag-shifted `after` before a baseline exists), advance the cursor to the
//!    first, newest, record and deliver one `Arrived` event per record.
//! 2. Mutations: unless mutation detection is unsupported, fetch records
//!    touched inside the trailing mutation window, classify them and deliver
//!    the `Edited` / `Retracted` ones.
//!
//! The poller owns no timer. Retry policy belongs to whoever calls
//! `run_tick`: a source failure aborts the tick and is returned as-is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::classifier::ChangeClassifier;
use crate::config::{DeliveryMode, PollerConfig};
use crate::cursor::CursorState;
use crate::dedup::{Admission, MutationLedger};
use crate::error::{Error, Flow};
use crate::record::{ChangeEvent, ChangeKind};
use crate::source::{RecordSource, SharedSubscriber};
use crate::stats::PollerStats;
use crate::window::PollWindow;

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Records returned by the source across both feeds.
    pub fetched: usize,
    /// `Arrived` events offered to the subscriber.
    pub arrived: usize,
    /// `Edited` events offered to the subscriber.
    pub edited: usize,
    /// `Retracted` events offered to the subscriber.
    pub retracted: usize,
    /// Mutation rows without an edit or retraction timestamp.
    pub dropped: usize,
    /// Rows suppressed because they were already delivered.
    pub duplicates: usize,
    /// Sequential deliveries the subscriber rejected.
    pub delivery_failures: usize,
    /// Whether the mutation flow was skipped for lack of capability.
    pub mutations_skipped: bool,
}

impl TickReport {
    /// Total events offered to the subscriber, rejected ones included.
    pub fn emitted(&self) -> usize {
        self.arrived + self.edited + self.retracted
    }

    fn count(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Arrived => self.arrived += 1,
            ChangeKind::Edited => self.edited += 1,
            ChangeKind::Retracted => self.retracted += 1,
        }
    }
}

/// Polls a [`RecordSource`] and forwards change events to a subscriber.
pub struct ChangeFeedPoller<S> {
    source: S,
    subscriber: SharedSubscriber,
    config: PollerConfig,
    cursor: CursorState,
    classifier: ChangeClassifier,
    ledger: Option<Arc<MutationLedger>>,
    stats: Arc<PollerStats>,
}

impl<S: RecordSource> ChangeFeedPoller<S> {
    /// Create a poller.
    pub fn new(source: S, subscriber: SharedSubscriber, config: PollerConfig) -> Result<Self, Error> {
        config.validate()?;

        let cursor = CursorState::with_baseline(config.poll_interval, config.initial_row_id);
        let ledger = config.dedup_mutations.then(|| Arc::new(MutationLedger::new()));

        Ok(Self {
            source,
            subscriber,
            config,
            cursor,
            classifier: ChangeClassifier::new(),
            ledger,
            stats: Arc::new(PollerStats::new()),
        })
    }

    /// Run one tick over `[after, before)`.
    ///
    /// On a source failure the error is returned, events already delivered
    /// stay delivered and the cursor keeps whatever value it had reached.
    pub async fn run_tick(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<TickReport, Error> {
        let mut report = TickReport::default();

        let result = async {
            self.emit_arrivals(after, before, &mut report).await?;
            self.emit_mutations(after, before, &mut report).await
        }
        .await;

        match result {
            Ok(()) => {
                self.stats.record_tick(&report);
                debug!(
                    %after,
                    %before,
                    last_row_id = self.cursor.last_row_id(),
                    arrived = report.arrived,
                    edited = report.edited,
                    retracted = report.retracted,
                    dropped = report.dropped,
                    duplicates = report.duplicates,
                    "tick complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.stats.record_failure();
                debug!(error = %e, "tick aborted");
                Err(e)
            }
        }
    }

    async fn emit_arrivals(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), Error> {
        let window = PollWindow::for_arrivals(
            after,
            before,
            self.cursor.last_row_id(),
            self.config.direction,
            self.config.propagation_lag,
        );

        let mut records = self
            .source
            .fetch_since(&window.filter)
            .await
            .map_err(|source| Error::SourceUnavailable {
                flow: Flow::Arrivals,
                source,
            })?;
        report.fetched += records.len();

        // A source that ignores the row-id predicate must not cause redelivery.
        if let Some(floor) = window.filter.row_id_floor() {
            let before_len = records.len();
            records.retain(|record| record.id > floor);
            report.duplicates += before_len - records.len();
        }

        if let Some(newest) = records.first() {
            self.cursor.advance(newest.id);
        }

        debug!(
            count = records.len(),
            adjusted_after = ?window.adjusted_after(),
            last_row_id = self.cursor.last_row_id(),
            "fetched arrivals"
        );

        for record in records {
            let event = self.classifier.classify_arrival(record);
            report.count(event.kind);
            if !self.deliver(event, None).await {
                report.delivery_failures += 1;
            }
        }

        Ok(())
    }

    async fn emit_mutations(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), Error> {
        let Some(window) = PollWindow::for_mutations(
            after,
            before,
            self.cursor.poll_interval(),
            self.config.direction,
            self.config.propagation_lag,
            self.config.mutation_detection,
        ) else {
            report.mutations_skipped = true;
            return Ok(());
        };

        let records = self
            .source
            .fetch_mutated(&window.filter)
            .await
            .map_err(|source| Error::SourceUnavailable {
                flow: Flow::Mutations,
                source,
            })?;
        report.fetched += records.len();

        let window_start = window.adjusted_after().unwrap_or(DateTime::<Utc>::MIN_UTC);
        if let Some(ledger) = &self.ledger {
            ledger.prune(window_start);
        }

        debug!(count = records.len(), %window_start, "fetched mutations");

        for record in records {
            let Some(event) = self.classifier.classify_mutation(record) else {
                report.dropped += 1;
                continue;
            };

            if let Some(ledger) = &self.ledger {
                if ledger.admit(&event) == Admission::Duplicate {
                    report.duplicates += 1;
                    continue;
                }
            }

            report.count(event.kind);
            if !self.deliver(event, self.ledger.as_ref()).await {
                report.delivery_failures += 1;
            }
        }

        Ok(())
    }

    /// Hand one event to the subscriber. Returns `false` if a sequential
    /// delivery was rejected.
    ///
    /// A rejected event is removed from `ledger` in either mode, so the next
    /// overlapping window offers it again.
    async fn deliver(&self, event: ChangeEvent, ledger: Option<&Arc<MutationLedger>>) -> bool {
        match self.config.delivery {
            DeliveryMode::Sequential => notify(&self.subscriber, event, ledger).await,
            DeliveryMode::Detached => {
                let subscriber = self.subscriber.clone();
                let ledger = ledger.cloned();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    if !notify(&subscriber, event, ledger.as_ref()).await {
                        stats.record_detached_failure();
                    }
                });
                true
            }
        }
    }

    /// Get the cursor.
    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    /// Get the last emitted row id.
    pub fn last_row_id(&self) -> u64 {
        self.cursor.last_row_id()
    }

    /// Get the configuration.
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Get a handle to the poller's counters.
    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    /// Get the record source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

async fn notify(
    subscriber: &SharedSubscriber,
    event: ChangeEvent,
    ledger: Option<&Arc<MutationLedger>>,
) -> bool {
    let retry = ledger.map(|_| event.clone());
    let (id, kind) = (event.record.id, event.kind);
    match subscriber.notify(event).await {
        Ok(()) => true,
        Err(e) => {
            warn!(row_id = id, ?kind, error = %e, "subscriber rejected event");
            if let (Some(ledger), Some(event)) = (ledger, retry) {
                ledger.forget(&event);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, SubscriberError};
    use crate::record::RawRecord;
    use crate::source::{ChannelSubscriber, FnSubscriber};
    use crate::window::RecordFilter;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Source returning scripted batches and recording the filters it saw.
    #[derive(Default)]
    struct ScriptedSource {
        arrivals: Mutex<VecDeque<Result<Vec<RawRecord>, SourceError>>>,
        mutations: Mutex<VecDeque<Result<Vec<RawRecord>, SourceError>>>,
        arrival_filters: Mutex<Vec<RecordFilter>>,
        mutation_filters: Mutex<Vec<RecordFilter>>,
    }

    impl ScriptedSource {
        fn push_arrivals(&self, records: Vec<RawRecord>) {
            self.arrivals.lock().push_back(Ok(records));
        }

        fn push_arrival_error(&self) {
            self.arrivals
                .lock()
                .push_back(Err(SourceError::Unavailable("locked".to_string())));
        }

        fn push_mutations(&self, records: Vec<RawRecord>) {
            self.mutations.lock().push_back(Ok(records));
        }

        fn push_mutation_error(&self) {
            self.mutations
                .lock()
                .push_back(Err(SourceError::Query("no such column".to_string())));
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn fetch_since(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
            self.arrival_filters.lock().push(filter.clone());
            self.arrivals.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn fetch_mutated(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
            self.mutation_filters.lock().push(filter.clone());
            self.mutations.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn incoming(id: u64, created_at: DateTime<Utc>) -> RawRecord {
        RawRecord::new(id, created_at, false)
    }

    fn config() -> PollerConfig {
        PollerConfig::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let (subscriber, _rx) = ChannelSubscriber::channel(1);
        let result = ChangeFeedPoller::new(
            ScriptedSource::default(),
            Arc::new(subscriber),
            PollerConfig::new(Duration::ZERO),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_first_tick_is_time_bounded_then_row_bounded() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::default());
        source.push_arrivals(vec![incoming(5, now), incoming(4, now)]);

        let (subscriber, _rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(source.clone(), Arc::new(subscriber), config()).unwrap();

        poller.run_tick(now, now).await.unwrap();
        poller.run_tick(now, now).await.unwrap();

        let filters = source.arrival_filters.lock();
        assert!(filters[0].after.is_some());
        assert_eq!(filters[0].row_id_floor(), None);
        assert_eq!(filters[1].after, None);
        assert_eq!(filters[1].row_id_floor(), Some(5));
    }

    #[tokio::test]
    async fn test_stale_rows_from_source_are_not_redelivered() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        source.push_arrivals(vec![incoming(5, now)]);
        // Ignores the ROWID predicate.
        source.push_arrivals(vec![incoming(6, now), incoming(5, now)]);

        let (subscriber, mut rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();

        poller.run_tick(now, now).await.unwrap();
        let report = poller.run_tick(now, now).await.unwrap();

        assert_eq!(report.arrived, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(poller.last_row_id(), 6);

        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            ids.push(event.record.id);
        }
        assert_eq!(ids, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_source_failure_leaves_cursor() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        source.push_arrivals(vec![incoming(3, now)]);
        source.push_arrival_error();

        let (subscriber, _rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();

        poller.run_tick(now, now).await.unwrap();
        let err = poller.run_tick(now, now).await.unwrap_err();

        assert_eq!(err.flow(), Some(Flow::Arrivals));
        assert_eq!(poller.last_row_id(), 3);
        assert_eq!(poller.stats().snapshot().failed_ticks, 1);
        // Mutations are not attempted once arrivals fail.
        assert_eq!(poller.source().mutation_filters.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_mutation_failure_keeps_delivered_arrivals() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        source.push_arrivals(vec![incoming(4, now), incoming(3, now)]);
        source.push_mutation_error();

        let (subscriber, mut rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();

        match poller.run_tick(now, now).await {
            Err(Error::SourceUnavailable { flow, source }) => {
                assert_eq!(flow, Flow::Mutations);
                assert!(matches!(source, SourceError::Query(_)));
            }
            other => panic!("expected mutation failure, got {:?}", other),
        }

        assert_eq!(poller.last_row_id(), 4);
        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.kind, ChangeKind::Arrived);
            ids.push(event.record.id);
        }
        assert_eq!(ids, vec![4, 3]);
        assert_eq!(poller.stats().snapshot().failed_ticks, 1);
    }

    #[tokio::test]
    async fn test_subscriber_failure_is_isolated() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        source.push_arrivals(vec![incoming(3, now), incoming(2, now), incoming(1, now)]);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let subscriber = FnSubscriber::new(move |event: ChangeEvent| {
            if event.record.id == 2 {
                return Err(SubscriberError::Rejected("boom".to_string()));
            }
            sink.lock().push(event.record.id);
            Ok(())
        });

        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();
        let report = poller.run_tick(now, now).await.unwrap();

        assert_eq!(report.arrived, 3);
        assert_eq!(report.delivery_failures, 1);
        assert_eq!(*delivered.lock(), vec![3, 1]);
        assert_eq!(poller.last_row_id(), 3);
    }

    #[tokio::test]
    async fn test_repeated_mutation_delivered_once() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        let edited = incoming(8, now - chrono::Duration::seconds(60)).with_edited_at(now);
        source.push_mutations(vec![edited.clone()]);
        source.push_mutations(vec![edited]);

        let (subscriber, mut rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();

        let first = poller.run_tick(now, now).await.unwrap();
        let second = poller.run_tick(now, now).await.unwrap();

        assert_eq!(first.edited, 1);
        assert_eq!(second.edited, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Edited);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_old_edit_touched_by_read_is_delivered() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        // Edited long ago; returned now only because its read time moved.
        let edited = incoming(8, now - chrono::Duration::hours(2))
            .with_edited_at(now - chrono::Duration::hours(1))
            .with_read_at(now);
        source.push_mutations(vec![edited.clone()]);
        source.push_mutations(vec![edited]);

        let (subscriber, mut rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();

        let first = poller
            .run_tick(now, now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(first.edited, 1);
        assert_eq!(first.duplicates, 0);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Edited);
        assert_eq!(event.record.id, 8);

        // The next overlapping window still sees the read time.
        let second = poller
            .run_tick(now + chrono::Duration::seconds(1), now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(second.edited, 0);
        assert_eq!(second.duplicates, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeated_mutation_without_dedup() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        let edited = incoming(8, now).with_edited_at(now);
        source.push_mutations(vec![edited.clone()]);
        source.push_mutations(vec![edited]);

        let (subscriber, _rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(
            source,
            Arc::new(subscriber),
            config().with_dedup_mutations(false),
        )
        .unwrap();

        assert_eq!(poller.run_tick(now, now).await.unwrap().edited, 1);
        assert_eq!(poller.run_tick(now, now).await.unwrap().edited, 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_delivery_is_offered_again() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        let retracted = incoming(8, now).with_retracted_at(now);
        source.push_mutations(vec![retracted.clone()]);
        source.push_mutations(vec![retracted]);

        let attempts = Arc::new(Mutex::new(0usize));
        let counter = attempts.clone();
        let subscriber = FnSubscriber::new(move |_event: ChangeEvent| {
            let mut attempts = counter.lock();
            *attempts += 1;
            if *attempts == 1 {
                Err(SubscriberError::Rejected("busy".to_string()))
            } else {
                Ok(())
            }
        });

        let poller = ChangeFeedPoller::new(source, Arc::new(subscriber), config()).unwrap();
        assert_eq!(poller.run_tick(now, now).await.unwrap().delivery_failures, 1);
        assert_eq!(poller.run_tick(now, now).await.unwrap().retracted, 1);
        assert_eq!(*attempts.lock(), 2);
    }

    #[tokio::test]
    async fn test_detached_delivery_reaches_subscriber() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        source.push_arrivals(vec![incoming(3, now), incoming(2, now), incoming(1, now)]);

        let (subscriber, mut rx) = ChannelSubscriber::channel(16);
        let poller = ChangeFeedPoller::new(
            source,
            Arc::new(subscriber),
            config().with_delivery(DeliveryMode::Detached),
        )
        .unwrap();

        let report = poller.run_tick(now, now).await.unwrap();
        assert_eq!(report.arrived, 3);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(rx.recv().await.unwrap().record.id);
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_detached_failure_is_counted_and_isolated() {
        let now = Utc::now();
        let source = ScriptedSource::default();
        source.push_arrivals(vec![incoming(3, now), incoming(2, now), incoming(1, now)]);
        let retracted = incoming(1, now).with_retracted_at(now);
        source.push_mutations(vec![retracted.clone()]);
        source.push_mutations(vec![retracted]);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let rejected_once = Arc::new(Mutex::new(false));
        let sink = delivered.clone();
        let flag = rejected_once.clone();
        let subscriber = FnSubscriber::new(move |event: ChangeEvent| {
            if event.record.id == 2 {
                return Err(SubscriberError::Rejected("boom".to_string()));
            }
            if event.kind == ChangeKind::Retracted && !std::mem::replace(&mut *flag.lock(), true) {
                return Err(SubscriberError::Closed);
            }
            sink.lock().push((event.record.id, event.kind));
            Ok(())
        });

        let poller = ChangeFeedPoller::new(
            source,
            Arc::new(subscriber),
            config().with_delivery(DeliveryMode::Detached),
        )
        .unwrap();

        let report = poller.run_tick(now, now).await.unwrap();
        assert_eq!(report.arrived, 3);
        assert_eq!(report.retracted, 1);
        assert_eq!(report.delivery_failures, 0);

        let stats = poller.stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.snapshot().delivery_failures < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // The rejected retraction was released from the ledger.
        let report = poller.run_tick(now, now).await.unwrap();
        assert_eq!(report.retracted, 1);
        assert_eq!(report.duplicates, 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while delivered.lock().len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let mut events = delivered.lock().clone();
        events.sort_unstable_by_key(|(id, kind)| (*id, *kind == ChangeKind::Retracted));
        assert_eq!(
            events,
            vec![
                (1, ChangeKind::Arrived),
                (1, ChangeKind::Retracted),
                (3, ChangeKind::Arrived),
            ]
        );
        assert_eq!(stats.snapshot().delivery_failures, 2);
    }

    #[tokio::test]
    async fn test_initial_row_id_resumes_baseline() {
        let now = Utc::now();
        let source = Arc::new(ScriptedSource::default());

        let (subscriber, _rx) = ChannelSubscriber::channel(1);
        let poller = ChangeFeedPoller::new(
            source.clone(),
            Arc::new(subscriber),
            config().with_initial_row_id(40),
        )
        .unwrap();

        poller.run_tick(now, now).await.unwrap();
        assert_eq!(source.arrival_filters.lock()[0].row_id_floor(), Some(40));
    }
}
