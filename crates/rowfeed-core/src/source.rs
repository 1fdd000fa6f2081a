//! Seams to the outside world: where records come from and where events go.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{SourceError, SubscriberError};
use crate::record::{ChangeEvent, RawRecord};
use crate::window::RecordFilter;

/// A store the poller can query.
///
/// Implementations must honour every predicate in the filter and, for
/// [`fetch_since`](RecordSource::fetch_since), return rows in the filter's
/// descending order so the first row is the newest.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch records for the arrival feed.
    async fn fetch_since(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError>;

    /// Fetch records that may have been mutated since the filter's start.
    async fn fetch_mutated(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError>;
}

#[async_trait]
impl<S: RecordSource + ?Sized> RecordSource for Arc<S> {
    async fn fetch_since(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
        (**self).fetch_since(filter).await
    }

    async fn fetch_mutated(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
        (**self).fetch_mutated(filter).await
    }
}

/// Receiver of change events.
///
/// `notify` is called once per qualifying record. An error is isolated to
/// that record: the rest of the batch is still delivered.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Accept one event, or return an error to reject it.
    async fn notify(&self, event: ChangeEvent) -> Result<(), SubscriberError>;
}

/// Shared subscriber handle.
pub type SharedSubscriber = Arc<dyn Subscriber>;

/// Subscriber that forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelSubscriber {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::Sender<ChangeEvent>) -> Self {
        Self { tx }
    }

    /// Create a subscriber and the receiver it feeds.
    pub fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn notify(&self, event: ChangeEvent) -> Result<(), SubscriberError> {
        self.tx.send(event).await.map_err(|_| SubscriberError::Closed)
    }
}

/// Subscriber backed by a synchronous closure.
pub struct FnSubscriber<F> {
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(ChangeEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    /// Create a subscriber from a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(ChangeEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    async fn notify(&self, event: ChangeEvent) -> Result<(), SubscriberError> {
        (self.f)(event)
    }
}
