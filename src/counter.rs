use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{pin_mut, Stream, StreamExt};
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::{Action, Notification};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::database::{Database, QueryError, Sql};
use crate::prelude::*;

/// Table holding one record per user, keyed by the namespaced document path.
pub const TABLE: &str = "user_data";

const INCREMENT: &str =
    "UPDATE type::thing($table, $path) SET count = (count OR 0) + 1 RETURN AFTER";

/// Location of a user's click counter: `artifacts/{app_id}/users/{user_id}/user_data/click_count`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct DocumentPath {
    pub app_id: String,
    pub user_id: String,
}

impl DocumentPath {
    fn resource(&self) -> (&'static str, String) {
        (TABLE, self.to_string())
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "artifacts/{}/users/{}/user_data/click_count",
            self.app_id, self.user_id
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CounterRecord {
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CounterError {
    #[snafu(display("{source}"))]
    Increment {
        path: DocumentPath,
        source: QueryError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{source}"))]
    Read {
        path: DocumentPath,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot listen for changes: {source}"))]
    Subscribe {
        path: DocumentPath,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("live update failed: {source}"))]
    Listen {
        path: DocumentPath,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("live update is malformed: {source}"))]
    Malformed {
        path: DocumentPath,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Exhaustion for CounterError {
    fn is_resource_exhausted(&self) -> bool {
        match self {
            CounterError::Increment { source, .. } => source.is_resource_exhausted(),
            _ => false,
        }
    }
}

/// Per-user click counters stored under one application namespace.
#[derive(Debug, Clone, new)]
pub struct Counter {
    database: Database,
    app_id: String,
    backoff: Backoff,
}

impl Counter {
    pub fn path(&self, user_id: &str) -> DocumentPath {
        DocumentPath::new(self.app_id.clone(), user_id.to_owned())
    }

    /// The current value, zero when the record does not exist yet.
    #[instrument(skip(self))]
    pub async fn current(&self, user_id: &str) -> Result<u64, CounterError> {
        let path = self.path(user_id);
        let record: Option<CounterRecord> = self
            .database
            .select(path.resource())
            .await
            .context(ReadSnafu { path })?;

        Ok(record.unwrap_or_default().count)
    }

    /// Atomically add one to the user's counter, creating the record when absent.
    #[instrument(skip(self))]
    pub async fn increment(&self, user_id: &str) -> Result<u64, CounterError> {
        let path = self.path(user_id);
        let record: Option<CounterRecord> = self
            .backoff
            .run(|| {
                self.database
                    .sql(INCREMENT)
                    .bind(("table", TABLE))
                    .bind(("path", path.to_string()))
                    .fetch_first()
            })
            .await
            .context(IncrementSnafu { path: path.clone() })?;

        let count = record.unwrap_or_default().count;
        tracing::debug!(%path, count, "incremented click count");

        Ok(count)
    }

    /// Open a live subscription on the user's counter.
    ///
    /// The returned stream yields the current value first, then one value per change. Dropping
    /// or invoking the [Cancel] handle closes the live query and ends the stream.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, user_id: &str) -> Result<(Updates, Cancel), CounterError> {
        let path = self.path(user_id);

        let stream = self
            .database
            .select::<Option<Value>>(path.resource())
            .live()
            .into_owned()
            .await
            .context(SubscribeSnafu { path: path.clone() })?;

        // read after the live query is open so no change falls in between
        let initial = self.current(user_id).await?;

        let (tx, rx) = mpsc::channel(16);
        let (quit, quit_signal) = oneshot::channel();
        let handle = tokio::spawn(forward(path, stream, initial, tx, quit_signal));

        Ok((Updates::new(rx), Cancel { quit, handle }))
    }
}

type LiveStream = surrealdb::method::Stream<'static, Any, Option<Value>>;

async fn forward(
    path: DocumentPath,
    stream: LiveStream,
    initial: u64,
    tx: mpsc::Sender<Result<u64, CounterError>>,
    mut quit: oneshot::Receiver<()>,
) {
    pin_mut!(stream);

    if tx.send(Ok(initial)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut quit => break,
            event = stream.next() => {
                let Some(event) = event else { break };

                let update = decode(&path, event);
                if let Err(err) = &update {
                    tracing::error!(%path, "click count subscription error: {err}");
                }

                if tx.send(update).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(%path, "click count subscription closed");
}

fn decode(
    path: &DocumentPath,
    event: surrealdb::Result<Notification<Value>>,
) -> Result<u64, CounterError> {
    let Notification { action, data, .. } = event.context(ListenSnafu { path: path.clone() })?;

    match action {
        Action::Delete => Ok(0),
        _ => serde_json::from_value::<CounterRecord>(data)
            .map(|record| record.count)
            .context(MalformedSnafu { path: path.clone() }),
    }
}

/// Values delivered by a counter subscription.
#[derive(Debug)]
pub struct Updates {
    rx: mpsc::Receiver<Result<u64, CounterError>>,
}

impl Updates {
    pub(crate) fn new(rx: mpsc::Receiver<Result<u64, CounterError>>) -> Self {
        Self { rx }
    }
}

impl Stream for Updates {
    type Item = Result<u64, CounterError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Cancels a counter subscription. Dropping it has the same effect as [Cancel::cancel].
#[derive(Debug)]
pub struct Cancel {
    quit: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Cancel {
    pub fn cancel(self) {
        let _ = self.quit.send(());
    }

    /// Cancel and wait until the forwarding task has released the live query.
    pub async fn shutdown(self) {
        let _ = self.quit.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::sync::atomic::{AtomicU32, Ordering};

    use snafu::IntoError;
    use surrealdb::error::Db;
    use tokio::time::timeout;

    use super::*;

    async fn counter() -> Counter {
        let database = Database::memory().await.unwrap();
        Counter::new(database, "test-app".into(), Backoff::default())
    }

    fn increment_error(path: &DocumentPath, source: surrealdb::error::Db) -> CounterError {
        IncrementSnafu { path: path.clone() }.into_error(QueryError::Execute {
            source: surrealdb::Error::Db(source),
        })
    }

    async fn next(updates: &mut Updates) -> Option<u64> {
        timeout(Duration::from_secs(5), updates.next())
            .await
            .expect("subscription should deliver in time")
            .map(|update| update.unwrap())
    }

    #[test]
    fn document_path_is_namespaced() {
        let path = DocumentPath::new("my-app".into(), "alice".into());
        assert_eq!(
            path.to_string(),
            "artifacts/my-app/users/alice/user_data/click_count"
        );
    }

    #[tokio::test]
    async fn absent_record_counts_as_zero() {
        let counter = counter().await;
        assert_eq!(counter.current("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn increment_creates_then_adds() {
        let counter = counter().await;

        assert_eq!(counter.increment("alice").await.unwrap(), 1);
        assert_eq!(counter.increment("alice").await.unwrap(), 2);
        assert_eq!(counter.current("alice").await.unwrap(), 2);
        assert_eq!(counter.current("bob").await.unwrap(), 0, "users are independent");
    }

    #[tokio::test]
    async fn subscription_reports_increment() {
        let counter = counter().await;
        counter.increment("alice").await.unwrap();

        let (mut updates, cancel) = counter.subscribe("alice").await.unwrap();
        let before = next(&mut updates).await.unwrap();
        assert_eq!(before, 1);

        counter.increment("alice").await.unwrap();
        assert_eq!(next(&mut updates).await, Some(before + 1));

        cancel.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivery() {
        let counter = counter().await;

        let (mut updates, cancel) = counter.subscribe("alice").await.unwrap();
        assert_eq!(next(&mut updates).await, Some(0));

        cancel.shutdown().await;
        counter.increment("alice").await.unwrap();

        assert_eq!(next(&mut updates).await, None);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let counter = counter().await;

        let (mut updates, cancel) = counter.subscribe("alice").await.unwrap();
        assert_eq!(next(&mut updates).await, Some(0));

        drop(cancel);

        assert_eq!(next(&mut updates).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn increment_conflicts_are_retried() {
        let path = DocumentPath::new("test-app".into(), "alice".into());
        let calls = AtomicU32::new(0);

        let result = Backoff::default()
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                let outcome = if call < 2 {
                    Err(increment_error(&path, Db::TxFailure))
                } else {
                    Ok(u64::from(call))
                };
                async move { outcome }
            })
            .await;

        assert!(matches!(result, Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn increment_gives_up_on_other_store_errors() {
        let path = DocumentPath::new("test-app".into(), "alice".into());
        let calls = AtomicU32::new(0);

        let result: Result<u64, _> = Backoff::default()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                let outcome = Err(increment_error(&path, Db::TxFinished));
                async move { outcome }
            })
            .await;

        assert!(matches!(result, Err(CounterError::Increment { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_increment_conflicts_are_transient() {
        let path = DocumentPath::new("test-app".into(), "alice".into());

        assert!(increment_error(&path, Db::TxFailure).is_resource_exhausted());
        assert!(!increment_error(&path, Db::TxFinished).is_resource_exhausted());

        let malformed = MalformedSnafu { path }
            .into_error(serde_json::from_str::<CounterRecord>("\"nope\"").unwrap_err());
        assert!(!malformed.is_resource_exhausted());
    }
}
