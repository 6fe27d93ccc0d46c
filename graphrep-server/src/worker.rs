//! Worker pool.
//!
//! A fixed number of OS threads pull exchanges from one shared MPMC queue.
//! Each worker handles one exchange at a time: decode, route, run the
//! handler inside a fresh transaction, commit or roll back, then send the
//! terminal frame. Every path, including a panicking handler, ends in exactly
//! one terminal frame.
//!
//! A batch runs all of its requests in one transaction. Each request ends in
//! its own terminal frame flagged `MORE`, and the batch ends with one more
//! frame: 200 after a successful commit, or the first failing request's error
//! after a rollback. Pointer arguments are replaced by the entity an earlier
//! request of the batch touched.

use crate::error::{ResourceError, ServerError};
use crate::labels::LabelCache;
use crate::metrics::Metrics;
use crate::resource::{self, Outcome, RequestContext, Resource};
use crate::response::{FrameSender, ResponseStream};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use graphrep_protocol::{Method, Request, Status, Value};
use graphrep_store::{GraphStore, Transaction};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Request messages of one exchange.
#[derive(Debug)]
pub enum Payload {
    Single(Bytes),
    /// Requests sharing one transaction, in submission order.
    Batch(Vec<Bytes>),
}

/// One request message or batch, plus the channel its frames are written to.
#[derive(Debug)]
pub struct Exchange {
    pub payload: Payload,
    pub reply: FrameSender,
}

impl Exchange {
    pub fn new(payload: impl Into<Bytes>, reply: FrameSender) -> Self {
        Self {
            payload: Payload::Single(payload.into()),
            reply,
        }
    }

    pub fn batch(parts: Vec<Bytes>, reply: FrameSender) -> Self {
        Self {
            payload: Payload::Batch(parts),
            reply,
        }
    }
}

/// Cloneable handle for submitting exchanges to a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct ExchangeQueue {
    sender: Sender<Exchange>,
}

impl ExchangeQueue {
    pub fn submit(&self, exchange: Exchange) -> Result<(), ServerError> {
        self.sender.send(exchange).map_err(|_| ServerError::PoolClosed)
    }

    /// Exchanges waiting for a worker.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Fixed-size pool of worker threads sharing one store.
pub struct WorkerPool {
    queue: Option<ExchangeQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers.
    pub fn start(
        store: Arc<dyn GraphStore>,
        threads: usize,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, ServerError> {
        let threads = threads.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let worker = Worker {
                id,
                store: Arc::clone(&store),
                queue: receiver.clone(),
                metrics: metrics.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("graphrep-worker-{}", id))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        if let Some(ref metrics) = metrics {
            metrics.workers.set(threads as f64);
        }
        tracing::info!("Started {} workers", threads);

        Ok(Self {
            queue: Some(ExchangeQueue { sender }),
            workers,
        })
    }

    /// Returns a handle for submitting exchanges.
    pub fn queue(&self) -> Result<ExchangeQueue, ServerError> {
        self.queue.clone().ok_or(ServerError::PoolClosed)
    }

    pub fn submit(&self, exchange: Exchange) -> Result<(), ServerError> {
        match &self.queue {
            Some(queue) => queue.submit(exchange),
            None => Err(ServerError::PoolClosed),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Closes the pool's own queue handle. Workers exit once every other
    /// [`ExchangeQueue`] clone is dropped and the queue has drained.
    pub fn close(&mut self) {
        self.queue = None;
    }

    /// Closes the queue and waits for every worker to exit.
    pub fn join(mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn GraphStore>,
    queue: Receiver<Exchange>,
    metrics: Option<Arc<Metrics>>,
}

impl Worker {
    fn run(self) {
        let mut labels = LabelCache::new();
        while let Ok(exchange) = self.queue.recv() {
            if let Some(ref metrics) = self.metrics {
                metrics.queue_depth.set(self.queue.len() as f64);
            }
            match exchange.payload {
                Payload::Single(payload) => self.handle(payload, exchange.reply, &mut labels),
                Payload::Batch(parts) => self.handle_batch(parts, exchange.reply, &mut labels),
            }
        }
        tracing::debug!(worker = self.id, labels = labels.len(), "worker exiting");
    }

    fn handle(&self, payload: Bytes, reply: FrameSender, labels: &mut LabelCache) {
        let started = Instant::now();
        let mut stream = ResponseStream::new(reply);

        let parsed = Request::parse(&payload)
            .map_err(ResourceError::from)
            .and_then(|mut request| resolve_pointers(&mut request, &[]).map(|_| request));
        let request = match parsed {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(worker = self.id, "<<< rejected request: {}", err);
                let status = stream.fail(&err);
                self.record("malformed", "", status, 0, started);
                return;
            }
        };
        tracing::debug!(
            worker = self.id,
            "<<< {} {} ({} args)",
            request.method,
            request.resource,
            request.data.len()
        );

        let resource = match resource::lookup(&request.resource) {
            Some(resource) => resource,
            None => {
                let status = stream.fail(&ResourceError::NotFound(request.resource.clone()));
                self.record("unknown", method_label(&request.method), status, 0, started);
                return;
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_transaction(self.store.as_ref(), resource, &request, &mut stream, labels)
        }));
        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                tracing::error!(
                    worker = self.id,
                    "handler for {} {} panicked: {}",
                    request.method,
                    request.resource,
                    panic_message(payload.as_ref())
                );
                Err(ResourceError::Server("handler panicked".to_string()))
            }
        };

        let continues = stream.continues();
        let status = match result {
            Ok(outcome) => {
                if let Some(ref entity) = outcome.entity {
                    tracing::debug!(worker = self.id, "touched {}", entity);
                }
                stream.finish(outcome.status, outcome.body)
            }
            Err(err) => {
                if err.is_client_error() {
                    tracing::debug!(worker = self.id, "{} {}: {}", request.method, request.resource, err);
                } else {
                    tracing::error!(worker = self.id, "{} {}: {}", request.method, request.resource, err);
                }
                stream.fail(&err)
            }
        };
        tracing::debug!(worker = self.id, ">>> {} after {} continue frames", status, continues);
        self.record(resource.name(), method_label(&request.method), status, continues, started);
    }

    fn handle_batch(&self, parts: Vec<Bytes>, reply: FrameSender, labels: &mut LabelCache) {
        let started = Instant::now();
        let batch = ResponseStream::new(reply.clone());
        tracing::debug!(worker = self.id, "<<< batch of {} requests", parts.len());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_batch(self.store.as_ref(), &parts, &reply, labels)
        }));
        drop(reply);
        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                tracing::error!(
                    worker = self.id,
                    "batch handler panicked: {}",
                    panic_message(payload.as_ref())
                );
                Err(ResourceError::Server("handler panicked".to_string()))
            }
        };

        let status = match result {
            Ok(()) => batch.finish(Status::Ok, Vec::new()),
            Err(err) => {
                if err.is_client_error() {
                    tracing::debug!(worker = self.id, "batch rolled back: {}", err);
                } else {
                    tracing::error!(worker = self.id, "batch rolled back: {}", err);
                }
                batch.fail(&err)
            }
        };
        tracing::debug!(worker = self.id, ">>> batch {}", status);
        self.record("batch", "BATCH", status, parts.len(), started);
    }

    fn record(&self, resource: &str, method: &str, status: Status, continues: usize, started: Instant) {
        if let Some(ref metrics) = self.metrics {
            metrics.observe_request(resource, method, status, continues, started.elapsed());
        }
    }
}

/// Runs a handler inside a fresh transaction. The transaction is committed
/// only when the handler succeeds; a failed commit is a server error.
fn run_transaction(
    store: &dyn GraphStore,
    resource: &Resource,
    request: &Request,
    stream: &mut ResponseStream,
    labels: &mut LabelCache,
) -> Result<Outcome, ResourceError> {
    let mut tx = store.begin();
    let result = {
        let mut ctx = RequestContext {
            store,
            tx: tx.as_mut(),
            stream,
            labels,
        };
        resource.dispatch(&mut ctx, request)
    };

    match result {
        Ok(outcome) => {
            tx.commit()
                .map_err(|e| ResourceError::Server(format!("commit failed: {}", e)))?;
            Ok(outcome)
        }
        Err(err) => {
            tx.rollback();
            Err(err)
        }
    }
}

/// Runs every request of a batch in one transaction, stopping at the first
/// failure. Each request gets its own terminal frame; the returned result
/// decides the batch's.
fn run_batch(
    store: &dyn GraphStore,
    parts: &[Bytes],
    reply: &FrameSender,
    labels: &mut LabelCache,
) -> Result<(), ResourceError> {
    let mut tx = store.begin();
    let mut entities: Vec<Option<Value>> = Vec::with_capacity(parts.len());

    for (index, part) in parts.iter().enumerate() {
        let mut stream = ResponseStream::batched(reply.clone());
        match run_batched(store, tx.as_mut(), part, &entities, &mut stream, labels) {
            Ok(outcome) => {
                stream.finish(outcome.status, outcome.body);
                entities.push(outcome.entity);
            }
            Err(err) => {
                tracing::debug!("batch request {} failed: {}", index, err);
                stream.fail(&err);
                tx.rollback();
                return Err(err);
            }
        }
    }

    tx.commit()
        .map_err(|e| ResourceError::Server(format!("commit failed: {}", e)))
}

fn run_batched(
    store: &dyn GraphStore,
    tx: &mut dyn Transaction,
    part: &Bytes,
    entities: &[Option<Value>],
    stream: &mut ResponseStream,
    labels: &mut LabelCache,
) -> Result<Outcome, ResourceError> {
    let mut request = Request::parse(part)?;
    resolve_pointers(&mut request, entities)?;
    let resource = resource::lookup(&request.resource)
        .ok_or_else(|| ResourceError::NotFound(request.resource.clone()))?;

    let mut ctx = RequestContext {
        store,
        tx,
        stream,
        labels,
    };
    resource.dispatch(&mut ctx, &request)
}

/// Replaces pointer arguments with the entity touched by the earlier batch
/// request they name.
fn resolve_pointers(request: &mut Request, entities: &[Option<Value>]) -> Result<(), ResourceError> {
    for (position, arg) in request.data.iter_mut().enumerate() {
        if let Value::Pointer(index) = *arg {
            let entity = usize::try_from(index)
                .ok()
                .and_then(|i| entities.get(i))
                .and_then(|entity| entity.clone())
                .ok_or_else(|| {
                    ResourceError::BadRequest(format!(
                        "argument {}: pointer {} names no earlier entity",
                        position, index
                    ))
                })?;
            *arg = entity;
        }
    }
    Ok(())
}

/// Bounded set of method labels for metrics.
fn method_label(method: &Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Put => "PUT",
        Method::Patch => "PATCH",
        Method::Post => "POST",
        Method::Delete => "DELETE",
        Method::Other(_) => "OTHER",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
