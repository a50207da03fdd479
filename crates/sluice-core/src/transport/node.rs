//! The transport node scheduler.
//!
//! A [`TransportNode`] sits in front of one downstream operator. Producers
//! push messages onto its queue from any thread; the node makes sure a
//! single drain at a time delivers them, in order, on the shared worker
//! pool.
//!
//! ## States
//!
//! ```text
//!            push                      Finish or error
//!   Idle ──────────▶ Running ─────────────────────────▶ Finished
//!    ▲                  │
//!    └──────────────────┘
//!     queue empty / quota reached
//! ```
//!
//! Every transition is a compare-and-swap on one atomic. A push bumps the
//! in-flight counter before trying `Idle → Running`; a drain that goes idle
//! re-reads the counter afterwards and re-enters `Running` itself if work
//! arrived in between, so no message is left stranded.
//!
//! ## Errors
//!
//! The first error wins. It is prefixed with the node's query-source
//! location, forwarded downstream inside one synthesized `Finish`, and
//! returned to every later submission. A panic in the downstream operator
//! is caught and captured as [`TransportError::WorkerPanicked`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, field, trace_span, warn};

use crate::memory::Allocator;
use crate::table::{GroupKey, Table};
use crate::time::Time;
use crate::{Error, Result};

use super::adapter::{Transformation, TransformationAdapter, Transport};
use super::config::TransportConfig;
use super::dispatcher::{panic_message, Dispatcher};
use super::error::TransportError;
use super::message::{DatasetId, Message};
use super::metrics::{MetricsSnapshot, TransportMetrics};
use super::provenance::NodeInfo;
use super::queue::MessageQueue;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;

/// Scheduler state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No drain is scheduled or running.
    Idle,
    /// A drain is scheduled or running.
    Running,
    /// Terminal. No more messages are delivered.
    Finished,
}

/// One-shot signal closed when a node finishes.
#[derive(Debug, Default)]
pub struct FinishedSignal {
    closed: AtomicBool,
    lock: Mutex<bool>,
    cond: Condvar,
}

impl FinishedSignal {
    /// Returns true once the signal is closed. Never blocks.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the signal. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let mut closed = self.lock.lock();
        if *closed {
            return false;
        }
        *closed = true;
        self.closed.store(true, Ordering::Release);
        self.cond.notify_all();
        true
    }

    /// Blocks until the signal is closed.
    pub fn wait(&self) {
        let mut closed = self.lock.lock();
        while !*closed {
            self.cond.wait(&mut closed);
        }
    }

    /// Blocks until the signal is closed or `timeout` passes. Returns true
    /// if the signal is closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut closed = self.lock.lock();
        if !*closed {
            let _ = self.cond.wait_while_for(&mut closed, |closed| !*closed, timeout);
        }
        *closed
    }
}

enum Drain {
    Empty,
    Quota,
    Finished,
}

/// Delivers the messages of one edge to a downstream transport.
///
/// Nodes are shared as `Arc<TransportNode>`. Submissions may come from any
/// thread; delivery happens on the dispatcher.
pub struct TransportNode {
    dispatcher: Arc<dyn Dispatcher>,
    transport: Mutex<Box<dyn Transport>>,
    messages: MessageQueue,
    op: String,
    info: NodeInfo,
    finished: FinishedSignal,
    err: Mutex<Option<Error>>,
    state: AtomicU8,
    inflight: AtomicIsize,
    metrics: TransportMetrics,
}

impl TransportNode {
    /// Creates a node that feeds `t` through a [`TransformationAdapter`].
    pub fn new<T: Transformation + 'static>(
        dispatcher: Arc<dyn Dispatcher>,
        t: T,
        info: NodeInfo,
        allocator: &Allocator,
        config: &TransportConfig,
    ) -> Arc<Self> {
        Self::with_transport(
            dispatcher,
            TransformationAdapter::new(t, allocator),
            info,
            config,
        )
    }

    /// Creates a node that hands raw messages to `transport`.
    pub fn with_transport<T: Transport + 'static>(
        dispatcher: Arc<dyn Dispatcher>,
        transport: T,
        info: NodeInfo,
        config: &TransportConfig,
    ) -> Arc<Self> {
        let op = transport.operation_type();
        Arc::new(Self {
            dispatcher,
            transport: Mutex::new(Box::new(transport)),
            messages: MessageQueue::new(config.queue_capacity),
            op,
            info,
            finished: FinishedSignal::default(),
            err: Mutex::new(None),
            state: AtomicU8::new(IDLE),
            inflight: AtomicIsize::new(0),
            metrics: TransportMetrics::default(),
        })
    }

    /// Operation name of the downstream transport.
    #[must_use]
    pub fn operation_type(&self) -> &str {
        &self.op
    }

    /// Node label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.info.id
    }

    /// Node identity and provenance.
    #[must_use]
    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Signal closed once the node has finished.
    #[must_use]
    pub fn finished(&self) -> &FinishedSignal {
        &self.finished
    }

    /// Returns true once the node has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_closed()
    }

    /// Current scheduler state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        match self.state.load(Ordering::SeqCst) {
            IDLE => NodeState::Idle,
            RUNNING => NodeState::Running,
            _ => NodeState::Finished,
        }
    }

    /// The captured error, if any.
    #[must_use]
    pub fn err(&self) -> Option<Error> {
        self.err.lock().clone()
    }

    /// Messages waiting to be delivered.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.messages.len()
    }

    /// Node counters.
    #[must_use]
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Copies the node counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Queues a retraction of `key`.
    ///
    /// # Errors
    ///
    /// Returns the captured error if the node already finished with one.
    pub fn retract_table(self: &Arc<Self>, src: DatasetId, key: GroupKey) -> Result<()> {
        self.submit(Message::RetractTable { src, key })
    }

    /// Queues a table. If the node has finished the table is released.
    ///
    /// # Errors
    ///
    /// Returns the captured error if the node already finished with one.
    pub fn process(self: &Arc<Self>, src: DatasetId, table: Table) -> Result<()> {
        self.submit(Message::Process { src, table })
    }

    /// Queues a watermark update.
    ///
    /// # Errors
    ///
    /// Returns the captured error if the node already finished with one.
    pub fn update_watermark(self: &Arc<Self>, src: DatasetId, time: Time) -> Result<()> {
        self.submit(Message::UpdateWatermark { src, time })
    }

    /// Queues a processing-time update.
    ///
    /// # Errors
    ///
    /// Returns the captured error if the node already finished with one.
    pub fn update_processing_time(self: &Arc<Self>, src: DatasetId, time: Time) -> Result<()> {
        self.submit(Message::UpdateProcessingTime { src, time })
    }

    /// Queues the end of the stream from `src`. Ignored once finished.
    pub fn finish(self: &Arc<Self>, src: DatasetId, err: Option<Error>) {
        if self.finished.is_closed() {
            return;
        }
        self.push_msg(Message::Finish { src, err });
    }

    /// Queues any message. Once finished the message is acknowledged and
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns the captured error if the node already finished with one.
    pub fn process_message(self: &Arc<Self>, m: Message) -> Result<()> {
        self.submit(m)
    }

    fn submit(self: &Arc<Self>, m: Message) -> Result<()> {
        if self.finished.is_closed() {
            TransportMetrics::incr(&self.metrics.rejected);
            m.ack();
            return self.err().map_or(Ok(()), Err);
        }
        self.push_msg(m);
        Ok(())
    }

    fn push_msg(self: &Arc<Self>, m: Message) {
        self.messages.push(m);
        self.inflight.fetch_add(1, Ordering::SeqCst);
        TransportMetrics::incr(&self.metrics.messages_pushed);
        if self.state.load(Ordering::SeqCst) == FINISHED {
            // Raced with finishing; nothing will drain the queue again.
            self.discard_pending();
            return;
        }
        self.schedule();
    }

    /// Schedules a drain unless one is already pending.
    fn schedule(self: &Arc<Self>) {
        if self.try_transition(IDLE, RUNNING) {
            let node = Arc::clone(self);
            self.dispatcher
                .schedule(Box::new(move |throughput| node.process_messages(throughput)));
        }
    }

    fn try_transition(&self, old: u8, new: u8) -> bool {
        self.state
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn transition(&self, new: u8) {
        self.state.store(new, Ordering::SeqCst);
    }

    fn process_messages(self: &Arc<Self>, throughput: usize) {
        let throughput = throughput.max(1);
        loop {
            TransportMetrics::incr(&self.metrics.drains);
            match self.drain(throughput) {
                Drain::Finished => return,
                Drain::Quota => {
                    TransportMetrics::incr(&self.metrics.yields);
                    self.transition(IDLE);
                    self.schedule();
                    return;
                }
                Drain::Empty => {
                    self.transition(IDLE);
                    // Must run in the idle state.
                    if self.inflight.load(Ordering::SeqCst) > 0 && self.try_transition(IDLE, RUNNING)
                    {
                        continue;
                    }
                    return;
                }
            }
        }
    }

    fn drain(&self, throughput: usize) -> Drain {
        let mut transport = self.transport.lock();
        let mut processed = 0;
        while let Some(m) = self.messages.pop() {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            let src = m.src();
            let is_finish = m.is_finish();
            if let Message::Finish { err: Some(e), .. } = &m {
                self.store_err(e.clone());
            }

            let result = self.deliver(&mut **transport, m);
            TransportMetrics::incr(&self.metrics.messages_processed);
            let failed = match result {
                Ok(()) => false,
                Err(e) => {
                    self.set_err(e);
                    true
                }
            };

            if failed || is_finish {
                if self.try_transition(RUNNING, FINISHED) {
                    if !is_finish {
                        let m = Message::Finish {
                            src,
                            err: self.err(),
                        };
                        if let Err(e) = self.deliver(&mut **transport, m) {
                            error!(label = %self.info.id, error = %e, "synthesized finish failed");
                        }
                    }
                    self.discard_pending();
                    self.finished.close();
                    debug!(
                        operation = %self.op,
                        label = %self.info.id,
                        failed = self.err.lock().is_some(),
                        "transport finished"
                    );
                }
                return Drain::Finished;
            }

            processed += 1;
            if processed >= throughput {
                return Drain::Quota;
            }
        }
        Drain::Empty
    }

    fn deliver(&self, transport: &mut dyn Transport, m: Message) -> Result<()> {
        let span = trace_span!(
            "transport.process_message",
            operation = %self.op,
            label = %self.info.id,
            message_type = %m.kind(),
            dataset = %m.src(),
            key = field::Empty,
            time = field::Empty,
            error = field::Empty,
        );
        m.record_tags(&span);
        let _entered = span.enter();
        catch_unwind(AssertUnwindSafe(|| transport.process_message(m))).unwrap_or_else(|panic| {
            let msg = panic_message(panic.as_ref());
            error!(label = %self.info.id, panic = %msg, "operator panicked");
            Err(Error::Transport(TransportError::WorkerPanicked(msg)))
        })
    }

    /// Captures a processing error with the node's provenance.
    fn set_err(&self, e: Error) {
        let wrapped = Error::Transport(TransportError::Runtime {
            context: self.info.error_context(),
            source: Box::new(e),
        });
        self.store_err(wrapped);
    }

    fn store_err(&self, e: Error) {
        let mut slot = self.err.lock();
        if slot.is_none() {
            *slot = Some(e);
        } else {
            warn!(label = %self.info.id, error = %e, "discarding error after the first");
        }
    }

    /// Acknowledges whatever was queued after the node finished.
    fn discard_pending(&self) {
        while let Some(m) = self.messages.pop() {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            TransportMetrics::incr(&self.metrics.discarded);
            m.ack();
        }
    }
}

impl std::fmt::Debug for TransportNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportNode")
            .field("operation", &self.op)
            .field("label", &self.info.id)
            .field("state", &self.state())
            .field("queued", &self.messages.len())
            .finish_non_exhaustive()
    }
}

/// Lets a node be the downstream operator of another node.
impl Transformation for Arc<TransportNode> {
    fn retract_table(&mut self, src: DatasetId, key: GroupKey) -> Result<()> {
        TransportNode::retract_table(self, src, key)
    }

    fn process(&mut self, src: DatasetId, table: Table) -> Result<()> {
        TransportNode::process(self, src, table)
    }

    fn update_watermark(&mut self, src: DatasetId, time: Time) -> Result<()> {
        TransportNode::update_watermark(self, src, time)
    }

    fn update_processing_time(&mut self, src: DatasetId, time: Time) -> Result<()> {
        TransportNode::update_processing_time(self, src, time)
    }

    fn finish(&mut self, src: DatasetId, err: Option<Error>) -> Result<()> {
        TransportNode::finish(self, src, err);
        Ok(())
    }

    fn operation_type(&self) -> String {
        self.op.clone()
    }
}

/// Forwards raw messages, so partial views stay partial across the hop.
impl Transport for Arc<TransportNode> {
    fn process_message(&mut self, m: Message) -> Result<()> {
        TransportNode::process_message(self, m)
    }

    fn operation_type(&self) -> String {
        self.op.clone()
    }
}
