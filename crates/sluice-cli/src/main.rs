//! Sluice transport smoke runner.
//!
//! Builds a chain of transport nodes on one worker pool, feeds it partial
//! views from several producer threads and reports what arrived.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use arrow_array::{ArrayRef, Int64Array, TimestampNanosecondArray};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_core::table::{ColumnMeta, ColumnType};
use sluice_core::transport::{
    CallStack, Dispatcher, NodeInfo, PoolDispatcher, Position, SourceLocation, StackEntry,
    TransportConfig,
};
use sluice_core::{
    Allocator, DatasetId, Error, GroupKey, Message, Table, TableBuffer, Time, Transformation,
    TransportNode, View,
};

/// Sluice - push partial tables through a chain of transport nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker threads in the pool
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Messages a node may process before yielding its worker
    #[arg(long, default_value_t = sluice_core::transport::DEFAULT_THROUGHPUT)]
    throughput: usize,

    /// Forwarding nodes in front of the sink
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// Producer threads
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Tables sent by each producer
    #[arg(long, default_value_t = 1000)]
    tables: usize,

    /// Rows per table, split across two views
    #[arg(long, default_value_t = 64)]
    rows: usize,

    /// Make the sink fail on this table (1-based)
    #[arg(long)]
    fail_at: Option<u64>,

    /// Seconds to wait for the chain to finish
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

const SRC: DatasetId = DatasetId(0x5eed);

/// Counts tables and rows, optionally failing on one table.
struct CountingSink {
    tables: Arc<AtomicU64>,
    rows: Arc<AtomicU64>,
    fail_at: Option<u64>,
}

impl Transformation for CountingSink {
    fn retract_table(&mut self, _src: DatasetId, _key: GroupKey) -> sluice_core::Result<()> {
        Ok(())
    }

    fn process(&mut self, _src: DatasetId, table: Table) -> sluice_core::Result<()> {
        let n = self.tables.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_at == Some(n) {
            table.done();
            return Err(Error::operator(format!("sink rejected table {n}")));
        }
        self.rows.fetch_add(table.num_rows() as u64, Ordering::Relaxed);
        table.done();
        Ok(())
    }

    fn update_watermark(&mut self, _src: DatasetId, _time: Time) -> sluice_core::Result<()> {
        Ok(())
    }

    fn update_processing_time(
        &mut self,
        _src: DatasetId,
        _time: Time,
    ) -> sluice_core::Result<()> {
        Ok(())
    }

    fn finish(&mut self, _src: DatasetId, err: Option<Error>) -> sluice_core::Result<()> {
        match err {
            Some(e) => warn!(error = %e, "sink finished with upstream error"),
            None => info!("sink finished"),
        }
        Ok(())
    }

    fn operation_type(&self) -> String {
        "counting-sink".to_string()
    }
}

/// Provenance for the n-th node of the chain, as a query would attach it.
fn node_info(id: String, line: u32) -> NodeInfo {
    let location = SourceLocation::new(
        "smoke.flux",
        Position::new(line, 1),
        Position::new(line, 20),
    );
    NodeInfo::new(id).with_call_stack(CallStack::new(vec![StackEntry::new(location, "forward")]))
}

fn view(alloc: &Allocator, key: &GroupKey, start: i64, len: usize) -> sluice_core::Result<View> {
    let values: Vec<i64> = (start..).take(len).collect();
    let times = TimestampNanosecondArray::from(values.clone());
    let buf = TableBuffer::try_new(
        key.clone(),
        vec![
            ColumnMeta::new("_time", ColumnType::Time),
            ColumnMeta::new("_value", ColumnType::Int),
        ],
        vec![
            Arc::new(times) as ArrayRef,
            Arc::new(Int64Array::from(values)) as ArrayRef,
        ],
    )?
    .accounted(alloc)?;
    Ok(View::from_buffer(buf))
}

/// Sends each table as two views followed by a flush. Stops at the first
/// refused submission.
fn produce(
    head: &Arc<TransportNode>,
    alloc: &Allocator,
    producer: usize,
    tables: usize,
    rows: usize,
) -> sluice_core::Result<usize> {
    let split = rows / 2;
    for t in 0..tables {
        let key = GroupKey::new([("producer", producer as u64), ("table", t as u64)]);
        let first = view(alloc, &key, 0, split)?;
        let second = view(alloc, &key, i64::try_from(split).unwrap_or(i64::MAX), rows - split)?;
        head.process_message(Message::ProcessView { src: SRC, view: first })?;
        head.process_message(Message::ProcessView { src: SRC, view: second })?;
        head.process_message(Message::FlushKey { src: SRC, key })?;
    }
    head.update_watermark(SRC, Time::now())?;
    Ok(tables)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sluice={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sluice smoke run");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TransportConfig::builder()
        .workers(args.workers)
        .throughput(args.throughput)
        .build();
    let pool = Arc::new(PoolDispatcher::start(&config).context("starting worker pool")?);
    let dispatcher = Arc::clone(&pool) as Arc<dyn Dispatcher>;
    let alloc = Allocator::new();

    let tables = Arc::new(AtomicU64::new(0));
    let rows = Arc::new(AtomicU64::new(0));
    let sink = TransportNode::new(
        Arc::clone(&dispatcher),
        CountingSink {
            tables: Arc::clone(&tables),
            rows: Arc::clone(&rows),
            fail_at: args.fail_at,
        },
        NodeInfo::new("sink"),
        &alloc,
        &config,
    );

    // Forwarding nodes pass raw messages on, so views reach the sink unbuilt.
    let mut chain = vec![Arc::clone(&sink)];
    for i in (0..args.nodes).rev() {
        let next = Arc::clone(&chain[chain.len() - 1]);
        let line = u32::try_from(i + 1).unwrap_or(u32::MAX);
        chain.push(TransportNode::with_transport(
            Arc::clone(&dispatcher),
            next,
            node_info(format!("forward-{i}"), line),
            &config,
        ));
    }
    chain.reverse();
    let head = Arc::clone(&chain[0]);
    info!(
        nodes = chain.len(),
        workers = config.workers,
        throughput = config.throughput,
        "pipeline built"
    );

    let started = Instant::now();
    let producers: Vec<_> = (0..args.producers)
        .map(|p| {
            let head = Arc::clone(&head);
            let alloc = alloc.clone();
            let (tables, rows) = (args.tables, args.rows);
            thread::Builder::new()
                .name(format!("sluice-producer-{p}"))
                .spawn(move || produce(&head, &alloc, p, tables, rows))
        })
        .collect::<std::io::Result<_>>()
        .context("spawning producers")?;

    for (p, handle) in producers.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(sent)) => info!(producer = p, tables = sent, "producer done"),
            Ok(Err(e)) => warn!(producer = p, error = %e, "producer stopped"),
            Err(_) => bail!("producer {p} panicked"),
        }
    }
    head.finish(SRC, None);

    let timeout = Duration::from_secs(args.timeout_secs);
    for node in &chain {
        if !node.finished().wait_timeout(timeout) {
            bail!("node {} did not finish within {timeout:?}", node.label());
        }
    }
    let elapsed = started.elapsed();

    for node in &chain {
        let m = node.metrics_snapshot();
        info!(
            label = node.label(),
            operation = TransportNode::operation_type(node),
            pushed = m.messages_pushed,
            processed = m.messages_processed,
            drains = m.drains,
            yields = m.yields,
            rejected = m.rejected,
            discarded = m.discarded,
            "node metrics"
        );
    }

    let stats = alloc.stats();
    println!("tables:         {}", tables.load(Ordering::Relaxed));
    println!("rows:           {}", rows.load(Ordering::Relaxed));
    println!("elapsed:        {elapsed:?}");
    println!("peak memory:    {} bytes", stats.max_allocated_bytes);
    println!("leaked memory:  {} bytes", stats.allocated_bytes);

    pool.shutdown().context("shutting down worker pool")?;

    if let Some(e) = head.err().or_else(|| sink.err()) {
        bail!("pipeline failed: {e}");
    }
    Ok(())
}
