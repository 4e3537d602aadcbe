use std::sync::Arc;

use shardlink_engine::NoopEngine;
use shardlink_peer::Node;
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::{bind_host, parse_optional_duration, NodeArgs};
use crate::exit::{dial_error, io_error, writer_outcome, CliError, CliResult, USAGE};
use crate::producer::{feed, BlockSequence};

pub async fn run(args: NodeArgs, dest: &str) -> CliResult<i32> {
    if args.buffer == 0 {
        return Err(CliError::new(USAGE, "--buffer must be at least 1"));
    }
    let interval = parse_optional_duration(args.interval.as_deref())?;
    let config = args.node_config()?;
    let host = bind_host(&args).await?;

    // the dialing side never serves streams, so its engine is never invoked
    let node = Node::new(host, Arc::new(NoopEngine::new()), config);
    let (tx, rx) = mpsc::channel(args.buffer);
    let handle = node
        .dial(dest, rx)
        .await
        .map_err(|err| dial_error("dial failed", err))?;

    let sequence = BlockSequence::new(args.shard, args.start_block, args.count);
    info!(peer = %handle.remote_peer(), shard = args.shard, start = args.start_block, "streaming blocks");
    node.registry()
        .spawn(feed(sequence, tx, interval, node.registry().child_token()));

    let mut join = std::pin::pin!(handle.join());
    let report = tokio::select! {
        report = &mut join => report,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("waiting for interrupt failed", err))?;
            info!("interrupt received, shutting down");
            node.shutdown().await;
            join.await
        }
    };
    info!(frames = report.frames_sent, "stream finished");

    node.shutdown().await;
    writer_outcome(report)
}
