use std::sync::Arc;

use shardlink_engine::{CommandEngine, EngineGateway, NoopEngine};
use shardlink_peer::Node;
use tracing::{info, warn};

use crate::cmd::{bind_host, NodeArgs};
use crate::exit::{io_error, CliResult, SUCCESS};

pub async fn run(args: NodeArgs) -> CliResult<i32> {
    let config = args.node_config()?;
    let host = bind_host(&args).await?;

    match &args.engine_cmd {
        Some(program) => {
            let engine = CommandEngine::new(program)
                .with_args(args.engine_arg.iter().cloned())
                .with_timeout(config.reader.invoke_timeout);
            info!(program = %program.display(), "executing blocks with external command");
            serve(Node::new(host, Arc::new(engine), config)).await
        }
        None => {
            info!("no engine command given, received blocks are discarded");
            serve(Node::new(host, Arc::new(NoopEngine::new()), config)).await
        }
    }
}

async fn serve<G: EngineGateway>(node: Node<G>) -> CliResult<i32> {
    for addr in node.listen() {
        println!("{addr}");
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| io_error("waiting for interrupt failed", err))?;
    info!("interrupt received, shutting down");

    tokio::select! {
        finished = node.shutdown() => {
            if !finished {
                warn!("some streams did not close in time");
            }
        }
        _ = tokio::signal::ctrl_c() => warn!("second interrupt, not waiting for streams"),
    }
    Ok(SUCCESS)
}
