use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use shardlink_peer::{Host, HostConfig, Identity, NodeConfig, ReaderConfig};

use crate::exit::{bootstrap_error, io_error, CliError, CliResult, USAGE};

pub mod dial;
pub mod listen;

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Peer to stream blocks to, e.g. /ip4/127.0.0.1/tcp/4001/p2p/<peer-id>.
    /// Without it the node listens and executes received blocks.
    #[arg(short = 'd', long = "dest", value_name = "MULTIADDR")]
    pub dest: Option<String>,

    /// TCP port to listen on. 0 picks a free port.
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Derive the node identity from this seed instead of the OS RNG.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Shard id of generated frames.
    #[arg(long, default_value_t = 0)]
    pub shard: u64,

    /// First block id of generated frames.
    #[arg(long, default_value_t = 0)]
    pub start_block: u64,

    /// Number of frames to send. Default: until interrupted.
    #[arg(long)]
    pub count: Option<u64>,

    /// Pause between generated frames (e.g. 100ms, 1s).
    #[arg(long, value_name = "DURATION")]
    pub interval: Option<String>,

    /// Frames buffered between the generator and the stream.
    #[arg(long, value_name = "FRAMES", default_value_t = 64)]
    pub buffer: usize,

    /// Program run once per received frame as `<cmd> [args..] <shard> <block>`.
    /// Without it received frames are accepted and discarded.
    #[arg(long, value_name = "PATH")]
    pub engine_cmd: Option<PathBuf>,

    /// Extra argument for the engine command (repeatable).
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub engine_arg: Vec<String>,

    /// Close an inbound stream idle for longer than this.
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,

    /// Close an inbound stream when one engine run takes longer than this.
    #[arg(long, value_name = "DURATION")]
    pub invoke_timeout: Option<String>,

    /// Deadline for the outbound TCP connect.
    #[arg(long, value_name = "DURATION", default_value = "10s")]
    pub connect_timeout: String,

    /// Time allowed for open streams to finish on shutdown.
    #[arg(long, value_name = "DURATION", default_value = "5s")]
    pub shutdown_grace: String,
}

impl NodeArgs {
    pub fn node_config(&self) -> CliResult<NodeConfig> {
        Ok(NodeConfig {
            reader: ReaderConfig {
                read_timeout: parse_optional_duration(self.read_timeout.as_deref())?,
                invoke_timeout: parse_optional_duration(self.invoke_timeout.as_deref())?,
            },
            shutdown_grace: parse_duration(&self.shutdown_grace)?,
        })
    }

    pub fn host_config(&self) -> CliResult<HostConfig> {
        Ok(HostConfig {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: self.port,
            connect_timeout: parse_duration(&self.connect_timeout)?,
            ..HostConfig::default()
        })
    }

    fn identity(&self) -> Identity {
        match self.seed {
            Some(seed) => Identity::from_seed(seed),
            None => Identity::generate(&mut rand::rngs::OsRng),
        }
    }
}

pub fn run(args: NodeArgs) -> CliResult<i32> {
    let grace = parse_duration(&args.shutdown_grace)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    let result = runtime.block_on(async move {
        match args.dest.clone() {
            Some(dest) => dial::run(args, &dest).await,
            None => listen::run(args).await,
        }
    });

    // engine calls still on the blocking pool must not hold the process open
    runtime.shutdown_timeout(grace);
    result
}

async fn bind_host(args: &NodeArgs) -> CliResult<Host> {
    let config = args.host_config()?;
    Host::bind(args.identity(), config)
        .await
        .map_err(|err| bootstrap_error("host setup failed", err))
}

fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
