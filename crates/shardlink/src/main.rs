mod cmd;
mod exit;
mod logging;
mod producer;

use clap::Parser;

use crate::cmd::NodeArgs;
use tracing::level_filters::LevelFilter;

use crate::logging::{init_logging, LogFormat};

#[derive(Parser, Debug)]
#[command(
    name = "shardlink",
    version,
    about = "Stream block frames to a peer, or listen and execute them"
)]
struct Cli {
    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr): off, error, warn, info, debug or trace.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LevelFilter,

    #[command(flatten)]
    node: NodeArgs,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match cmd::run(cli.node) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn no_destination_selects_listen_mode() {
        let cli = Cli::try_parse_from(["shardlink", "--port", "4001"]).expect("listen args should parse");
        assert!(cli.node.dest.is_none());
        assert_eq!(cli.node.port, 4001);
        assert_eq!(cli.log_level, LevelFilter::INFO);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn short_dest_flag_selects_dial_mode() {
        let cli = Cli::try_parse_from([
            "shardlink",
            "-d",
            "/ip4/127.0.0.1/tcp/4001/p2p/abc",
            "--shard",
            "2",
            "--count",
            "10",
        ])
        .expect("dial args should parse");

        assert_eq!(cli.node.dest.as_deref(), Some("/ip4/127.0.0.1/tcp/4001/p2p/abc"));
        assert_eq!(cli.node.shard, 2);
        assert_eq!(cli.node.count, Some(10));
        assert_eq!(cli.node.buffer, 64);
    }

    #[test]
    fn engine_args_accept_leading_hyphens() {
        let cli = Cli::try_parse_from([
            "shardlink",
            "--engine-cmd",
            "/bin/sh",
            "--engine-arg",
            "-c",
            "--engine-arg",
            "exit 0",
        ])
        .expect("engine args should parse");

        assert_eq!(cli.node.engine_arg, vec!["-c".to_string(), "exit 0".to_string()]);
    }

    #[test]
    fn default_timeouts() {
        let cli = Cli::try_parse_from(["shardlink"]).expect("defaults should parse");
        let config = cli.node.node_config().expect("default durations are valid");
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.reader.read_timeout, None);
        assert_eq!(config.reader.invoke_timeout, None);

        let host = cli.node.host_config().expect("default durations are valid");
        assert_eq!(host.connect_timeout, Duration::from_secs(10));
        assert_eq!(host.port, 0);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = Cli::try_parse_from(["shardlink", "--log-level", "loud"])
            .expect_err("unknown level should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn log_level_names_are_case_insensitive() {
        let cli = Cli::try_parse_from(["shardlink", "--log-level", "DEBUG"]).expect("level should parse");
        assert_eq!(cli.log_level, LevelFilter::DEBUG);

        let cli = Cli::try_parse_from(["shardlink", "--log-level", "off"]).expect("level should parse");
        assert_eq!(cli.log_level, LevelFilter::OFF);
    }
}
