mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "splitlink", version, about = "Split-device message bus CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loopback_subcommand() {
        let cli = Cli::try_parse_from([
            "splitlink",
            "loopback",
            "--channel",
            "2",
            "--data",
            "hello",
            "--peers",
            "3",
            "--delay",
            "10ms",
        ])
        .expect("loopback args should parse");

        match cli.command {
            Command::Loopback(args) => {
                assert_eq!(args.channel, Some(2));
                assert_eq!(args.peers, 3);
                assert_eq!(args.delay, "10ms");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn loopback_requires_data() {
        let err = Cli::try_parse_from(["splitlink", "loopback"])
            .expect_err("missing --data should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_check_subcommand() {
        let cli = Cli::try_parse_from(["splitlink", "--format", "json", "check", "bus.json"])
            .expect("check args should parse");
        assert!(matches!(cli.command, Command::Check(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }
}
