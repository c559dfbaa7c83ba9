use splitlink_bus::BusConfig;
use tracing::info;

use crate::cmd::CheckArgs;
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::output::{print_config, OutputFormat};

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let path = args.config.display().to_string();
    let config = BusConfig::from_path(&args.config)
        .map_err(|err| config_error("check failed", err))?;

    info!(
        path = %path,
        channels = config.channels.len(),
        "config is valid"
    );
    print_config(&path, &config, format);
    Ok(SUCCESS)
}
