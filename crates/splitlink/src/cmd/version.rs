use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("splitlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: splitlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("SPLITLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("SPLITLINK_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("frame_header_bytes: {}", splitlink_frame::HEADER_SIZE);
    println!(
        "default_queue_sizes: tx={} rx={}",
        splitlink_bus::DEFAULT_TX_QUEUE_SIZE,
        splitlink_bus::DEFAULT_RX_QUEUE_SIZE
    );
    println!(
        "features: async={}, cli=true",
        cfg!(feature = "async")
    );

    Ok(SUCCESS)
}
