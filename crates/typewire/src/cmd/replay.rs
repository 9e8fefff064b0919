use std::sync::Arc;

use typewire::messages::register_demo_types;
use typewire_frame::{Envelope, FrameConfig};
use typewire_pipeline::replay_file;
use typewire_registry::TypeRegistry;

use crate::cmd::ReplayArgs;
use crate::exit::{pipeline_error, registry_error, CliResult, SUCCESS};
use crate::output::{print_message, print_stats, MessageRecord, OutputFormat};

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = Arc::new(TypeRegistry::new());
    register_demo_types(&registry)
        .map_err(|err| registry_error("type registration failed", err))?;

    let config = FrameConfig {
        endianness: args.endianness.map(Into::into).unwrap_or_default(),
        ..FrameConfig::default()
    };
    let names = Arc::clone(&registry);
    let stats = replay_file(
        &registry,
        &args.file,
        move |envelope: &Envelope| {
            print_message(&MessageRecord::describe(envelope, &names), format);
        },
        config,
    )
    .map_err(|err| pipeline_error("replay failed", err))?;

    if args.stats {
        print_stats(&stats, format);
    }
    Ok(SUCCESS)
}
