use typewire::messages::register_demo_types;
use typewire_registry::TypeRegistry;

use crate::cmd::ManifestArgs;
use crate::exit::{registry_error, CliResult, SUCCESS};
use crate::output::{print_manifest, OutputFormat};

pub fn run(_args: ManifestArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = TypeRegistry::new();
    register_demo_types(&registry)
        .map_err(|err| registry_error("type registration failed", err))?;
    print_manifest(&registry.descriptors(), format);
    Ok(SUCCESS)
}
