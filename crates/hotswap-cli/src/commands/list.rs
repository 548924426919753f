//! `hotswap list` command implementation

use hotswap_runtime::{ModuleInfo, Runtime, RuntimeConfig};

use super::report_to_anyhow;

/// Execute the `hotswap list` command
pub fn run(config: RuntimeConfig) -> anyhow::Result<()> {
    let runtime = Runtime::init(config).map_err(report_to_anyhow)?;
    let modules = runtime.modules();
    runtime.shutdown();

    println!("{}", render(&modules)?);
    Ok(())
}

fn render(modules: &[ModuleInfo]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(modules)?)
}
