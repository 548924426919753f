//! `hotswap run` command implementation

use std::time::Duration;

use hotswap_runtime::{Runtime, RuntimeConfig};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::report_to_anyhow;

/// Execute the `hotswap run` command
pub fn run(config: RuntimeConfig, interval_ms: u64) -> anyhow::Result<()> {
    let interval = Duration::from_millis(interval_ms.max(1));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(serve(config, interval))
}

async fn serve(config: RuntimeConfig, interval: Duration) -> anyhow::Result<()> {
    let mut runtime = Runtime::init(config).map_err(report_to_anyhow)?;
    info!(
        "Hosting {} modules, polling every {:?} (Ctrl-C to stop)",
        runtime.module_count(),
        interval
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => match runtime.poll() {
                Ok(0) => {}
                Ok(events) => info!(
                    "Applied {} change events, {} modules live",
                    events,
                    runtime.module_count()
                ),
                Err(report) => error!("Poll failed, registry unchanged: {report:?}"),
            },
            signal = &mut ctrl_c => {
                signal?;
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    runtime.shutdown();
    Ok(())
}
