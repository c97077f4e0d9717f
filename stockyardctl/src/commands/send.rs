use anyhow::{Context, Result};
use stockyard_config::StockyardConfig;
use stockyard_core::device::{DeviceTransport, SimulatedDevice};

use crate::cli::SendArgs;

/// Deliver one raw command over the configured transport and print the
/// controller's acknowledgement.
pub async fn run(args: SendArgs, config: &StockyardConfig) -> Result<()> {
    let command = args.command.join(" ");
    let timeout = config.engine.device.command_timeout();

    let ack = match config.device.http_transport(timeout)? {
        Some(http) => {
            tracing::info!(endpoint = %http.endpoint(), command, "sending command to controller");
            http.send(&command).await
        }
        None => {
            let (device, _reports) = SimulatedDevice::builder(config.engine.grid)
                .with_step(config.device.simulated_step())
                .build();
            tracing::info!(command, "sending command to simulated controller");
            device.send(&command).await
        }
    }
    .with_context(|| format!("controller did not accept `{command}`"))?;

    println!("{ack}");
    Ok(())
}
