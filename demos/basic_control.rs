use blocklight::{BlockLightDevice, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Blocklight Basic Control Example");
    info!("Searching for BlockBlueLight devices...");

    let light = match BlockLightDevice::discover_first().await {
        Ok(device) => {
            info!("Found: {}", device.device_info().name);
            device
        }
        Err(e) => {
            error!("Failed to find device: {}", e);
            return Err(e);
        }
    };

    // Ask the device what it is currently doing
    let status = light.query_status().await?;
    info!("Initial status:");
    info!("  Power: {}", status.power);
    info!("  Timer: {}", status.timer_remaining_display());

    // Run a short timed session: set the timer first, then turn on
    info!("Setting timer to 15 minutes...");
    light.set_timer(15).await?;

    info!("Turning light on...");
    light.turn_on().await?;

    sleep(Duration::from_secs(5)).await;

    let status = light.query_status().await?;
    info!(
        "Light is {} with {} remaining",
        status.power,
        status.timer_remaining_display()
    );

    // Turn it back off and hand the radio back
    info!("Turning light off...");
    light.turn_off().await?;

    info!("Disconnecting...");
    light.disconnect().await?;
    info!("Done");

    Ok(())
}
