use blocklight::{BlockLightDevice, Result};
use tracing::{error, info};

const SESSION_MINUTES: u16 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Blocklight Timer Session Example");
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

    // The device expects timer-then-on ordering and handles the countdown
    // itself; when it reaches zero the panel switches off on its own.
    info!("Starting a {SESSION_MINUTES} minute session...");
    light.set_timer(SESSION_MINUTES).await?;
    light.turn_on().await?;

    // Query once so the countdown is synchronized from the device
    let status = light.query_status().await?;
    info!(
        "Session running: {} remaining",
        status.timer_remaining_display()
    );

    // Watch the mirrored countdown until the device reports itself off
    let mut updates = light.subscribe();
    while updates.changed().await.is_ok() {
        let status = updates.borrow_and_update().clone();
        println!(
            "{} - {}",
            status.power,
            status.timer_remaining_display()
        );

        if !status.power.is_on() && status.timer_remaining_seconds == 0 {
            info!("Session finished, panel turned itself off");
            break;
        }
    }

    info!("Disconnecting...");
    light.disconnect().await?;
    info!("Done");

    Ok(())
}
