use blocklight::{BlockLightDevice, PowerState, Result};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Blocklight Status Monitor Example");
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

    // Prime the snapshot, then follow changes without polling
    let status = light.query_status().await?;
    println!(
        "Light is {} - timer {}",
        status.power,
        status.timer_remaining_display()
    );

    info!("Watching for status changes, press Ctrl+C to stop");

    let mut updates = light.subscribe();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                match status.power {
                    PowerState::On => println!(
                        "ON  - {} remaining of {} min",
                        status.timer_remaining_display(),
                        status.timer_initial_seconds / 60
                    ),
                    PowerState::Off => println!("OFF"),
                    PowerState::Unknown => println!("state unknown"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping monitor");
                break;
            }
        }
    }

    info!("Disconnecting...");
    light.disconnect().await?;
    info!("Done");

    Ok(())
}
