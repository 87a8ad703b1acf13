//! `devices` subcommand — list connected Groove Loop devices.

use super::{DevicesOutput, Result, transport};

pub(super) fn cmd_devices(json: bool) -> Result<()> {
    let devices = transport::enumerate();

    if json {
        let output = DevicesOutput {
            count: devices.len(),
            devices,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No Groove Loop devices found.");
        return Ok(());
    }

    println!(
        "Found {} device{}:",
        devices.len(),
        if devices.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, dev) in devices.iter().enumerate() {
        println!(
            "  [{}] {} ({:04x}:{:04x}) at bus {:03}, address {:03}",
            i + 1,
            dev.name,
            dev.vid,
            dev.pid,
            dev.bus,
            dev.address
        );
        if let Some(ref serial) = dev.serial {
            println!("      Serial: {serial}");
        }
        if !dev.accessible {
            println!("      Not accessible (permission denied)");
        }
    }

    if devices.iter().any(|d| !d.accessible) && transport::udev_rule_needed() {
        println!();
        println!(
            "To grant access, install {} with:",
            transport::UDEV_RULE_PATH
        );
        println!();
        for line in transport::udev_rule_contents().lines() {
            println!("  {line}");
        }
        println!();
        println!("then reload rules (`udevadm control --reload-rules && udevadm trigger`).");
    }

    Ok(())
}
