/**
 * Device Control Example
 *
 * Queries a device, switches DP 1 on and off, and prints the status the
 * device reports after each step.
 *
 * Usage: device_control <id> <address> <local_key> [version]
 */
use serde_json::json;
use tokio::time::{Duration, sleep};
use tuyaface::DeviceBuilder;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: device_control <id> <address> <local_key> [version]");
        std::process::exit(2);
    }

    // 1. Initialize Device
    let device = DeviceBuilder::new(&args[0], &args[2])
        .address(&args[1])
        .version(args.get(3).map(String::as_str).unwrap_or("3.3"))
        .build();

    // 2. Query status
    println!("[STEP 1] Querying current status...");
    match device.status().await {
        Ok(status) => println!("[SUCCESS] Status: {status}"),
        Err(e) => eprintln!("[ERROR] Status query failed: {e} ({})", e.code()),
    }
    println!(
        "[INFO] Status command for this device: {}",
        device.status_command().await
    );

    // 3. Control single DP
    println!("[STEP 2] Switching ON (using set_state)...");
    match device.set_state(true).await {
        Ok(status) => println!("[SUCCESS] Response: {status}"),
        Err(e) => eprintln!("[ERROR] Control failed: {e}"),
    }

    sleep(Duration::from_secs(1)).await;

    // 4. Control multiple DPs
    println!("[STEP 3] Switching OFF (using set_dps)...");
    match device.set_dps(json!({"1": false})).await {
        Ok(status) => println!("[SUCCESS] Response: {status}"),
        Err(e) => eprintln!("[ERROR] Control failed: {e}"),
    }

    device.close().await;
    println!("[INFO] Example finished.");
}
