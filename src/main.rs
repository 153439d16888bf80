mod command;
mod config;
mod device;
mod events;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use config::{DeviceConfig, SimulatorConfig};
use cspsim_shared::{AdminMode, ResultCode, TaskStatus};
use device::{DeviceKind, DeviceProfile, SimulatorDevice};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = DeviceConfig {
        name: "sim-mid-csp/subarray/01".into(),
        profile: DeviceProfile::new(DeviceKind::MidSubarray),
        simulator: SimulatorConfig::default(),
    };

    info!("Simulator starting: {}", config.name);
    info!(
        "  time_to_complete={:?} removal_time={:?}",
        config.simulator.time_to_complete, config.simulator.removal_time
    );

    let device = Arc::new(SimulatorDevice::new(config));

    // Spawn event logger
    let device_clone = device.clone();
    tokio::spawn(async move {
        while let Some(event) = device_clone.recv_event().await {
            info!("[EVENT] {} = {}", event.name, event.value);
        }
        error!("[EVENT] Event channel closed");
    });

    bring_online(&device).await?;

    // Observation session
    run(&device, "On", None).await?;
    run(&device, "AddReceptors", Some(r#"{"dish": ["SKA001", "SKA036"]}"#)).await?;
    run(&device, "ConfigureScan", Some(r#"{"id": "sbi-mvp01-20200325-00001"}"#)).await?;
    // Longer scans from now on
    device.set_time_to_complete(Duration::from_millis(800));
    run(&device, "Scan", Some(r#"{"scan_id": 1}"#)).await?;
    run(&device, "GoToIdle", None).await?;

    // Abort and recovery
    let configure = device.invoke("ConfigureScan", Some(r#"{"id": "sbi-2"}"#))?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    run(&device, "Abort", None).await?;
    if let Some(id) = configure.command_id() {
        info!("Aborted configuration: {}", device.wait_for_terminal(&id).await);
    }
    run(&device, "Restart", None).await?;

    // Observation fault and reset
    device.set_obs_faulty(true);
    if let Err(e) = run(&device, "AddReceptors", Some(r#"{"dish": ["SKA063"]}"#)).await {
        warn!("Expected failure: {:#}", e);
    }
    run(&device, "ObsReset", None).await?;
    run(&device, "RemoveAllReceptors", None).await?;

    // Injected faults
    device.set_raise_exception(true);
    if let Err(e) = device.invoke("Off", None) {
        warn!("Expected failure: {}", e);
    }
    device.set_raise_exception(false);

    device.set_faulty_in_command(true);
    if let Err(e) = run(&device, "On", None).await {
        warn!("Expected failure: {:#}", e);
    }
    device.set_faulty_in_command(false);

    run(&device, "Off", None).await?;

    // Controller without observation state
    let controller = SimulatorDevice::new(DeviceConfig::new(
        "sim-mid-csp/control/0",
        DeviceProfile::new(DeviceKind::Controller),
    ));
    bring_online(&controller).await?;
    run(&controller, "InitSysParam", Some(r#"{"interface": "sys_param"}"#)).await?;
    info!(
        "{:?} parameters: {}",
        controller.profile().kind,
        controller.sys_param().unwrap_or_default()
    );
    for event in controller.drain_events() {
        info!("[EVENT] {} {} = {}", controller.name(), event.name, event.value);
    }

    // Let the grace period purge the records
    let removal_time = device.config().removal_time;
    tokio::time::sleep(removal_time + Duration::from_millis(100)).await;
    info!(
        "{} finished: obsState={} state={} simulated={} queue={}",
        device.name(),
        device.obs_state(),
        device.power_state(),
        device.simulation_mode(),
        device.tracker().commands_in_queue().len()
    );

    Ok(())
}

/// Switch the device online and wait for communication
async fn bring_online(device: &SimulatorDevice) -> Result<()> {
    if !device.set_admin_mode(AdminMode::Online) {
        bail!("{} refused to go online", device.name());
    }
    tokio::time::sleep(device.config().communication_delay + Duration::from_millis(100)).await;
    info!(
        "{} online: state={} health={}",
        device.name(),
        device.power_state(),
        device.health_state()
    );
    Ok(())
}

/// Invoke a command and wait for it to finish
async fn run(device: &SimulatorDevice, command: &str, payload: Option<&str>) -> Result<()> {
    let response = device.invoke(command, payload)?;
    let Some(command_id) = response.command_id() else {
        bail!("{} not accepted: {} {}", command, response.code, response.message);
    };

    let status = device.wait_for_terminal(&command_id).await;
    let result = device
        .command_result()
        .filter(|(id, _)| *id == command_id)
        .map(|(_, result)| result);

    match (status, result) {
        (TaskStatus::Completed, Some(result)) if result.code == ResultCode::Ok => {
            info!("{} -> {} ({})", command, device.obs_state(), result.message);
            Ok(())
        }
        (status, Some(result)) => bail!("{} ended {}: {}", command, status, result.message),
        (status, None) => bail!("{} ended {}", command, status),
    }
}
