//! Communication with the (simulated) system under control
//!
//! Admin mode writes start or stop communication after a delay, the way a
//! real device would connect to its hardware. A new request replaces any
//! transition still pending.

use std::sync::{Arc, Mutex};

use cspsim_shared::{lock, AdminMode, HealthState, PowerState};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::DeviceContext;

/// Drives the admin mode and the state that follows from it
pub struct CommunicationManager {
    ctx: Arc<DeviceContext>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CommunicationManager {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            ctx,
            pending: Mutex::new(None),
        }
    }

    /// Handle an admin mode write.
    ///
    /// Returns false when the request is refused or changes nothing.
    pub fn request(&self, mode: AdminMode) -> bool {
        let current = self.ctx.attributes.admin();

        match mode {
            AdminMode::Online | AdminMode::Engineering => {
                self.schedule(mode, true);
                true
            }
            AdminMode::Offline if current == AdminMode::Offline => false,
            AdminMode::Offline => {
                self.schedule(mode, false);
                true
            }
            AdminMode::NotFitted | AdminMode::Reserved if current == AdminMode::Online => {
                warn!(
                    "[{}] Refusing admin mode {} while ONLINE",
                    self.ctx.name, mode
                );
                false
            }
            AdminMode::NotFitted | AdminMode::Reserved => self.ctx.attributes.set_admin(mode),
        }
    }

    fn schedule(&self, mode: AdminMode, communicate: bool) {
        let ctx = self.ctx.clone();
        let delay = ctx.config().communication_delay;

        info!("[{}] Admin mode {} requested", ctx.name, mode);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ctx.attributes.set_admin(mode);
            if communicate {
                start_communicating(&ctx);
            } else {
                stop_communicating(&ctx);
            }
        });

        if let Some(previous) = lock(&self.pending).replace(task) {
            previous.abort();
        }
    }
}

impl Drop for CommunicationManager {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.pending).take() {
            task.abort();
        }
    }
}

fn start_communicating(ctx: &DeviceContext) {
    if ctx.profile.has_hardware {
        ctx.attributes.set_power(PowerState::Off);
        ctx.attributes.set_health(HealthState::Ok);
    } else {
        ctx.attributes.set_power(PowerState::On);
        ctx.attributes.set_health(HealthState::Unknown);
    }
    info!("[{}] Communication established", ctx.name);
}

fn stop_communicating(ctx: &DeviceContext) {
    ctx.attributes.set_power(PowerState::Disable);
    info!("[{}] Communication stopped", ctx.name);
}
