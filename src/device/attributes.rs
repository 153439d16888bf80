//! Device attributes held behind one lock

use std::fmt::Display;
use std::sync::{Arc, Mutex};

use cspsim_shared::event::attr;
use cspsim_shared::{lock, AdminMode, EventSink, EventValue, HealthState, PowerState};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
struct AttributeState {
    power: PowerState,
    admin: AdminMode,
    health: HealthState,
    sys_param: Option<String>,
}

/// Power, admin and health state of a device.
///
/// Setters publish only when the value actually changes.
pub struct DeviceAttributes {
    state: Mutex<AttributeState>,
    sink: Arc<dyn EventSink>,
}

impl DeviceAttributes {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(AttributeState {
                power: PowerState::Disable,
                admin: AdminMode::Offline,
                health: HealthState::Ok,
                sys_param: None,
            }),
            sink,
        }
    }

    pub fn power(&self) -> PowerState {
        lock(&self.state).power
    }

    pub fn admin(&self) -> AdminMode {
        lock(&self.state).admin
    }

    pub fn health(&self) -> HealthState {
        lock(&self.state).health
    }

    /// Devices are always simulated
    pub fn simulation_mode(&self) -> bool {
        true
    }

    /// Last system parameters loaded by InitSysParam
    pub fn sys_param(&self) -> Option<String> {
        lock(&self.state).sys_param.clone()
    }

    pub fn set_power(&self, value: PowerState) -> bool {
        let mut state = lock(&self.state);
        self.update(&mut state.power, value, attr::STATE, EventValue::Power)
    }

    pub fn set_admin(&self, value: AdminMode) -> bool {
        let mut state = lock(&self.state);
        self.update(&mut state.admin, value, attr::ADMIN_MODE, EventValue::Admin)
    }

    pub fn set_health(&self, value: HealthState) -> bool {
        let mut state = lock(&self.state);
        self.update(&mut state.health, value, attr::HEALTH_STATE, EventValue::Health)
    }

    pub fn set_sys_param(&self, value: String) {
        lock(&self.state).sys_param = Some(value);
    }

    fn update<T>(&self, slot: &mut T, value: T, name: &str, event: fn(T) -> EventValue) -> bool
    where
        T: Copy + PartialEq + Display,
    {
        if *slot == value {
            return false;
        }
        info!("{} {} -> {}", name, slot, value);
        *slot = value;
        self.sink.push_event(name, event(value));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;

    #[test]
    fn test_initial_values() {
        let attributes = DeviceAttributes::new(Arc::new(EventPublisher::new("test")));
        assert_eq!(attributes.power(), PowerState::Disable);
        assert_eq!(attributes.admin(), AdminMode::Offline);
        assert_eq!(attributes.health(), HealthState::Ok);
        assert!(attributes.simulation_mode());
        assert!(attributes.sys_param().is_none());
    }

    #[test]
    fn test_setters_publish_on_change_only() {
        let publisher = Arc::new(EventPublisher::new("test"));
        let attributes = DeviceAttributes::new(publisher.clone());

        assert!(attributes.set_power(PowerState::On));
        assert!(!attributes.set_power(PowerState::On));
        assert!(!attributes.set_health(HealthState::Ok));
        assert!(attributes.set_admin(AdminMode::Online));

        let names: Vec<String> = publisher.drain_events().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![attr::STATE, attr::ADMIN_MODE]);
    }
}
