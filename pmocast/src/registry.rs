use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::model::{Device, DeviceCapabilities, DeviceId, RouteInfo};

/// Selects a device for a session request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceFilter {
    pub id: Option<DeviceId>,
    /// Case-insensitive match on the friendly name.
    pub name: Option<String>,
    pub capabilities: DeviceCapabilities,
}

impl DeviceFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(DeviceId::from(id)),
            ..Self::default()
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn matches(&self, device: &Device) -> bool {
        if let Some(id) = &self.id {
            if &device.id != id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !device.name.eq_ignore_ascii_case(name) {
                return false;
            }
        }
        device.capabilities.contains(self.capabilities)
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.id {
            parts.push(format!("id={id}"));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name={name}"));
        }
        if self.capabilities != DeviceCapabilities::NONE {
            parts.push(format!("capabilities={}", self.capabilities.bits()));
        }
        if parts.is_empty() {
            f.write_str("any device")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Outcome of replacing the registry contents with a discovery update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryChange {
    pub added: Vec<DeviceId>,
    pub updated: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
}

impl RegistryChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Receivers currently advertised. The registry owns the devices; sessions
/// only keep weak references to them.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Arc<Device>>,
    order: Vec<DeviceId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.get(id).cloned()
    }

    /// Devices in advertisement order.
    pub fn list(&self) -> Vec<Arc<Device>> {
        self.order
            .iter()
            .filter_map(|id| self.devices.get(id).cloned())
            .collect()
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.list().iter().map(|device| device.route_info()).collect()
    }

    pub fn find(&self, filter: &DeviceFilter) -> Option<Arc<Device>> {
        self.order
            .iter()
            .filter_map(|id| self.devices.get(id))
            .find(|device| filter.matches(device))
            .cloned()
    }

    /// Replaces the contents with `devices`. Entries that did not change keep
    /// their allocation so weak references held elsewhere stay valid.
    pub fn replace_all(&mut self, devices: Vec<Device>) -> RegistryChange {
        let mut change = RegistryChange::default();
        let mut next = HashMap::with_capacity(devices.len());
        let mut order = Vec::with_capacity(devices.len());

        for device in devices {
            if next.contains_key(&device.id) {
                debug!(device = device.id.as_str(), "Duplicate device in discovery update");
                continue;
            }
            let entry = match self.devices.get(&device.id) {
                Some(existing) if existing.same_advertisement(&device) => Arc::clone(existing),
                Some(_) => {
                    change.updated.push(device.id.clone());
                    Arc::new(device)
                }
                None => {
                    change.added.push(device.id.clone());
                    Arc::new(device)
                }
            };
            order.push(entry.id.clone());
            next.insert(entry.id.clone(), entry);
        }

        change.removed = self
            .order
            .iter()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        self.devices = next;
        self.order = order;
        change
    }

    /// Forgets every device, returning how many were known.
    pub fn clear(&mut self) -> usize {
        let count = self.devices.len();
        self.devices.clear();
        self.order.clear();
        count
    }
}
