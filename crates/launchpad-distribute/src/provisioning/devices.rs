//! Device classification and capacity policy

use crate::types::{AvailabilityOfDevices, DeviceClass, UnprovisionedDevice};

/// Classify a device by its name.
///
/// Names are matched case-insensitively; anything that is not an iPad,
/// iPod or watch counts as an iPhone.
pub fn classify_device(device_name: &str) -> DeviceClass {
    let name = device_name.to_lowercase();
    if name.contains("ipad") {
        DeviceClass::Ipads
    } else if name.contains("ipod") {
        DeviceClass::Ipods
    } else if name.contains("watch") {
        DeviceClass::Watches
    } else {
        DeviceClass::Iphones
    }
}

/// Whether the requested devices fit the remaining capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationCapacity {
    AllWithinLimit,
    /// Only the listed classes lack capacity
    SomeAtLimit(Vec<DeviceClass>),
    /// Every requested class lacks capacity; nothing can be registered
    AllAtLimit,
}

/// Unprovisioned devices partitioned by class, with the classes that
/// cannot be registered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicesToBeRegistered {
    pub iphones: Vec<UnprovisionedDevice>,
    pub ipads: Vec<UnprovisionedDevice>,
    pub ipods: Vec<UnprovisionedDevice>,
    pub watches: Vec<UnprovisionedDevice>,
    /// Classes where fewer slots are available than devices requested
    pub device_types_reached_limit: Vec<DeviceClass>,
}

impl DevicesToBeRegistered {
    /// Partition `devices` and apply the capacity policy.
    ///
    /// A class is at its limit when `available < requested`.
    pub fn compute(
        devices: Vec<UnprovisionedDevice>,
        availability: &AvailabilityOfDevices,
    ) -> Self {
        let mut result = Self::default();
        for device in devices {
            let class = classify_device(&device.device_name);
            result.devices_mut(class).push(device);
        }

        result.device_types_reached_limit = DeviceClass::ALL
            .into_iter()
            .filter(|&class| availability.get(class).available < result.requested(class))
            .collect();
        result
    }

    pub fn devices(&self, class: DeviceClass) -> &[UnprovisionedDevice] {
        match class {
            DeviceClass::Iphones => &self.iphones,
            DeviceClass::Ipads => &self.ipads,
            DeviceClass::Ipods => &self.ipods,
            DeviceClass::Watches => &self.watches,
        }
    }

    fn devices_mut(&mut self, class: DeviceClass) -> &mut Vec<UnprovisionedDevice> {
        match class {
            DeviceClass::Iphones => &mut self.iphones,
            DeviceClass::Ipads => &mut self.ipads,
            DeviceClass::Ipods => &mut self.ipods,
            DeviceClass::Watches => &mut self.watches,
        }
    }

    pub fn requested(&self, class: DeviceClass) -> u32 {
        u32::try_from(self.devices(class).len()).unwrap_or(u32::MAX)
    }

    pub fn total_requested(&self) -> u32 {
        DeviceClass::ALL
            .into_iter()
            .map(|class| self.requested(class))
            .fold(0, u32::saturating_add)
    }

    pub fn is_at_limit(&self, class: DeviceClass) -> bool {
        self.device_types_reached_limit.contains(&class)
    }

    pub fn all_devices_can_be_registered(&self) -> bool {
        self.device_types_reached_limit.is_empty()
    }

    pub fn capacity(&self) -> RegistrationCapacity {
        if self.device_types_reached_limit.is_empty() {
            return RegistrationCapacity::AllWithinLimit;
        }

        let all_at_limit = DeviceClass::ALL
            .into_iter()
            .filter(|&class| self.requested(class) > 0)
            .all(|class| self.is_at_limit(class));
        if all_at_limit {
            RegistrationCapacity::AllAtLimit
        } else {
            RegistrationCapacity::SomeAtLimit(self.device_types_reached_limit.clone())
        }
    }

    /// Devices in classes that still have capacity
    pub fn registrable(&self) -> Vec<&UnprovisionedDevice> {
        DeviceClass::ALL
            .into_iter()
            .filter(|&class| !self.is_at_limit(class))
            .flat_map(|class| self.devices(class))
            .collect()
    }

    pub fn all_devices(&self) -> Vec<&UnprovisionedDevice> {
        DeviceClass::ALL
            .into_iter()
            .flat_map(|class| self.devices(class))
            .collect()
    }
}

/// Optimistically account for devices just registered
pub fn project_registration<'a>(
    availability: &mut AvailabilityOfDevices,
    registered: impl IntoIterator<Item = &'a UnprovisionedDevice>,
) {
    for device in registered {
        let capacity = availability.get_mut(classify_device(&device.device_name));
        capacity.available = capacity.available.saturating_sub(1);
        capacity.registered = capacity.registered.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceCapacity;

    fn device(udid: &str, name: &str) -> UnprovisionedDevice {
        UnprovisionedDevice {
            udid: udid.to_string(),
            device_name: name.to_string(),
            model: None,
            owner_email: None,
        }
    }

    fn availability(iphones: u32, ipads: u32) -> AvailabilityOfDevices {
        let mut availability = AvailabilityOfDevices::default();
        availability.iphones = DeviceCapacity {
            registered: 100 - iphones,
            available: iphones,
            maximum: 100,
        };
        availability.ipads = DeviceCapacity {
            registered: 100 - ipads,
            available: ipads,
            maximum: 100,
        };
        availability
    }

    #[test]
    fn test_classify_device() {
        assert_eq!(classify_device("Ann's iPad Pro"), DeviceClass::Ipads);
        assert_eq!(classify_device("IPOD touch"), DeviceClass::Ipods);
        assert_eq!(classify_device("Apple Watch Series 9"), DeviceClass::Watches);
        assert_eq!(classify_device("iPhone 15"), DeviceClass::Iphones);
        assert_eq!(classify_device("Test rig 4"), DeviceClass::Iphones);
    }

    #[test]
    fn test_partial_capacity() {
        let devices = vec![
            device("1", "iPhone 14"),
            device("2", "iPhone 15"),
            device("3", "iPad Air"),
        ];
        let result = DevicesToBeRegistered::compute(devices, &availability(2, 0));

        assert_eq!(result.requested(DeviceClass::Iphones), 2);
        assert_eq!(result.requested(DeviceClass::Ipads), 1);
        assert_eq!(result.device_types_reached_limit, vec![DeviceClass::Ipads]);
        assert!(!result.all_devices_can_be_registered());
        assert_eq!(
            result.capacity(),
            RegistrationCapacity::SomeAtLimit(vec![DeviceClass::Ipads])
        );

        let udids: Vec<&str> = result.registrable().iter().map(|d| d.udid.as_str()).collect();
        assert_eq!(udids, vec!["1", "2"]);
    }

    #[test]
    fn test_equal_capacity_is_within_limit() {
        let devices = vec![device("1", "iPhone"), device("2", "iPhone")];
        let result = DevicesToBeRegistered::compute(devices, &availability(2, 0));
        assert_eq!(result.capacity(), RegistrationCapacity::AllWithinLimit);
    }

    #[test]
    fn test_all_at_limit() {
        let devices = vec![device("1", "iPad"), device("2", "iPhone")];
        let result = DevicesToBeRegistered::compute(devices, &availability(0, 0));
        assert_eq!(result.capacity(), RegistrationCapacity::AllAtLimit);
        assert!(result.registrable().is_empty());
    }

    #[test]
    fn test_no_devices_is_within_limit() {
        let result = DevicesToBeRegistered::compute(Vec::new(), &availability(0, 0));
        assert_eq!(result.capacity(), RegistrationCapacity::AllWithinLimit);
        assert_eq!(result.total_requested(), 0);
    }

    #[test]
    fn test_projection_saturates() {
        let mut avail = availability(1, 5);
        let devices = vec![device("1", "iPhone"), device("2", "iPhone"), device("3", "iPad")];
        project_registration(&mut avail, &devices);

        assert_eq!(avail.iphones.available, 0);
        assert_eq!(avail.iphones.registered, 101);
        assert_eq!(avail.ipads.available, 4);
        assert_eq!(avail.ipads.registered, 96);
    }
}
