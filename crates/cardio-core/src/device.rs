use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capability flags and limits fixed when the medium is attached.
#[derive(Clone, Debug)]
pub struct DeviceCaps {
    /// Data commands take a sector number; byte-addressed media take a
    /// byte offset instead.
    pub block_addressed: bool,
    /// Removable media (SD-like) get evicted by recovery instead of
    /// failing requests forever.
    pub removable: bool,
    pub supports_multi_block: bool,
    pub read_only: bool,
    /// Transport limit on blocks per data command.
    pub max_block_count: u32,
    /// Relative address used in status-class command arguments.
    pub relative_address: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            block_addressed: true,
            removable: true,
            supports_multi_block: true,
            read_only: false,
            max_block_count: 1024,
            relative_address: 1,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(300),
        }
    }
}

/// The attached card/media. Owned by the registry, shared with the engine;
/// the attached flag is the only mutable field.
#[derive(Debug)]
pub struct DeviceHandle {
    slot: usize,
    caps: DeviceCaps,
    attached: AtomicBool,
}

impl DeviceHandle {
    fn new(slot: usize, caps: DeviceCaps) -> Self {
        Self {
            slot,
            caps,
            attached: AtomicBool::new(true),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Mark the medium gone. Returns false when it already was.
    pub fn detach(&self) -> bool {
        self.attached.swap(false, Ordering::AcqRel)
    }

    /// Argument for status-class commands addressed to this device.
    pub fn status_argument(&self) -> u32 {
        u32::from(self.caps.relative_address) << 16
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot is occupied.
    NoFreeSlot,
    /// The slot index does not name an attached device.
    UnknownSlot,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NoFreeSlot => f.write_str("no free device slot"),
            RegistryError::UnknownSlot => f.write_str("unknown device slot"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Slot-index to device-handle table.
///
/// Owns the slot assignment explicitly; callers hold a reference to the
/// registry rather than reaching for process-wide state.
pub struct DeviceRegistry {
    slots: Vec<Option<Arc<DeviceHandle>>>,
}

impl DeviceRegistry {
    pub fn with_slots(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    /// Bind a newly probed medium to the lowest free slot.
    pub fn attach(&mut self, caps: DeviceCaps) -> Result<Arc<DeviceHandle>, RegistryError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::NoFreeSlot)?;
        let handle = Arc::new(DeviceHandle::new(slot, caps));
        self.slots[slot] = Some(handle.clone());
        Ok(handle)
    }

    /// Release a slot and mark its handle detached.
    pub fn detach(&mut self, slot: usize) -> Result<Arc<DeviceHandle>, RegistryError> {
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(RegistryError::UnknownSlot)?;
        let handle = entry.take().ok_or(RegistryError::UnknownSlot)?;
        handle.detach();
        Ok(handle)
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<DeviceHandle>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn attached_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_uses_lowest_free_slot() {
        let mut registry = DeviceRegistry::with_slots(3);
        let a = registry.attach(DeviceCaps::default()).unwrap();
        let b = registry.attach(DeviceCaps::default()).unwrap();
        assert_eq!(a.slot(), 0);
        assert_eq!(b.slot(), 1);

        registry.detach(0).unwrap();
        let c = registry.attach(DeviceCaps::default()).unwrap();
        assert_eq!(c.slot(), 0);
    }

    #[test]
    fn attach_fails_when_full() {
        let mut registry = DeviceRegistry::with_slots(1);
        registry.attach(DeviceCaps::default()).unwrap();
        assert!(matches!(
            registry.attach(DeviceCaps::default()),
            Err(RegistryError::NoFreeSlot)
        ));
    }

    #[test]
    fn detach_marks_handle_gone() {
        let mut registry = DeviceRegistry::with_slots(1);
        let handle = registry.attach(DeviceCaps::default()).unwrap();
        assert!(handle.is_attached());
        registry.detach(0).unwrap();
        assert!(!handle.is_attached());
        assert!(matches!(registry.detach(0), Err(RegistryError::UnknownSlot)));
    }
}
