use crate::bus::MessageBus;
use modhost_error::HostError;
use modhost_sdk::{BusPublisher, Message, ModuleError, ModuleResult, SubscriberId};
use std::sync::{Arc, Weak};

/// Publishing capability handed to a module at creation.
///
/// Holds a weak reference to the bus: once the gateway is gone every
/// publish fails with `ModuleError::BusClosed` instead of keeping the bus
/// alive.
#[derive(Debug)]
pub struct BusHandle {
    bus: Weak<MessageBus>,
    id: SubscriberId,
}

impl BusHandle {
    pub(crate) fn new(bus: Weak<MessageBus>, id: SubscriberId) -> Self {
        Self { bus, id }
    }

    /// True if this handle was issued by `bus`.
    #[inline]
    pub fn belongs_to(&self, bus: &Arc<MessageBus>) -> bool {
        std::ptr::eq(self.bus.as_ptr(), Arc::as_ptr(bus))
    }
}

impl BusPublisher for BusHandle {
    #[inline]
    fn publish(&self, message: Message) -> ModuleResult<()> {
        let bus = self.bus.upgrade().ok_or(ModuleError::BusClosed)?;
        bus.publish(self.id, message).map(|_| ()).map_err(|e| match e {
            HostError::BusClosed => ModuleError::BusClosed,
            other => ModuleError::ExecutionError(other.to_string()),
        })
    }

    #[inline]
    fn publisher_id(&self) -> SubscriberId {
        self.id
    }
}
