use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use splitlink_transport::ConnectionHandle;
use tracing::debug;

use crate::config::ChannelConfig;
use crate::error::RegistryError;

/// Opaque handle naming the device a logical channel is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(Arc<str>);

impl DeviceHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceHandle {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DeviceHandle {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A decoded inbound message handed to a consumer.
#[derive(Debug)]
pub struct Delivery<'a> {
    pub channel_id: u32,
    pub device: &'a DeviceHandle,
    /// Peer the bytes came from, when the role has more than one.
    pub source: Option<ConnectionHandle>,
    pub payload: &'a Bytes,
}

/// Consumer callback. Runs on the dispatch worker; a slow callback delays
/// every later delivery.
pub type ReceiveCallback = Arc<dyn Fn(&Delivery<'_>) + Send + Sync>;

/// One logical channel.
pub struct Channel {
    id: u32,
    device: DeviceHandle,
    callback: RwLock<Option<ReceiveCallback>>,
}

impl Channel {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Current callback. The clone lets callers invoke it without holding the lock.
    pub fn receive_callback(&self) -> Option<ReceiveCallback> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_callback(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn replace_callback(&self, callback: Option<ReceiveCallback>) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = callback;
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// Shared reference to a registered channel.
pub type ChannelRef = Arc<Channel>;

/// Maps channel identifiers and devices to logical channels.
///
/// Populated once at startup; afterwards only the per-channel callbacks
/// change.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<ChannelRef>,
    by_id: HashMap<u32, usize>,
    by_device: HashMap<DeviceHandle, usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the configured channel list, in order.
    ///
    /// Fails on the first duplicate id or device.
    pub fn from_config(channels: &[ChannelConfig]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for channel in channels {
            registry.register(channel.channel_id, DeviceHandle::new(channel.device.as_str()))?;
        }
        Ok(registry)
    }

    /// Register a channel.
    pub fn register(
        &mut self,
        channel_id: u32,
        device: impl Into<DeviceHandle>,
    ) -> Result<ChannelRef, RegistryError> {
        let device = device.into();
        if self.by_id.contains_key(&channel_id) {
            return Err(RegistryError::DuplicateChannel(channel_id));
        }
        if self.by_device.contains_key(&device) {
            return Err(RegistryError::DuplicateDevice(device.name().to_string()));
        }

        let channel = Arc::new(Channel {
            id: channel_id,
            device: device.clone(),
            callback: RwLock::new(None),
        });
        let index = self.channels.len();
        self.channels.push(Arc::clone(&channel));
        self.by_id.insert(channel_id, index);
        self.by_device.insert(device, index);
        debug!(channel_id, device = %channel.device, "channel registered");
        Ok(channel)
    }

    /// Find the channel for an inbound frame. `None` means "no destination".
    pub fn lookup(&self, channel_id: u32) -> Option<ChannelRef> {
        self.by_id
            .get(&channel_id)
            .map(|&index| Arc::clone(&self.channels[index]))
    }

    /// Find the channel bound to a device.
    pub fn lookup_device(&self, device: &DeviceHandle) -> Option<ChannelRef> {
        self.by_device
            .get(device)
            .map(|&index| Arc::clone(&self.channels[index]))
    }

    /// Attach the consumer callback for a device. Replaces any earlier one.
    pub fn set_receive_callback<F>(&self, device: &DeviceHandle, callback: F) -> Result<(), RegistryError>
    where
        F: Fn(&Delivery<'_>) + Send + Sync + 'static,
    {
        let channel = self.channel_for(device)?;
        channel.replace_callback(Some(Arc::new(callback)));
        debug!(channel_id = channel.id, %device, "receive callback set");
        Ok(())
    }

    /// Detach the consumer callback for a device.
    pub fn clear_receive_callback(&self, device: &DeviceHandle) -> Result<(), RegistryError> {
        self.channel_for(device)?.replace_callback(None);
        Ok(())
    }

    /// Registered channels in registration order.
    pub fn channels(&self) -> &[ChannelRef] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn channel_for(&self, device: &DeviceHandle) -> Result<&ChannelRef, RegistryError> {
        self.by_device
            .get(device)
            .map(|&index| &self.channels[index])
            .ok_or_else(|| RegistryError::UnknownDevice(device.name().to_string()))
    }
}
