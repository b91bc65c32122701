// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (swapchain extension + complete queue families)
// - Queue family resolution for the graphics / present / transfer roles
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::instance::VulkanInstance;
use super::surface::Surface;
use crate::error::RendererError;

/// Queue family index per role; each stays `None` until resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilySelection {
    /// Scan the families once. Graphics and present take the first family
    /// that qualifies; transfer takes the first transfer-capable family
    /// without graphics and otherwise shares the graphics family.
    pub fn resolve<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut selection = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            let flags = family.queue_flags;

            if selection.graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                selection.graphics = Some(index);
            }

            if selection.present.is_none() && supports_present(index)? {
                selection.present = Some(index);
            }

            if selection.transfer.is_none()
                && flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                selection.transfer = Some(index);
            }
        }

        if selection.transfer.is_none() {
            selection.transfer = selection.graphics;
        }

        Ok(selection)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some() && self.transfer.is_some()
    }

    /// Distinct family indices in role order (graphics, present, transfer).
    pub fn unique_indices(&self) -> Vec<u32> {
        let mut indices = Vec::with_capacity(3);
        for index in [self.graphics, self.present, self.transfer].into_iter().flatten() {
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
        indices
    }
}

/// Resolved queue families of the chosen device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn unique_indices(&self) -> Vec<u32> {
        QueueFamilySelection::from(*self).unique_indices()
    }
}

impl From<QueueFamilies> for QueueFamilySelection {
    fn from(families: QueueFamilies) -> Self {
        Self {
            graphics: Some(families.graphics),
            present: Some(families.present),
            transfer: Some(families.transfer),
        }
    }
}

impl TryFrom<QueueFamilySelection> for QueueFamilies {
    type Error = RendererError;

    fn try_from(selection: QueueFamilySelection) -> Result<Self, Self::Error> {
        match (selection.graphics, selection.present, selection.transfer) {
            (Some(graphics), Some(present), Some(transfer)) => Ok(Self {
                graphics,
                present,
                transfer,
            }),
            _ => Err(RendererError::NoSuitableDevice),
        }
    }
}

/// Pick the first physical device that has every extension in
/// `required_extensions` and a complete queue family selection.
pub fn select_device(
    instance: &ash::Instance,
    surface: Option<&Surface>,
    required_extensions: &[&CStr],
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    let found = first_suitable(devices, |&device| {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

        let has_required = has_extensions(instance, device, required_extensions)
            .with_context(|| format!("Failed to query extensions of {}", name))?;
        if !has_required {
            log::debug!("Skipping {}: missing required extensions", name);
            return Ok(None);
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let selection = QueueFamilySelection::resolve(&families, |index| match surface {
            Some(surface) => surface.supports_present(device, index),
            // Headless: presentation is never exercised, any graphics family will do.
            None => Ok(families[index as usize]
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS)),
        })
        .with_context(|| format!("Failed to query queue families of {}", name))?;

        if !selection.is_complete() {
            log::debug!("Skipping {}: incomplete queue families {:?}", name, selection);
            return Ok(None);
        }

        log::info!("Selected GPU: {}", name);
        Ok(Some(QueueFamilies::try_from(selection)?))
    });

    found.ok_or_else(|| RendererError::NoSuitableDevice.into())
}

/// The first candidate `qualify` accepts. A candidate whose check fails is
/// logged and skipped; the search goes on with the next one.
fn first_suitable<D, T>(
    candidates: impl IntoIterator<Item = D>,
    mut qualify: impl FnMut(&D) -> Result<Option<T>>,
) -> Option<(D, T)> {
    candidates
        .into_iter()
        .find_map(|candidate| match qualify(&candidate) {
            Ok(Some(found)) => Some((candidate, found)),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Skipping adapter: {:#}", e);
                None
            }
        })
}

fn has_extensions(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    required: &[&CStr],
) -> Result<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
    Ok(required.iter().all(|&name| {
        available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
    }))
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles; present and transfer may alias graphics
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Select a GPU and create the logical device. With `surface` set, the
    /// device must be able to present to it; without one the device is
    /// headless and the swapchain extension is not required.
    pub fn new(instance: Arc<VulkanInstance>, surface: Option<&Surface>) -> Result<Arc<Self>> {
        let required_extensions: &[&CStr] = match surface {
            Some(_) => &[khr::Swapchain::name()],
            None => &[],
        };

        let (physical_device, queue_families) =
            select_device(&instance.instance, surface, required_extensions)?;
        log::info!("Queue families: {:?}", queue_families);

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = queue_families
            .unique_indices()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_extensions.iter().map(|name| name.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.present, 0),
                device.get_device_queue(queue_families.transfer, 0),
            )
        };

        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families,
            memory_properties,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
        }
    }
}
