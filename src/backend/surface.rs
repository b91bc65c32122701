// Surface - bridge from the native window to a VkSurfaceKHR
//
// Also the query point for everything swapchain creation needs to know
// about the surface (capabilities, formats, present modes).

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::instance::VulkanInstance;
use crate::error::RendererError;

/// What the surface supports for one physical device, queried fresh on
/// every swapchain (re)creation.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new(
        instance: Arc<VulkanInstance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let surface = unsafe { Self::create_platform_surface(&instance, display_handle, window_handle) }
            .map_err(|e| RendererError::SurfaceCreation(e.to_string()))?;
        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    unsafe fn create_platform_surface(
        instance: &VulkanInstance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        let entry = &instance.entry;
        let ash_instance = &instance.instance;

        let surface = match (display_handle, window_handle) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as vk::HINSTANCE;
                let hwnd = handle.hwnd.get() as vk::HWND;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                khr::Win32Surface::new(entry, ash_instance).create_win32_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
                let dpy = display
                    .display
                    .context("Xlib display handle is null")?
                    .as_ptr() as *mut vk::Display;
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy)
                    .window(window.window as vk::Window);
                khr::XlibSurface::new(entry, ash_instance).create_xlib_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
                let connection = display
                    .connection
                    .context("XCB connection handle is null")?
                    .as_ptr() as *mut vk::xcb_connection_t;
                let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection)
                    .window(window.window.get() as vk::xcb_window_t);
                khr::XcbSurface::new(entry, ash_instance).create_xcb_surface(&create_info, None)?
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr() as *mut vk::wl_display)
                    .surface(window.surface.as_ptr() as *mut vk::wl_surface);
                khr::WaylandSurface::new(entry, ash_instance)
                    .create_wayland_surface(&create_info, None)?
            }
            _ => anyhow::bail!("Unsupported window handle type"),
        };

        Ok(surface)
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }?;
        Ok(supported)
    }

    pub fn query_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .context("Failed to query surface capabilities")?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .context("Failed to query surface formats")?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .context("Failed to query present modes")?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
