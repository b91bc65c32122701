// Vulkan Instance - loader entry, instance, validation
//
// Responsibilities:
// - Load the Vulkan library
// - Enable the surface extensions the window platform needs
// - Enable validation + a debug messenger routed into `log`

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::error::RendererError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Windowing systems we know how to bridge into a `VkSurfaceKHR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlatform {
    Win32,
    Xlib,
    Xcb,
    Wayland,
}

impl WindowPlatform {
    pub fn from_display_handle(handle: RawDisplayHandle) -> Result<Self, RendererError> {
        match handle {
            RawDisplayHandle::Windows(_) => Ok(Self::Win32),
            RawDisplayHandle::Xlib(_) => Ok(Self::Xlib),
            RawDisplayHandle::Xcb(_) => Ok(Self::Xcb),
            RawDisplayHandle::Wayland(_) => Ok(Self::Wayland),
            other => Err(RendererError::SurfaceCreation(format!(
                "unsupported display handle {:?}",
                other
            ))),
        }
    }
}

/// Instance extensions needed to create a surface on `platform`.
pub fn required_surface_extensions(platform: WindowPlatform) -> [&'static CStr; 2] {
    let platform_surface = match platform {
        WindowPlatform::Win32 => khr::Win32Surface::name(),
        WindowPlatform::Xlib => khr::XlibSurface::name(),
        WindowPlatform::Xcb => khr::XcbSurface::name(),
        WindowPlatform::Wayland => khr::WaylandSurface::name(),
    };
    [khr::Surface::name(), platform_surface]
}

pub struct VulkanInstance {
    pub instance: ash::Instance,
    pub entry: Entry,
    /// `None` for headless instances
    pub platform: Option<WindowPlatform>,
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance able to present on `platform`, or a headless one
    /// when `platform` is `None`.
    pub fn new(
        app_name: &str,
        platform: Option<WindowPlatform>,
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation layer requested but not installed");
        }

        let app_name_cstr = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"quad-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions: Vec<*const std::os::raw::c_char> = platform
            .map(required_surface_extensions)
            .into_iter()
            .flatten()
            .map(CStr::as_ptr)
            .collect();
        if validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            instance,
            entry,
            platform,
            debug_utils,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() };
        layers
            .map(|layers| {
                layers.iter().any(|layer| {
                    (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
                })
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn every_platform_needs_the_base_surface_extension() {
        for platform in [
            WindowPlatform::Win32,
            WindowPlatform::Xlib,
            WindowPlatform::Xcb,
            WindowPlatform::Wayland,
        ] {
            let [base, _] = required_surface_extensions(platform);
            assert_eq!(base, c"VK_KHR_surface");
        }
    }

    #[test]
    fn platform_extension_names() {
        assert_eq!(
            required_surface_extensions(WindowPlatform::Win32)[1],
            c"VK_KHR_win32_surface"
        );
        assert_eq!(
            required_surface_extensions(WindowPlatform::Xlib)[1],
            c"VK_KHR_xlib_surface"
        );
        assert_eq!(
            required_surface_extensions(WindowPlatform::Xcb)[1],
            c"VK_KHR_xcb_surface"
        );
        assert_eq!(
            required_surface_extensions(WindowPlatform::Wayland)[1],
            c"VK_KHR_wayland_surface"
        );
    }

    #[test]
    fn platform_from_display_handle() {
        let windows = RawDisplayHandle::Windows(WindowsDisplayHandle::new());
        assert_eq!(
            WindowPlatform::from_display_handle(windows).unwrap(),
            WindowPlatform::Win32
        );

        let mut display = 0u8;
        let wayland = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(
            NonNull::from(&mut display).cast(),
        ));
        assert_eq!(
            WindowPlatform::from_display_handle(wayland).unwrap(),
            WindowPlatform::Wayland
        );
    }

    #[test]
    fn unsupported_display_is_a_surface_error() {
        let web = RawDisplayHandle::Web(raw_window_handle::WebDisplayHandle::new());
        assert!(matches!(
            WindowPlatform::from_display_handle(web),
            Err(RendererError::SurfaceCreation(_))
        ));
    }
}
