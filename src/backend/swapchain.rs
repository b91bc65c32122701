// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Every creation re-queries the surface, since capabilities change across
// resizes.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::{QueueFamilies, VulkanDevice};
use super::surface::{Surface, SurfaceSupport};

/// The format/color space pair preferred for presentation.
pub const CANONICAL_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface has no preference.
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(CANONICAL_SURFACE_FORMAT);
        }
    }

    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == CANONICAL_SURFACE_FORMAT.format
                && f.color_space == CANONICAL_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// Use `preferred` when offered, otherwise FIFO (always supported).
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, unless it reports the `u32::MAX` sentinel;
/// then the drawable size clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: drawable.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: drawable.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// The extent a swapchain would get, or `None` when either the drawable or
/// the surface has zero area and no swapchain can be created.
pub fn presentable_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> Option<vk::Extent2D> {
    let has_area = |e: vk::Extent2D| e.width > 0 && e.height > 0;
    if !has_area(drawable) {
        return None;
    }
    Some(choose_extent(capabilities, drawable)).filter(|&e| has_area(e))
}

/// Every decision needed to create a swapchain, derived from what the
/// surface reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Distinct queue families; more than one means concurrent sharing
    pub sharing_families: Vec<u32>,
}

impl SwapchainPlan {
    pub fn new(
        support: &SurfaceSupport,
        drawable: vk::Extent2D,
        families: &QueueFamilies,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let surface_format =
            choose_surface_format(&support.formats).context("Surface reports no formats")?;

        Ok(Self {
            image_count: choose_image_count(&support.capabilities),
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(&support.capabilities, drawable),
            pre_transform: support.capabilities.current_transform,
            sharing_families: families.unique_indices(),
        })
    }

    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.sharing_families.len() == 1 {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        }
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The image is usable; `suboptimal` asks for a rebuild after this frame.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface. Nothing was signaled.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; the swapchain must be rebuilt.
    Stale,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create a swapchain for `surface`. Passing the previous swapchain lets
    /// the driver recycle its resources; the caller destroys it afterwards.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        drawable: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        previous: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = surface.query_support(device.physical_device)?;
        let plan = SwapchainPlan::new(
            &support,
            drawable,
            &device.queue_families,
            preferred_present_mode,
        )?;

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            plan.extent.width,
            plan.extent.height,
            plan.image_count,
            plan.surface_format.format,
            plan.present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance.instance, &device.device);

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing_mode())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |s| s.swapchain));
        if plan.sharing_mode() == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&plan.sharing_families);
        }

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: plan.surface_format.format,
            extent: plan.extent,
            present_mode: plan.present_mode,
            device,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &this.images {
            let view = create_image_view(&this.device, image, this.format)?;
            this.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", this.images.len());
        Ok(this)
    }

    /// Release the views ahead of the swapchain handle, so a rebuild can tear
    /// down everything but the handle it passes to the successor.
    pub fn destroy_image_views(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
        }
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to acquire swapchain image")),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to present")),
        }
    }
}

fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&create_info, None) }
        .context("Failed to create image view")
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    const GRAPHICS_ONLY: QueueFamilies = QueueFamilies {
        graphics: 0,
        present: 0,
        transfer: 0,
    };

    #[test]
    fn image_count_is_min_plus_one() {
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn image_count_is_capped_by_max() {
        assert_eq!(choose_image_count(&capabilities(2, 2)), 2);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
    }

    #[test]
    fn canonical_format_wins_regardless_of_position() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            CANONICAL_SURFACE_FORMAT,
        ];
        assert_eq!(choose_surface_format(&formats), Some(CANONICAL_SURFACE_FORMAT));
    }

    #[test]
    fn canonical_format_needs_matching_color_space() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn undefined_placeholder_yields_canonical_format() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(choose_surface_format(&formats), Some(CANONICAL_SURFACE_FORMAT));
    }

    #[test]
    fn no_formats_is_none() {
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_requested_then_fifo() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&all, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[], vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn reported_extent_is_used_verbatim() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = extent(800, 600);
        assert_eq!(choose_extent(&caps, extent(1600, 900)), extent(800, 600));
    }

    #[test]
    fn extent_inside_bounds_is_unchanged() {
        let caps = capabilities(2, 3);
        assert_eq!(choose_extent(&caps, extent(1600, 900)), extent(1600, 900));
        assert_eq!(choose_extent(&caps, extent(1, 4096)), extent(1, 4096));
    }

    #[test]
    fn extent_is_clamped_componentwise() {
        let mut caps = capabilities(2, 3);
        caps.min_image_extent = extent(200, 100);
        caps.max_image_extent = extent(1920, 1080);

        let requests = [
            (0, 0),
            (100, 5000),
            (5000, 100),
            (640, 480),
            (1920, 1080),
            (u32::MAX - 1, 1),
        ];
        for (width, height) in requests {
            let chosen = choose_extent(&caps, extent(width, height));
            assert!((200..=1920).contains(&chosen.width), "{:?}", chosen);
            assert!((100..=1080).contains(&chosen.height), "{:?}", chosen);
        }
        assert_eq!(choose_extent(&caps, extent(5000, 50)), extent(1920, 100));
    }

    #[test]
    fn zero_area_surface_is_not_presentable() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = extent(0, 0);
        assert_eq!(presentable_extent(&caps, extent(1600, 900)), None);

        caps.current_extent = extent(800, 0);
        assert_eq!(presentable_extent(&caps, extent(1600, 900)), None);
    }

    #[test]
    fn zero_area_drawable_is_not_presentable() {
        let caps = capabilities(2, 3);
        assert_eq!(presentable_extent(&caps, extent(0, 900)), None);
        assert_eq!(presentable_extent(&caps, extent(1600, 0)), None);
    }

    #[test]
    fn presentable_extent_matches_chosen_extent() {
        let mut caps = capabilities(2, 3);
        assert_eq!(
            presentable_extent(&caps, extent(1600, 900)),
            Some(extent(1600, 900))
        );
        caps.current_extent = extent(800, 600);
        assert_eq!(
            presentable_extent(&caps, extent(1600, 900)),
            Some(extent(800, 600))
        );
    }

    #[test]
    fn sharing_mode_follows_distinct_families() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3),
            formats: vec![CANONICAL_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let plan =
            SwapchainPlan::new(&support, extent(640, 480), &GRAPHICS_ONLY, vk::PresentModeKHR::MAILBOX)
                .unwrap();
        assert_eq!(plan.sharing_mode(), vk::SharingMode::EXCLUSIVE);

        let split = QueueFamilies {
            graphics: 0,
            present: 1,
            transfer: 2,
        };
        let plan = SwapchainPlan::new(&support, extent(640, 480), &split, vk::PresentModeKHR::MAILBOX)
            .unwrap();
        assert_eq!(plan.sharing_mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(plan.sharing_families, vec![0, 1, 2]);
    }

    #[test]
    fn end_to_end_plan_for_default_window() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3),
            formats: vec![CANONICAL_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let plan = SwapchainPlan::new(
            &support,
            extent(1600, 900),
            &GRAPHICS_ONLY,
            vk::PresentModeKHR::MAILBOX,
        )
        .unwrap();

        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.surface_format, CANONICAL_SURFACE_FORMAT);
        assert_eq!(plan.extent, extent(1600, 900));
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn replanning_with_unchanged_inputs_is_identical() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3),
            formats: vec![CANONICAL_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let plan = |_| {
            SwapchainPlan::new(&support, extent(1024, 768), &GRAPHICS_ONLY, vk::PresentModeKHR::MAILBOX)
                .unwrap()
        };
        assert_eq!(plan(0), plan(1));
    }

    #[test]
    fn surface_without_formats_cannot_be_planned() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(
            SwapchainPlan::new(&support, extent(640, 480), &GRAPHICS_ONLY, vk::PresentModeKHR::FIFO)
                .is_err()
        );
    }
}
