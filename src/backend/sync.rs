// Synchronization primitives
//
// Semaphores order acquire -> render -> present on the GPU; the fence keeps
// the CPU from reusing a slot whose previous submission is still running.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let (image_available, render_finished, in_flight_fence) = create_slot(
            || Ok(unsafe { device.device.create_semaphore(&semaphore_info, None) }?),
            || Ok(unsafe { device.device.create_fence(&fence_info, None) }?),
            |semaphore| unsafe { device.device.destroy_semaphore(semaphore, None) },
        )?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Block until the last submission that used this slot has completed.
    pub fn wait(&self, device: &VulkanDevice) -> Result<()> {
        unsafe {
            device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }
        .context("Failed waiting for in-flight fence")
    }

    pub fn reset(&self, device: &VulkanDevice) -> Result<()> {
        unsafe { device.device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Create two semaphores then a fence. A failure releases the semaphores
/// already created before the error is returned.
fn create_slot<S: Copy, F>(
    mut semaphore: impl FnMut() -> Result<S>,
    fence: impl FnOnce() -> Result<F>,
    mut release: impl FnMut(S),
) -> Result<(S, S, F)> {
    let image_available = semaphore().context("Failed to create image-available semaphore")?;

    let render_finished = match semaphore() {
        Ok(semaphore) => semaphore,
        Err(e) => {
            release(image_available);
            return Err(e.context("Failed to create render-finished semaphore"));
        }
    };

    match fence() {
        Ok(fence) => Ok((image_available, render_finished, fence)),
        Err(e) => {
            release(render_finished);
            release(image_available);
            Err(e.context("Failed to create in-flight fence"))
        }
    }
}

/// Ring of `FrameSync` slots. One slot means exactly one frame in flight.
pub struct FramesInFlight {
    slots: Vec<FrameSync>,
    current: usize,
    device: Arc<VulkanDevice>,
}

impl FramesInFlight {
    pub fn new(device: &Arc<VulkanDevice>, count: usize) -> Result<Self> {
        let mut this = Self {
            slots: Vec::with_capacity(count),
            current: 0,
            device: device.clone(),
        };
        for _ in 0..count.max(1) {
            this.slots.push(FrameSync::new(device)?);
        }
        Ok(this)
    }

    pub fn current(&self) -> &FrameSync {
        &self.slots[self.current]
    }

    pub fn advance(&mut self) {
        self.current = next_slot(self.current, self.slots.len());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for FramesInFlight {
    fn drop(&mut self) {
        for sync in &self.slots {
            sync.destroy(&self.device.device);
        }
    }
}

pub fn next_slot(current: usize, count: usize) -> usize {
    (current + 1) % count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Hands out numbered handles and fails on the `fail_at`-th creation.
    struct Handles {
        created: Cell<u32>,
        fail_at: u32,
        released: RefCell<Vec<u32>>,
    }

    impl Handles {
        fn failing_at(fail_at: u32) -> Self {
            Self {
                created: Cell::new(0),
                fail_at,
                released: RefCell::new(Vec::new()),
            }
        }

        fn create(&self) -> Result<u32> {
            let next = self.created.get() + 1;
            if next == self.fail_at {
                anyhow::bail!("out of device memory");
            }
            self.created.set(next);
            Ok(next)
        }

        fn build(&self) -> Result<(u32, u32, u32)> {
            create_slot(
                || self.create(),
                || self.create(),
                |h| self.released.borrow_mut().push(h),
            )
        }
    }

    #[test]
    fn complete_slot_releases_nothing() {
        let handles = Handles::failing_at(0);
        assert_eq!(handles.build().unwrap(), (1, 2, 3));
        assert!(handles.released.borrow().is_empty());
    }

    #[test]
    fn failed_first_semaphore_leaves_nothing_to_release() {
        let handles = Handles::failing_at(1);
        assert!(handles.build().is_err());
        assert!(handles.released.borrow().is_empty());
    }

    #[test]
    fn failed_second_semaphore_releases_the_first() {
        let handles = Handles::failing_at(2);
        let err = handles.build().unwrap_err();
        assert!(format!("{:#}", err).contains("render-finished"));
        assert_eq!(*handles.released.borrow(), vec![1]);
    }

    #[test]
    fn failed_fence_releases_both_semaphores() {
        let handles = Handles::failing_at(3);
        let err = handles.build().unwrap_err();
        assert!(format!("{:#}", err).contains("in-flight fence"));
        assert_eq!(*handles.released.borrow(), vec![2, 1]);
    }

    #[test]
    fn single_slot_always_reuses_itself() {
        assert_eq!(next_slot(0, 1), 0);
    }

    #[test]
    fn slots_cycle_in_order() {
        let visited: Vec<_> = std::iter::successors(Some(0), |&s| Some(next_slot(s, 3)))
            .take(7)
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }
}
