// Synchronization primitives
//
// Fences for CPU-GPU sync (command list reuse, image acquisition) and the
// per-image semaphores that order presentation after rendering.

use anyhow::{Context, Result};
use ash::vk;

/// Create a fence, optionally already signalled so the first wait returns immediately.
pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::default().flags(flags);

    unsafe { device.create_fence(&fence_info, None) }.context("Failed to create fence")
}

pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    unsafe { device.create_semaphore(&semaphore_info, None) }.context("Failed to create semaphore")
}

/// Block until `fence` is signalled, then reset it.
pub fn wait_and_reset(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe {
        device
            .wait_for_fences(&[fence], true, u64::MAX)
            .context("Failed to wait for fence")?;
        device
            .reset_fences(&[fence])
            .context("Failed to reset fence")?;
    }
    Ok(())
}

/// Semaphores a submission rendering into swapchain images waits on and signals.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PresentSemaphores {
    /// Already signalled and not yet consumed by a present: waited on, then signalled again
    pub wait: Vec<vk::Semaphore>,
    pub signal: Vec<vk::Semaphore>,
}

/// A binary semaphore must be unsignalled before it is signalled again, so a
/// second submission into the same image before the present chains through
/// the pending signal instead of repeating it.
pub fn chain_present_semaphores(pending: &[vk::Semaphore], requested: &[vk::Semaphore]) -> PresentSemaphores {
    let mut out = PresentSemaphores::default();
    for &semaphore in requested {
        if out.signal.contains(&semaphore) {
            continue;
        }
        if pending.contains(&semaphore) {
            out.wait.push(semaphore);
        }
        out.signal.push(semaphore);
    }
    out
}

/// Presentation synchronization - one per swapchain
///
/// Null handles until created, so a partially built swapchain can always be destroyed.
#[derive(Default)]
pub struct PresentSync {
    /// Signalled when the acquired image is ready to be rendered to
    pub image_acquired: vk::Fence,
    /// One per swapchain image, signalled by the submission that renders into it
    pub render_finished: Vec<vk::Semaphore>,
}

impl PresentSync {
    pub fn create_fence(&mut self, device: &ash::Device) -> Result<()> {
        self.image_acquired = create_fence(device, false)?;
        Ok(())
    }

    /// Grow to one render-finished semaphore per swapchain image.
    pub fn ensure_image_count(&mut self, device: &ash::Device, image_count: usize) -> Result<()> {
        while self.render_finished.len() < image_count {
            self.render_finished.push(create_semaphore(device)?);
        }
        Ok(())
    }

    pub fn render_finished(&self, image_index: u32) -> Option<vk::Semaphore> {
        self.render_finished.get(image_index as usize).copied()
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.image_acquired, None);
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
        }
        self.image_acquired = vk::Fence::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn semaphore(raw: u64) -> vk::Semaphore {
        vk::Semaphore::from_raw(raw)
    }

    #[test]
    fn fresh_semaphores_are_only_signalled() {
        let a = semaphore(1);
        let b = semaphore(2);
        let chain = chain_present_semaphores(&[], &[a, b]);
        assert!(chain.wait.is_empty());
        assert_eq!(chain.signal, vec![a, b]);
    }

    #[test]
    fn pending_semaphore_is_consumed_before_signalling_again() {
        let a = semaphore(1);
        let b = semaphore(2);
        let chain = chain_present_semaphores(&[a], &[a, b]);
        assert_eq!(chain.wait, vec![a]);
        assert_eq!(chain.signal, vec![a, b]);
    }

    #[test]
    fn repeated_requests_collapse() {
        let a = semaphore(7);
        let chain = chain_present_semaphores(&[a], &[a, a]);
        assert_eq!(chain.wait, vec![a]);
        assert_eq!(chain.signal, vec![a]);
    }

    #[test]
    fn unbuilt_sync_has_no_semaphores() {
        let sync = PresentSync::default();
        assert_eq!(sync.image_acquired, vk::Fence::null());
        assert_eq!(sync.render_finished(0), None);
    }

    #[test]
    fn each_image_gets_its_own_semaphore() {
        let sync = PresentSync {
            image_acquired: vk::Fence::null(),
            render_finished: vec![semaphore(10), semaphore(11), semaphore(12)],
        };
        assert_eq!(sync.render_finished(1), Some(semaphore(11)));
        assert_ne!(sync.render_finished(0), sync.render_finished(2));
        assert_eq!(sync.render_finished(3), None);
    }
}
