//! Frame pacing and the host/device fence discipline.
//!
//! Each frame slot moves `Idle -> Acquired -> Submitted -> Idle`. A slot
//! leaves `Submitted` only through a host wait on its fence. Swapchain images carry
//! a reference to the fence of the slot that last rendered them, so an image
//! acquired by a different slot is not touched until that work finished.

use std::time::{Duration, Instant};

use ash::vk;
use tessera_gpu::{
    create_fence, reset_fence, wait_for_fence, FrameSync, GpuDevice, GpuError, Result,
};
use tracing::{debug, trace};

/// Number of frames the host may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Host-side view of a frame slot or of the compute fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// A [`FrameToken`] for the slot exists and has not been submitted.
    Acquired,
    Submitted,
}

struct FrameSlot {
    sync: FrameSync,
    state: SlotState,
}

/// Proof that the resources of one swapchain image are free for host writes.
///
/// Only [`FrameScheduler::acquire_image`] creates tokens, after waiting for
/// any submission that still used the image.
#[derive(Debug)]
pub struct FrameToken {
    slot: usize,
    image_index: u32,
    frame_number: u64,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
}

impl FrameToken {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Semaphore the acquire signaled; the graphics submission waits on it.
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Semaphore the graphics submission signals; present waits on it.
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }
}

/// Manages synchronization for multiple frames in flight plus the compute fence.
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    images_in_flight: Vec<Option<vk::Fence>>,
    current_slot: usize,
    frame_count: u64,
    start_time: Instant,
    timeout_ns: u64,
    compute_fence: vk::Fence,
    compute_state: SlotState,
}

impl FrameScheduler {
    /// Create [`MAX_FRAMES_IN_FLIGHT`] slots and the compute fence.
    pub fn new<D: GpuDevice + ?Sized>(
        device: &D,
        image_count: usize,
        timeout_ns: u64,
    ) -> Result<Self> {
        let release = |slots: &[FrameSlot]| {
            for slot in slots {
                slot.sync.destroy(device);
            }
        };

        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            match FrameSync::new(device) {
                Ok(sync) => slots.push(FrameSlot {
                    sync,
                    state: SlotState::Idle,
                }),
                Err(e) => {
                    release(&slots);
                    return Err(e);
                }
            }
        }
        let compute_fence = match create_fence(device, true) {
            Ok(fence) => fence,
            Err(e) => {
                release(&slots);
                return Err(e);
            }
        };

        debug!(
            frames_in_flight = MAX_FRAMES_IN_FLIGHT,
            image_count, "Frame scheduler created"
        );

        Ok(Self {
            slots,
            images_in_flight: vec![None; image_count],
            current_slot: 0,
            frame_count: 0,
            start_time: Instant::now(),
            timeout_ns,
            compute_fence,
            compute_state: SlotState::Idle,
        })
    }

    /// Wait until the current slot's previous submission has completed.
    ///
    /// Returns the semaphore to hand to the swapchain acquire.
    pub fn begin_frame<D: GpuDevice + ?Sized>(&mut self, device: &D) -> Result<vk::Semaphore> {
        let timeout_ns = self.timeout_ns;
        let slot = &mut self.slots[self.current_slot];
        if slot.state == SlotState::Submitted {
            slot.sync.wait(device, timeout_ns)?;
            slot.state = SlotState::Idle;
        }
        Ok(slot.sync.image_available)
    }

    /// Claim swapchain image `image_index` for the current slot.
    ///
    /// If another slot's submission still renders to that image, wait for it
    /// first. The current slot must have been waited on by
    /// [`Self::begin_frame`].
    pub fn acquire_image<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        image_index: u32,
    ) -> Result<FrameToken> {
        if self.slots[self.current_slot].state == SlotState::Submitted {
            return Err(GpuError::InvalidState(format!(
                "Slot {} is still in flight; begin_frame must wait on it first",
                self.current_slot
            )));
        }

        let count = self.images_in_flight.len();
        let index = image_index as usize;
        if index >= count {
            return Err(GpuError::ImageIndexOutOfRange {
                index: image_index,
                count,
            });
        }

        let own_fence = self.slots[self.current_slot].sync.in_flight;
        if let Some(fence) = self.images_in_flight[index] {
            if fence != own_fence {
                trace!(image_index, "Image still in flight on another slot");
                wait_for_fence(device, fence, self.timeout_ns)?;
                if let Some(owner) = self.slots.iter_mut().find(|s| s.sync.in_flight == fence) {
                    owner.state = SlotState::Idle;
                }
            }
        }
        self.images_in_flight[index] = Some(own_fence);

        let slot = &mut self.slots[self.current_slot];
        slot.state = SlotState::Acquired;
        let sync = &slot.sync;
        Ok(FrameToken {
            slot: self.current_slot,
            image_index,
            frame_number: self.frame_count,
            image_available: sync.image_available,
            render_finished: sync.render_finished,
        })
    }

    /// Reset the slot fence and mark the slot submitted.
    ///
    /// The returned fence must be passed to the graphics queue submission.
    pub fn prepare_submit<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        token: &FrameToken,
    ) -> Result<vk::Fence> {
        if token.slot != self.current_slot {
            return Err(GpuError::InvalidState(format!(
                "Token for slot {} submitted while slot {} is current",
                token.slot, self.current_slot
            )));
        }
        let slot = &mut self.slots[self.current_slot];
        match slot.state {
            SlotState::Acquired => {}
            SlotState::Submitted => {
                return Err(GpuError::InvalidState(
                    "Frame slot submitted twice".to_string(),
                ));
            }
            SlotState::Idle => {
                return Err(GpuError::InvalidState(
                    "Frame slot submitted without an acquired image".to_string(),
                ));
            }
        }

        slot.sync.reset(device)?;
        slot.state = SlotState::Submitted;
        Ok(slot.sync.in_flight)
    }

    /// Finish the frame and rotate to the next slot.
    ///
    /// A frame that was never submitted leaves its slot idle.
    pub fn end_frame(&mut self, token: FrameToken) {
        debug_assert_eq!(token.slot, self.current_slot);
        let slot = &mut self.slots[self.current_slot];
        if slot.state == SlotState::Acquired {
            slot.state = SlotState::Idle;
        }
        self.current_slot = (self.current_slot + 1) % self.slots.len();
        self.frame_count += 1;
    }

    /// Wait for every outstanding graphics and compute submission.
    pub fn wait_all<D: GpuDevice + ?Sized>(&mut self, device: &D) -> Result<()> {
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted {
                slot.sync.wait(device, self.timeout_ns)?;
                slot.state = SlotState::Idle;
            }
        }
        self.wait_compute(device)
    }

    /// Whether a [`FrameToken`] is outstanding for the current slot.
    pub fn frame_in_progress(&self) -> bool {
        self.slots[self.current_slot].state == SlotState::Acquired
    }

    /// Forget image ownership after a swapchain rebuild.
    ///
    /// All frames must be idle (see [`Self::wait_all`]).
    pub fn reset_images(&mut self, image_count: usize) -> Result<()> {
        if self.slots.iter().any(|s| s.state != SlotState::Idle) {
            return Err(GpuError::InvalidState(
                "Swapchain images reset while frames are in flight".to_string(),
            ));
        }
        self.images_in_flight = vec![None; image_count];
        Ok(())
    }

    /// Wait for the previous dispatch, then reset and return the compute fence
    /// for the next one.
    pub fn begin_compute<D: GpuDevice + ?Sized>(&mut self, device: &D) -> Result<vk::Fence> {
        self.wait_compute(device)?;
        reset_fence(device, self.compute_fence)?;
        self.compute_state = SlotState::Submitted;
        Ok(self.compute_fence)
    }

    /// Wait for the outstanding dispatch, if any.
    pub fn wait_compute<D: GpuDevice + ?Sized>(&mut self, device: &D) -> Result<()> {
        if self.compute_state == SlotState::Submitted {
            wait_for_fence(device, self.compute_fence, self.timeout_ns)?;
            self.compute_state = SlotState::Idle;
        }
        Ok(())
    }

    /// Time since the scheduler was set up.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Total frames completed.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn slot_fence(&self, slot: usize) -> Option<vk::Fence> {
        self.slots.get(slot).map(|s| s.sync.in_flight)
    }

    /// Fence of the slot that last rendered to `image_index`.
    pub fn image_fence(&self, image_index: u32) -> Option<vk::Fence> {
        self.images_in_flight
            .get(image_index as usize)
            .copied()
            .flatten()
    }

    pub fn compute_fence(&self) -> vk::Fence {
        self.compute_fence
    }

    pub fn compute_state(&self) -> SlotState {
        self.compute_state
    }

    /// Destroy all resources.
    ///
    /// Nothing may be in flight.
    pub fn destroy<D: GpuDevice + ?Sized>(&self, device: &D) {
        for slot in &self.slots {
            slot.sync.destroy(device);
        }
        device.destroy_fence(self.compute_fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_gpu::mock::{FenceStatus, MockDevice};

    fn run_frame(scheduler: &mut FrameScheduler, device: &MockDevice, image: u32) -> vk::Fence {
        scheduler.begin_frame(device).unwrap();
        let token = scheduler.acquire_image(device, image).unwrap();
        let fence = scheduler.prepare_submit(device, &token).unwrap();
        device.submit(fence).unwrap();
        scheduler.end_frame(token);
        fence
    }

    #[test]
    fn slots_rotate() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 3, u64::MAX).unwrap();

        assert_eq!(scheduler.current_slot(), 0);
        let first = run_frame(&mut scheduler, &device, 0);
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Submitted));
        let second = run_frame(&mut scheduler, &device, 1);
        assert_ne!(first, second);
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.frame_count(), 2);
    }

    #[test]
    fn begin_frame_waits_on_submitted_slot() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 3, u64::MAX).unwrap();

        scheduler.begin_frame(&device).unwrap();
        assert_eq!(device.fence_waits(), 0);

        let fence = run_frame(&mut scheduler, &device, 0);
        run_frame(&mut scheduler, &device, 1);
        assert_eq!(device.fence_status(fence), Some(FenceStatus::Pending));

        // Slot 0 again: its frame must have completed before reuse.
        scheduler.begin_frame(&device).unwrap();
        assert_eq!(device.fence_status(fence), Some(FenceStatus::Signaled));
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Idle));
    }

    #[test]
    fn image_reused_by_other_slot_waits_for_owner() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 3, u64::MAX).unwrap();

        // Slot 0 renders image 2, slot 1 then acquires the same image.
        let owner = run_frame(&mut scheduler, &device, 2);
        scheduler.begin_frame(&device).unwrap();
        assert_eq!(device.fence_status(owner), Some(FenceStatus::Pending));

        let token = scheduler.acquire_image(&device, 2).unwrap();
        assert_eq!(device.fence_status(owner), Some(FenceStatus::Signaled));
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Idle));
        assert_eq!(scheduler.image_fence(2), scheduler.slot_fence(1));
        assert_eq!(token.slot(), 1);
    }

    #[test]
    fn out_of_range_image_is_rejected() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, u64::MAX).unwrap();
        scheduler.begin_frame(&device).unwrap();

        let err = scheduler.acquire_image(&device, 2).unwrap_err();
        assert!(matches!(err, GpuError::ImageIndexOutOfRange { index: 2, count: 2 }));
    }

    #[test]
    fn unsubmitted_frame_surfaces_timeout() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, 1_000).unwrap();

        // Fence reset but the caller never submitted work that signals it.
        for image in 0..2 {
            scheduler.begin_frame(&device).unwrap();
            let token = scheduler.acquire_image(&device, image).unwrap();
            scheduler.prepare_submit(&device, &token).unwrap();
            scheduler.end_frame(token);
        }

        let err = scheduler.begin_frame(&device).unwrap_err();
        assert!(matches!(err, GpuError::FenceTimeout { timeout_ns: 1_000 }));
    }

    #[test]
    fn acquire_requires_waited_slot() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, u64::MAX).unwrap();
        run_frame(&mut scheduler, &device, 0);
        let reader = run_frame(&mut scheduler, &device, 1);
        assert_eq!(scheduler.current_slot(), 0);

        // Skipping begin_frame must not hand out a token for a busy slot.
        let err = scheduler.acquire_image(&device, 0).unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Submitted));
        assert_eq!(device.fence_status(reader), Some(FenceStatus::Pending));

        scheduler.begin_frame(&device).unwrap();
        let token = scheduler.acquire_image(&device, 0).unwrap();
        assert_eq!(token.slot(), 0);
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Acquired));
        assert!(scheduler.frame_in_progress());
    }

    #[test]
    fn unsubmitted_frame_returns_slot_to_idle() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, u64::MAX).unwrap();
        scheduler.begin_frame(&device).unwrap();
        let token = scheduler.acquire_image(&device, 0).unwrap();
        scheduler.end_frame(token);

        assert_eq!(scheduler.slot_state(0), Some(SlotState::Idle));
        assert!(!scheduler.frame_in_progress());
    }

    #[test]
    fn failed_creation_releases_created_slots() {
        // Two slot fences then the compute fence; semaphores come in pairs.
        let faults = [
            ("vkCreateFence", 0),
            ("vkCreateFence", 1),
            ("vkCreateFence", 2),
            ("vkCreateSemaphore", 1),
            ("vkCreateSemaphore", 2),
            ("vkCreateSemaphore", 3),
        ];
        for (call, skip) in faults {
            let device = MockDevice::new();
            device.fail_after(call, skip, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

            assert!(FrameScheduler::new(&device, 3, u64::MAX).is_err());
            assert_eq!(device.live_objects(), 0, "{call} failing after {skip} calls");
        }
    }

    #[test]
    fn double_submit_is_rejected() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, u64::MAX).unwrap();
        scheduler.begin_frame(&device).unwrap();
        let token = scheduler.acquire_image(&device, 0).unwrap();
        scheduler.prepare_submit(&device, &token).unwrap();

        assert!(matches!(
            scheduler.prepare_submit(&device, &token),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    fn compute_fence_single_outstanding_dispatch() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, u64::MAX).unwrap();

        let fence = scheduler.begin_compute(&device).unwrap();
        assert_eq!(scheduler.compute_state(), SlotState::Submitted);
        device.submit(fence).unwrap();

        let again = scheduler.begin_compute(&device).unwrap();
        assert_eq!(fence, again);
        assert_eq!(device.fence_waits(), 1);
        device.submit(again).unwrap();

        scheduler.wait_compute(&device).unwrap();
        assert_eq!(scheduler.compute_state(), SlotState::Idle);
        assert_eq!(device.fence_status(fence), Some(FenceStatus::Signaled));
    }

    #[test]
    fn reset_images_requires_idle_frames() {
        let device = MockDevice::new();
        let mut scheduler = FrameScheduler::new(&device, 2, u64::MAX).unwrap();
        run_frame(&mut scheduler, &device, 0);

        assert!(scheduler.reset_images(4).is_err());
        scheduler.wait_all(&device).unwrap();
        scheduler.reset_images(4).unwrap();
        assert_eq!(scheduler.image_fence(0), None);
        assert_eq!(scheduler.image_fence(3), None);
    }

    #[test]
    fn destroy_releases_everything() {
        let device = MockDevice::new();
        let scheduler = FrameScheduler::new(&device, 3, u64::MAX).unwrap();
        scheduler.destroy(&device);
        assert_eq!(device.live_objects(), 0);
    }
}
