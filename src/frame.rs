// =============================================================================
// FRAME LOOP - per-frame state machine
// =============================================================================
//
// Idle -> FrameBegin -> ImageAcquired -> Submitted -> Presented -> Idle
//
// ResizePending is entered whenever the swapchain is known to be stale
// (window resize, out-of-date acquire, stale present) and is only left by a
// completed rebuild. A resize noticed mid-frame takes effect once the
// frame has ended.
//
// This module only tracks state; the renderer performs the GPU work and
// reports each step here.

use anyhow::Result;

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    FrameBegin,
    ImageAcquired { image_index: u32, suboptimal: bool },
    Submitted { image_index: u32, suboptimal: bool },
    Presented,
    ResizePending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    Begin,
    Acquire(AcquireOutcome),
    Submit,
    Present(PresentOutcome),
    End,
    Rebuilt,
}

impl FrameState {
    /// Next state, or `None` if `event` is not legal in this state.
    pub fn on(self, event: FrameEvent) -> Option<FrameState> {
        use FrameEvent as E;
        use FrameState as S;

        match (self, event) {
            (S::Idle, E::Begin) => Some(S::FrameBegin),
            (
                S::FrameBegin,
                E::Acquire(AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                }),
            ) => Some(S::ImageAcquired {
                image_index,
                suboptimal,
            }),
            (S::FrameBegin, E::Acquire(AcquireOutcome::OutOfDate)) => Some(S::ResizePending),
            (
                S::ImageAcquired {
                    image_index,
                    suboptimal,
                },
                E::Submit,
            ) => Some(S::Submitted {
                image_index,
                suboptimal,
            }),
            (S::Submitted { suboptimal, .. }, E::Present(outcome)) => {
                if suboptimal || outcome == PresentOutcome::Stale {
                    Some(S::ResizePending)
                } else {
                    Some(S::Presented)
                }
            }
            (S::Presented, E::End) => Some(S::Idle),
            // A stale frame already ended in ResizePending
            (S::ResizePending, E::End) => Some(S::ResizePending),
            (S::ResizePending, E::Rebuilt) => Some(S::Idle),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    resize_requested: bool,
    frames_presented: u64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            resize_requested: false,
            frames_presented: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn needs_rebuild(&self) -> bool {
        self.state == FrameState::ResizePending
    }

    /// External resize signal. Applied at the next frame boundary.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
        if self.state == FrameState::Idle {
            self.state = FrameState::ResizePending;
        }
    }

    pub fn advance(&mut self, event: FrameEvent) -> Result<FrameState> {
        let next = self.state.on(event).ok_or_else(|| {
            anyhow::anyhow!("Illegal frame transition: {:?} on {:?}", event, self.state)
        })?;
        log::trace!("Frame state {:?} -> {:?}", self.state, next);

        self.state = match (event, next) {
            (FrameEvent::Rebuilt, _) => {
                self.resize_requested = false;
                next
            }
            (FrameEvent::End, FrameState::Idle) if self.resize_requested => {
                FrameState::ResizePending
            }
            _ => next,
        };

        if self.state == FrameState::Presented {
            self.frames_presented += 1;
        }
        Ok(self.state)
    }
}
