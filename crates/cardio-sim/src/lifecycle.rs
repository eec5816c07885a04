use crate::transport::SimTransport;
use async_trait::async_trait;
use cardio_core::{DeviceHandle, DeviceLifecycle, LifecycleError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct LifecycleState {
    reinit_results: VecDeque<Result<(), String>>,
    resume_results: VecDeque<Result<(), String>>,
    reinits: u32,
    resumes: u32,
    removed_slots: Vec<usize>,
}

/// Scripted device-lifecycle collaborator wired to a [`SimTransport`].
///
/// Reinit and resume succeed unless failures were scripted; removal marks
/// the transport's medium gone.
#[derive(Clone)]
pub struct SimLifecycle {
    state: Arc<Mutex<LifecycleState>>,
    transport: SimTransport,
}

impl SimLifecycle {
    pub fn for_transport(transport: &SimTransport) -> Self {
        Self {
            state: Arc::new(Mutex::new(LifecycleState::default())),
            transport: transport.clone(),
        }
    }

    /// Fail the next `times` reinit attempts.
    pub fn script_reinit_failures(&self, times: u32) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..times {
            state
                .reinit_results
                .push_back(Err("scripted reinit failure".into()));
        }
    }

    /// Fail the next `times` resume attempts.
    pub fn script_resume_failures(&self, times: u32) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..times {
            state
                .resume_results
                .push_back(Err("scripted resume failure".into()));
        }
    }

    pub fn reinit_count(&self) -> u32 {
        self.state.lock().unwrap().reinits
    }

    pub fn resume_count(&self) -> u32 {
        self.state.lock().unwrap().resumes
    }

    pub fn removed_slots(&self) -> Vec<usize> {
        self.state.lock().unwrap().removed_slots.clone()
    }
}

#[async_trait]
impl DeviceLifecycle for SimLifecycle {
    async fn reinit(&self, device: &DeviceHandle) -> Result<(), LifecycleError> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.reinits += 1;
            state.reinit_results.pop_front().unwrap_or(Ok(()))
        };
        match scripted {
            Ok(()) => {
                debug!(slot = device.slot(), "sim reinit");
                self.transport.reset_busy();
                Ok(())
            }
            Err(message) => Err(LifecycleError::new(message)),
        }
    }

    async fn resume(&self, device: &DeviceHandle) -> Result<(), LifecycleError> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.resumes += 1;
            state.resume_results.pop_front().unwrap_or(Ok(()))
        };
        match scripted {
            Ok(()) => {
                debug!(slot = device.slot(), "sim resume");
                Ok(())
            }
            Err(message) => Err(LifecycleError::new(message)),
        }
    }

    // Teardown is scheduled, not immediate: the transport keeps answering
    // (for e.g. the written-count salvage query) unless the medium is
    // yanked via `SimTransport::remove_medium`.
    fn remove(&self, device: &DeviceHandle) {
        debug!(slot = device.slot(), "sim remove");
        self.state.lock().unwrap().removed_slots.push(device.slot());
    }
}
