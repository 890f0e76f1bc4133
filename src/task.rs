//! Task bookkeeping for one batch lifecycle.

use crate::{Error, Result};
use uuid::Uuid;

/// Task id, service-issued subtask and the once-per-cycle request guard.
#[derive(Debug)]
pub struct TaskState {
    task: String,
    subtask: Option<String>,
    requested: bool,
}

fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskState {
    /// Fresh state with a random task id and nothing requested.
    pub fn new() -> Self {
        Self {
            task: new_task_id(),
            subtask: None,
            requested: false,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Subtask issued by the service, empty until bootstrap succeeded.
    pub fn subtask(&self) -> &str {
        self.subtask.as_deref().unwrap_or("")
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    /// Start a new cycle: fresh task id, no subtask, guard released.
    pub fn reset(&mut self) {
        let mut task = new_task_id();
        while task == self.task {
            task = new_task_id();
        }
        self.task = task;
        self.subtask = None;
        self.requested = false;
    }

    /// Store the bootstrap token and mark the batch as requested.
    /// The subtask can only be set once per cycle.
    pub fn begin(&mut self, subtask: String) -> Result<()> {
        if self.subtask.is_some() {
            return Err(Error::Protocol(format!(
                "Subtask already assigned for task {}",
                self.task
            )));
        }
        self.subtask = Some(subtask);
        self.requested = true;
        Ok(())
    }

    /// Fails with [`Error::AlreadyRequested`] once the batch was submitted.
    pub fn ensure_not_requested(&self) -> Result<()> {
        if self.requested {
            return Err(Error::AlreadyRequested);
        }
        Ok(())
    }

    /// Fails with [`Error::NotRequestedYet`] before the batch was submitted.
    pub fn ensure_requested(&self) -> Result<()> {
        if !self.requested {
            return Err(Error::NotRequestedYet);
        }
        Ok(())
    }
}
