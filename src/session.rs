use crate::args::StreamParams;
use crate::error::LastError;
use crate::launcher::ExitCode;
use crate::method::{Backend, MethodPreference};

/// State of the single streaming slot.
///
/// Parameters survive a stop so they can be inspected afterwards; only the
/// target address goes away with the child.
#[derive(Debug, Default)]
pub struct StreamSession {
    child: Option<ActiveChild>,
    target_address: Option<String>,
    params: StreamParams,
    preference: MethodPreference,
    last_error: LastError,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveChild {
    pub pid: u32,
    pub backend: Backend,
    generation: u64,
}

/// Published on every slot transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Idle,
    Streaming {
        pid: u32,
        backend: Backend,
        target: String,
    },
    /// Terminated by an explicit stop.
    Stopped { pid: u32 },
    /// The child went away without being asked to.
    Exited { pid: u32, code: ExitCode },
}

impl StreamSession {
    pub fn new(preference: MethodPreference) -> Self {
        StreamSession {
            preference,
            ..StreamSession::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.map(|child| child.pid)
    }

    pub fn backend(&self) -> Option<Backend> {
        self.child.map(|child| child.backend)
    }

    pub fn target_address(&self) -> Option<&str> {
        self.target_address.as_deref()
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }

    pub fn preference(&self) -> MethodPreference {
        self.preference
    }

    pub fn set_preference(&mut self, preference: MethodPreference) {
        self.preference = preference;
    }

    pub fn last_error(&self) -> &LastError {
        &self.last_error
    }

    pub fn last_error_mut(&mut self) -> &mut LastError {
        &mut self.last_error
    }

    /// Records a freshly launched child and returns its generation.
    pub fn begin(&mut self, pid: u32, backend: Backend, target: &str, params: StreamParams) -> u64 {
        debug_assert!(self.child.is_none());
        self.generation += 1;
        self.child = Some(ActiveChild {
            pid,
            backend,
            generation: self.generation,
        });
        self.target_address = Some(target.to_string());
        self.params = params;
        self.generation
    }

    /// Empties the slot, returning the child that occupied it.
    pub fn release(&mut self) -> Option<ActiveChild> {
        let child = self.child.take()?;
        self.target_address = None;
        Some(child)
    }

    /// Empties the slot only if it still holds the child of `generation`.
    pub fn release_generation(&mut self, generation: u64) -> Option<ActiveChild> {
        match self.child {
            Some(child) if child.generation == generation => self.release(),
            _ => None,
        }
    }
}
