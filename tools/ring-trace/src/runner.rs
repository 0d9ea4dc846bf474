//! Script execution against a heap-backed ring

use std::collections::HashMap;

use colored::Colorize;
use kaal_ring_allocator::{BlockHandle, RingAllocator, RingError};
use thiserror::Error;

use crate::script::{Command, Expectation, Step};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("line {line}: expected {what} {expected:#x}, found {actual:#x}")]
    Mismatch {
        line: usize,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: allocation of {size} bytes should have been rejected")]
    UnexpectedSuccess { line: usize, size: usize },

    #[error("line {line}: '{name}' is not bound to an allocation")]
    Unbound { line: usize, name: String },

    #[error("line {line}: '{name}' is already bound")]
    AlreadyBound { line: usize, name: String },

    #[error("line {line}: {source}")]
    Ring {
        line: usize,
        #[source]
        source: RingError,
    },
}

/// Counters reported after a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub allocations: usize,
    pub rejected: usize,
    pub frees: usize,
    pub checks: usize,
}

/// Replays steps against one ring, printing the cursors after each
pub struct Runner {
    ring: RingAllocator<Vec<u8>>,
    bindings: HashMap<String, BlockHandle>,
    summary: Summary,
    quiet: bool,
}

impl Runner {
    pub fn new(capacity: usize, quiet: bool) -> Result<Self, RingError> {
        Ok(Self {
            ring: RingAllocator::new(vec![0; capacity])?,
            bindings: HashMap::new(),
            summary: Summary::default(),
            quiet,
        })
    }

    pub fn ring(&self) -> &RingAllocator<Vec<u8>> {
        &self.ring
    }

    /// Run every step, stopping at the first failure
    pub fn run(&mut self, steps: &[Step]) -> Result<Summary, RunError> {
        for step in steps {
            self.step(step)?;
        }

        Ok(self.summary)
    }

    fn step(&mut self, step: &Step) -> Result<(), RunError> {
        let line = step.line;
        let ring_error = |source| RunError::Ring { line, source };

        match &step.command {
            Command::Reset { offset } => {
                self.ring.reset_at(*offset).map_err(ring_error)?;
                // Handles from before the reset are meaningless now
                self.bindings.clear();
                self.print(format!("{} at {:#06x}", "reset".bold(), offset));
            }

            Command::Alloc { name, size } => {
                if self.bindings.contains_key(name) {
                    return Err(RunError::AlreadyBound { line, name: name.clone() });
                }

                match self.ring.allocate(*size) {
                    Ok(handle) => {
                        self.print(format!(
                            "allocate({}) -> {} = {:#010x} {}",
                            size,
                            name.cyan(),
                            handle.offset(),
                            self.cursors()
                        ));
                        self.bindings.insert(name.clone(), handle);
                        self.summary.allocations += 1;
                    }
                    Err(RingError::OutOfMemory { .. }) => {
                        self.print(format!(
                            "allocate({}) -> {} {}",
                            size,
                            "rejected".yellow(),
                            self.cursors()
                        ));
                        self.summary.rejected += 1;
                    }
                    Err(err) => return Err(ring_error(err)),
                }
            }

            Command::Free { name } => {
                let handle = self
                    .bindings
                    .remove(name)
                    .ok_or_else(|| RunError::Unbound { line, name: name.clone() })?;
                let offset = handle.offset();

                self.ring.free(handle).map_err(ring_error)?;
                self.summary.frees += 1;
                self.print(format!(
                    "free({} = {:#010x}) {}",
                    name.cyan(),
                    offset,
                    self.cursors()
                ));
            }

            Command::Expect(expectation) => {
                let (what, expected, actual) = match expectation {
                    Expectation::Head(n) => ("head", *n, self.ring.head()),
                    Expectation::Tail(n) => ("tail", *n, self.ring.tail()),
                    Expectation::Available(n) => ("available", *n, self.ring.available()),
                    Expectation::Offset { name, offset } => {
                        let handle = self
                            .bindings
                            .get(name)
                            .ok_or_else(|| RunError::Unbound { line, name: name.clone() })?;
                        ("offset", *offset, handle.offset())
                    }
                };

                if expected != actual {
                    return Err(RunError::Mismatch { line, what, expected, actual });
                }
                self.summary.checks += 1;
                log::debug!("line {}: {} == {:#x}", line, what, actual);
            }

            Command::ExpectFail { size } => {
                let before = (self.ring.head(), self.ring.tail());
                match self.ring.allocate(*size) {
                    Ok(_) => return Err(RunError::UnexpectedSuccess { line, size: *size }),
                    Err(RingError::OutOfMemory { .. }) => {}
                    Err(err) => return Err(ring_error(err)),
                }

                let after = (self.ring.head(), self.ring.tail());
                if before.0 != after.0 {
                    return Err(RunError::Mismatch { line, what: "head", expected: before.0, actual: after.0 });
                }
                if before.1 != after.1 {
                    return Err(RunError::Mismatch { line, what: "tail", expected: before.1, actual: after.1 });
                }

                self.summary.checks += 1;
                self.print(format!(
                    "allocate({}) -> {} {}",
                    size,
                    "rejected as expected".green(),
                    self.cursors()
                ));
            }
        }

        Ok(())
    }

    fn cursors(&self) -> String {
        format!("(head={:#06x}; tail={:#06x})", self.ring.head(), self.ring.tail())
            .dimmed()
            .to_string()
    }

    fn print(&self, message: String) {
        if !self.quiet {
            println!("  {}", message);
        }
    }
}
