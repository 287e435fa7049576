//! Connection contract and pipelining
//!
//! A [`Connection`] is one ordered command channel to the store. The engine
//! only needs two things from it: execute a single command now, and execute a
//! batch in one round trip with replies in submission order.
//!
//! [`Pipeline`] queues commands for the latter. Each queued command gets a
//! [`Slot`] that indexes the reply vector returned by [`Pipeline::sync`].

use crate::command::{Command, Reply};
use redmap_core::Result;
use tracing::trace;

/// Ordered command channel to a key-value store
///
/// Implementations block the calling thread until the store replies.
/// Transport failures are reported as `Error::Store`; per-command failures
/// (e.g. WRONGTYPE) come back as `Reply::Error` entries.
pub trait Connection: Send {
    /// Execute one command
    fn execute(&mut self, command: Command) -> Result<Reply>;

    /// Execute a batch in one round trip; replies are in submission order
    fn execute_pipeline(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn execute(&mut self, command: Command) -> Result<Reply> {
        (**self).execute(command)
    }

    fn execute_pipeline(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        (**self).execute_pipeline(commands)
    }
}

/// Position of a queued command in the next sync's reply vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

impl Slot {
    /// Index into the reply vector
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Queue of commands awaiting one round trip
#[derive(Debug, Default)]
pub struct Pipeline {
    queued: Vec<Command>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command
    pub fn queue(&mut self, command: Command) -> Slot {
        trace!(target: "redmap::store", command = command.name(), "queued");
        self.queued.push(command);
        Slot(self.queued.len() - 1)
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Drop every queued command without sending it
    pub fn discard(&mut self) -> usize {
        let dropped = self.queued.len();
        self.queued.clear();
        dropped
    }

    /// Send every queued command and wait for all replies
    ///
    /// The queue is empty afterwards whether or not the round trip succeeded.
    pub fn sync<C: Connection + ?Sized>(&mut self, conn: &mut C) -> Result<Vec<Reply>> {
        if self.queued.is_empty() {
            return Ok(Vec::new());
        }
        let commands = std::mem::take(&mut self.queued);
        trace!(target: "redmap::store", count = commands.len(), "pipeline sync");
        conn.execute_pipeline(commands)
    }
}
