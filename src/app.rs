/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The seams between the replica and the application it replicates.
//!
//! The consensus core does not interpret commands. It asks a [`CommandSource`] what to propose,
//! and tells an [`Executor`] what was decided. Client-facing submission, batching and
//! deduplication all live behind `CommandSource`; applying the log to application state lives
//! behind `Executor`.

use crate::types::{Block, Command};

/// Supplies the commands that leaders propose.
pub trait CommandSource {
    /// The next command to propose, if one is available. Leaders with nothing to propose put an
    /// empty command in their block so the chain keeps growing.
    fn next_command(&mut self) -> Option<Command>;

    /// Whether the replica should vote for a proposal carrying `command`.
    fn accept(&mut self, command: &Command) -> bool;

    /// Tells the source that `command` was proposed, so it is not offered again.
    fn proposed(&mut self, command: &Command);
}

/// Consumes the committed log.
pub trait Executor {
    /// Apply `block` to the application state. Called exactly once per committed block, in
    /// ascending view order.
    fn exec(&mut self, block: &Block);

    /// Tells the executor that `block` was abandoned on a pruned fork and will never commit.
    fn fork(&mut self, _block: &Block) {}
}
