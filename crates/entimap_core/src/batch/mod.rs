//! Priority-grouped execution of deferred write commands.

mod bulk;

pub use bulk::BulkCommand;

use crate::entity::EntityMapping;
use crate::error::{CoreError, CoreResult};
use crate::store::{BulkWriteResult, DocumentStore};
use crate::types::Priority;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A deferred unit of work executed by a [`Batch`].
#[async_trait]
pub trait Command: Send {
    /// Commands with higher priority run strictly earlier.
    fn priority(&self) -> Priority;

    /// Performs the work.
    async fn execute(&mut self) -> CoreResult<()>;
}

/// Commands collected during one flush.
///
/// Execution sorts commands by descending priority and runs each group of
/// equal priority concurrently. A group starts only after the previous one
/// finished without error; the first error abandons the rest.
pub struct Batch {
    store: Arc<dyn DocumentStore>,
    bulks: Vec<BulkCommand>,
    bulk_index: HashMap<(&'static str, Priority), usize>,
    commands: Vec<Box<dyn Command>>,
    executed: bool,
}

impl Batch {
    /// Creates an empty batch writing to `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            bulks: Vec::new(),
            bulk_index: HashMap::new(),
            commands: Vec::new(),
            executed: false,
        }
    }

    /// Returns the bulk command for `mapping`'s collection and priority,
    /// creating it on first use. Mappings sharing a collection at different
    /// priorities get separate commands.
    pub fn bulk(&mut self, mapping: &EntityMapping) -> &mut BulkCommand {
        let key = (mapping.collection, mapping.priority);
        let index = match self.bulk_index.get(&key) {
            Some(&index) => index,
            None => {
                self.bulks
                    .push(BulkCommand::new(Arc::clone(&self.store), mapping));
                let index = self.bulks.len() - 1;
                self.bulk_index.insert(key, index);
                index
            }
        };
        &mut self.bulks[index]
    }

    /// Adds an arbitrary command.
    pub fn add(&mut self, command: Box<dyn Command>) {
        self.commands.push(command);
    }

    /// Number of commands, bulk commands included.
    pub fn len(&self) -> usize {
        self.bulks.len() + self.commands.len()
    }

    /// Returns true if the batch holds no commands.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the counts every bulk command expects.
    pub fn expected(&self) -> BulkWriteResult {
        self.bulks
            .iter()
            .fold(BulkWriteResult::default(), |mut acc, bulk| {
                let expected = bulk.expected();
                acc.inserted += expected.inserted;
                acc.modified += expected.modified;
                acc.removed += expected.removed;
                acc
            })
    }

    /// Runs every command. May be called once.
    pub async fn execute(&mut self) -> CoreResult<()> {
        if self.executed {
            return Err(CoreError::BatchExecuted);
        }
        self.executed = true;

        let mut commands: Vec<Box<dyn Command>> = self
            .bulks
            .drain(..)
            .map(|bulk| Box::new(bulk) as Box<dyn Command>)
            .chain(self.commands.drain(..))
            .collect();

        if commands.is_empty() {
            tokio::task::yield_now().await;
            return Ok(());
        }

        commands.sort_by_key(|command| std::cmp::Reverse(command.priority()));
        debug!(commands = commands.len(), "executing batch");

        let mut rest = commands.as_mut_slice();
        while let Some(first) = rest.first() {
            let priority = first.priority();
            let split = rest
                .iter()
                .position(|command| command.priority() != priority)
                .unwrap_or(rest.len());
            let (group, tail) = std::mem::take(&mut rest).split_at_mut(split);
            trace!(%priority, commands = group.len(), "executing priority group");
            try_join_all(group.iter_mut().map(|command| command.execute())).await?;
            rest = tail;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("bulks", &self.bulks)
            .field("commands", &self.commands.len())
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}
