//! In-memory manipulator
//!
//! An embedded implementation of the manipulator contract, mostly useful
//! for tests and offline tooling. Write operations can be grouped into
//! transactions by setting [`Context::transaction_id`]; buffered operations
//! apply atomically on [`TransactionalManipulator::commit`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::context::{Context, TransactionId};
use crate::error::{DroverError, Result};
use crate::manipulator::{Identity, Manipulable, Manipulator, TransactionalManipulator};

enum TxnOp {
    Upsert {
        category: String,
        id: String,
        value: Value,
    },
    Remove {
        category: String,
        id: String,
    },
}

/// A manipulator backed by process memory
///
/// Objects are stored as JSON values bucketed by identity category and
/// keyed by identifier. Listing order is identifier order.
#[derive(Default)]
pub struct MemoryManipulator {
    tables: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    transactions: Mutex<HashMap<TransactionId, Vec<TxnOp>>>,
}

impl MemoryManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, op: TxnOp) {
        let mut tables = self.tables.write();
        match op {
            TxnOp::Upsert {
                category,
                id,
                value,
            } => {
                tables.entry(category).or_default().insert(id, value);
            }
            TxnOp::Remove { category, id } => {
                if let Some(table) = tables.get_mut(&category) {
                    table.remove(&id);
                }
            }
        }
    }

    /// Apply immediately, or buffer under the context's transaction ID
    fn apply_or_buffer(&self, context: &Context, op: TxnOp) {
        match &context.transaction_id {
            Some(id) => {
                self.transactions
                    .lock()
                    .entry(id.clone())
                    .or_default()
                    .push(op);
            }
            None => self.apply(op),
        }
    }

    fn encode<T: Manipulable>(object: &T) -> Result<Value> {
        serde_json::to_value(object).map_err(|e| DroverError::CannotMarshal(e.to_string()))
    }

    fn decode<T: Manipulable>(value: &Value) -> Result<T> {
        serde_json::from_value(value.clone())
            .map_err(|e| DroverError::CannotUnmarshal(e.to_string()))
    }
}

#[async_trait]
impl Manipulator for MemoryManipulator {
    async fn retrieve_many<T: Manipulable>(
        &self,
        context: &Context,
        identity: &Identity,
        dest: &mut Vec<T>,
    ) -> Result<()> {
        let tables = self.tables.read();
        let values: Vec<&Value> = tables
            .get(&identity.category)
            .map(|table| table.values().collect())
            .unwrap_or_default();

        // Pagination mirrors the remote contract: pages are 1-based and a
        // page past the end is empty.
        let selected: Vec<&Value> = match (context.page, context.page_size) {
            (page, Some(size)) => {
                let page = page.unwrap_or(1).max(1);
                let start = ((page - 1) * size) as usize;
                values.into_iter().skip(start).take(size as usize).collect()
            }
            _ => values,
        };

        dest.clear();
        for value in selected {
            dest.push(Self::decode(value)?);
        }

        Ok(())
    }

    async fn retrieve<T: Manipulable>(&self, _context: &Context, objects: &mut [T]) -> Result<()> {
        let tables = self.tables.read();

        for object in objects.iter_mut() {
            let identity = object.identity();
            let value = tables
                .get(&identity.category)
                .and_then(|table| table.get(object.identifier()))
                .ok_or_else(|| {
                    DroverError::ObjectNotFound(format!(
                        "no {} with ID {}",
                        identity.name,
                        object.identifier()
                    ))
                })?;

            *object = Self::decode(value)?;
        }

        Ok(())
    }

    async fn create<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter_mut() {
            object.set_identifier(Uuid::new_v4().to_string());

            let identity = object.identity();
            debug!(identity = %identity.name, id = %object.identifier(), "creating object");

            self.apply_or_buffer(
                context,
                TxnOp::Upsert {
                    category: identity.category,
                    id: object.identifier().to_string(),
                    value: Self::encode(object)?,
                },
            );
        }

        Ok(())
    }

    async fn update<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter() {
            self.apply_or_buffer(
                context,
                TxnOp::Upsert {
                    category: object.identity().category,
                    id: object.identifier().to_string(),
                    value: Self::encode(object)?,
                },
            );
        }

        Ok(())
    }

    async fn delete<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter() {
            let identity = object.identity();

            if context.transaction_id.is_none() {
                let tables = self.tables.read();
                let exists = tables
                    .get(&identity.category)
                    .map(|table| table.contains_key(object.identifier()))
                    .unwrap_or(false);
                if !exists {
                    return Err(DroverError::ObjectNotFound(format!(
                        "no {} with ID {}",
                        identity.name,
                        object.identifier()
                    )));
                }
            }

            self.apply_or_buffer(
                context,
                TxnOp::Remove {
                    category: identity.category,
                    id: object.identifier().to_string(),
                },
            );
        }

        Ok(())
    }

    async fn delete_many(&self, _context: &Context, _identity: &Identity) -> Result<()> {
        Err(DroverError::NotImplemented(
            "DeleteMany is not supported by the memory manipulator".to_string(),
        ))
    }

    async fn count(&self, _context: &Context, identity: &Identity) -> Result<u64> {
        let tables = self.tables.read();
        Ok(tables
            .get(&identity.category)
            .map(|table| table.len() as u64)
            .unwrap_or(0))
    }

    async fn assign(
        &self,
        _context: &Context,
        _identity: &Identity,
        _object_ids: &[String],
    ) -> Result<()> {
        Err(DroverError::NotImplemented(
            "Assign is not supported by the memory manipulator".to_string(),
        ))
    }

    async fn increment(
        &self,
        _context: &Context,
        _identity: &Identity,
        _counter: &str,
        _amount: i64,
    ) -> Result<()> {
        Err(DroverError::NotImplemented(
            "Increment is not supported by the memory manipulator".to_string(),
        ))
    }
}

impl TransactionalManipulator for MemoryManipulator {
    fn commit(&self, id: &TransactionId) -> Result<()> {
        let ops = self.transactions.lock().remove(id).ok_or_else(|| {
            DroverError::CannotCommit(format!("no transaction with ID {id}"))
        })?;

        debug!(transaction = %id, operations = ops.len(), "committing transaction");
        for op in ops {
            self.apply(op);
        }

        Ok(())
    }

    fn abort(&self, id: &TransactionId) -> bool {
        self.transactions.lock().remove(id).is_some()
    }
}
