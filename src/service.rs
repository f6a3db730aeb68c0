use async_trait::async_trait;

use crate::db::{StoreError, TodoStore};
use crate::models::{Todo, TodoInput};

/// Todo operations as seen by the HTTP layer.
#[async_trait]
pub trait TodoService: Send + Sync {
    async fn create(&self, input: TodoInput) -> Result<Todo, StoreError>;
    /// `Ok(None)` when no todo has this id.
    async fn get(&self, id: i64) -> Result<Option<Todo>, StoreError>;
    async fn update(&self, id: i64, input: TodoInput) -> Result<Todo, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Todo>, StoreError>;
}

pub struct SqliteTodoService {
    store: TodoStore,
}

impl SqliteTodoService {
    pub fn new(store: TodoStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TodoService for SqliteTodoService {
    async fn create(&self, input: TodoInput) -> Result<Todo, StoreError> {
        self.store.create(input).await
    }

    async fn get(&self, id: i64) -> Result<Option<Todo>, StoreError> {
        self.store.get(id).await
    }

    async fn update(&self, id: i64, input: TodoInput) -> Result<Todo, StoreError> {
        self.store.update(id, input).await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.store.delete(id).await
    }

    async fn list(&self) -> Result<Vec<Todo>, StoreError> {
        self.store.list().await
    }
}
