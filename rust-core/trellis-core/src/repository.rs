//! # Repositories
//!
//! A [`Repository`] binds one schema to one connection so services can be
//! handed a single object for all reads and writes of a table, including
//! the transaction that groups them.
//!
//! ```ignore
//! let users = Repository::<User>::new(db.clone());
//! users.transaction(|repo| async move {
//!     let user = repo.create(json!({"name": "Ann"})).await?;
//!     repo.create(json!({"name": "Bob", "mentor_id": user.key().cloned()})).await
//! }).await?;
//! ```

use crate::collection::Collection;
use crate::database::{Database, DbValue, IntoRecord};
use crate::error::Result;
use crate::model::{Model, ModelQuery, Page, Schema};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

/// Table access for one schema over one connection
pub struct Repository<S: Schema> {
    db: Database,
    schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Clone for Repository<S> {
    fn clone(&self) -> Self {
        Self::new(self.db.clone())
    }
}

impl<S: Schema> fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &S::TABLE)
            .field("db", &self.db)
            .finish()
    }
}

impl<S: Schema> Repository<S> {
    /// Repository for `S` on `db`
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self {
            db,
            schema: PhantomData,
        }
    }

    /// Connection the repository runs on
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Every row of the table
    pub async fn all(&self) -> Result<Collection<Model<S>>> {
        Model::<S>::all(&self.db).await.map(Collection::from)
    }

    /// Find by identity
    pub async fn find(&self, id: impl Into<DbValue>) -> Result<Option<Model<S>>> {
        Model::<S>::find(&self.db, id).await
    }

    /// Insert the fillable attributes of `data`
    pub async fn create(&self, data: impl IntoRecord) -> Result<Model<S>> {
        Model::<S>::create(&self.db, data).await
    }

    /// Update row `id`; returns the affected row count
    pub async fn update(&self, id: impl Into<DbValue>, data: impl IntoRecord) -> Result<u64> {
        Model::<S>::update(&self.db, id, data).await
    }

    /// Delete row `id`; returns the affected row count
    pub async fn delete(&self, id: impl Into<DbValue>) -> Result<u64> {
        Model::<S>::delete(&self.db, id).await
    }

    /// Filtered query returning models
    pub fn where_(&self, column: &str, operator: &str, value: impl Into<DbValue>) -> ModelQuery<S> {
        Model::<S>::where_(&self.db, column, operator, value)
    }

    /// See [`Model::paginate`]
    pub async fn paginate(
        &self,
        per_page: i64,
        page: i64,
        filters: impl IntoRecord,
        order_by: Option<(&str, &str)>,
    ) -> Result<Page<S>> {
        Model::<S>::paginate(&self.db, per_page, page, filters, order_by).await
    }

    /// Open a transaction on the connection
    pub async fn begin_transaction(&self) -> Result<()> {
        self.db.begin().await
    }

    /// Commit the open transaction
    pub async fn commit(&self) -> Result<()> {
        self.db.commit().await
    }

    /// Roll back the open transaction
    pub async fn rollback(&self) -> Result<()> {
        self.db.rollback().await
    }

    /// Run `callback` with this repository inside a transaction
    ///
    /// Same commit and rollback rules as [`Database::transaction`].
    pub async fn transaction<F, Fut, T>(&self, callback: F) -> Result<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.db.transaction(|tx| callback(Self::new(tx))).await
    }
}
