//! # Active-Record Models
//!
//! A [`Model`] is an ordered attribute map tied to a table through a
//! [`Schema`] type. Bulk assignment goes through the schema's fillable
//! whitelist, serialization drops its hidden fields, and persistence is
//! always explicit (`save`, `create`, `update`, `delete`).
//!
//! ## Relations
//!
//! Relations are declared on the schema and resolved with one secondary
//! query per model instance. Eager loading through [`ModelQuery::with`]
//! resolves them right after the owning rows are fetched, still one model
//! at a time, so loading `n` models issues `n` extra queries per relation.
//!
//! ## Example
//!
//! ```ignore
//! struct User;
//!
//! impl Schema for User {
//!     const TABLE: &'static str = "users";
//!     const FILLABLE: &'static [&'static str] = &["name", "email", "password"];
//!     const HIDDEN: &'static [&'static str] = &["password"];
//!
//!     fn relations() -> Vec<Relation> {
//!         vec![Relation::has_many::<Post>("posts", "user_id", Self::PRIMARY_KEY)]
//!     }
//! }
//!
//! let user = Model::<User>::create(&db, json!({"name": "Ann", "email": "a@x.io"})).await?;
//! let page = Model::<User>::paginate(&db, 10, 2, Record::new(), None).await?;
//! ```

use crate::database::{Database, DbValue, IntoRecord, Record};
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use indexmap::IndexMap;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use tracing::debug;

/// Static description of a model's table
pub trait Schema: Send + Sync + 'static {
    /// Table name
    const TABLE: &'static str;
    /// Identity column, assigned by the store on insert
    const PRIMARY_KEY: &'static str = "id";
    /// Attributes accepted by bulk assignment
    const FILLABLE: &'static [&'static str] = &[];
    /// Attributes left out of serialization
    const HIDDEN: &'static [&'static str] = &[];
    /// Accept any attribute, not only fillable ones
    const DYNAMIC: bool = false;

    /// Declared relations
    fn relations() -> Vec<Relation> {
        Vec::new()
    }
}

/// Shape of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// One related row holding our key
    HasOne,
    /// Many related rows holding our key
    HasMany,
    /// We hold the key of one related row
    BelongsTo,
    /// Related rows linked through a pivot table
    BelongsToMany,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pivot {
    table: &'static str,
    parent_column: &'static str,
    related_column: &'static str,
}

/// A named relation to another schema's table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    name: &'static str,
    kind: RelationKind,
    table: &'static str,
    related_key: &'static str,
    local_key: &'static str,
    pivot: Option<Pivot>,
    hidden: &'static [&'static str],
}

impl Relation {
    fn to<R: Schema>(
        name: &'static str,
        kind: RelationKind,
        related_key: &'static str,
        local_key: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            table: R::TABLE,
            related_key,
            local_key,
            pivot: None,
            hidden: R::HIDDEN,
        }
    }

    /// `R.foreign_key = self.local_key`, at most one row
    #[must_use]
    pub fn has_one<R: Schema>(name: &'static str, foreign_key: &'static str, local_key: &'static str) -> Self {
        Self::to::<R>(name, RelationKind::HasOne, foreign_key, local_key)
    }

    /// `R.foreign_key = self.local_key`, any number of rows
    #[must_use]
    pub fn has_many<R: Schema>(name: &'static str, foreign_key: &'static str, local_key: &'static str) -> Self {
        Self::to::<R>(name, RelationKind::HasMany, foreign_key, local_key)
    }

    /// `R.primary_key = self.foreign_key`
    #[must_use]
    pub fn belongs_to<R: Schema>(name: &'static str, foreign_key: &'static str) -> Self {
        Self::to::<R>(name, RelationKind::BelongsTo, R::PRIMARY_KEY, foreign_key)
    }

    /// Rows of `R` whose key appears in `pivot.related_column` for pivot rows
    /// with `pivot.parent_column = self.local_key`
    #[must_use]
    pub fn belongs_to_many<R: Schema>(
        name: &'static str,
        pivot_table: &'static str,
        parent_column: &'static str,
        related_column: &'static str,
        local_key: &'static str,
    ) -> Self {
        Self {
            pivot: Some(Pivot {
                table: pivot_table,
                parent_column,
                related_column,
            }),
            ..Self::to::<R>(name, RelationKind::BelongsToMany, R::PRIMARY_KEY, local_key)
        }
    }

    /// Relation name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Relation shape
    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        self.kind
    }

    async fn resolve(&self, db: &Database, attributes: &Record) -> Result<Loaded> {
        let local = attributes.get(self.local_key).cloned().unwrap_or(DbValue::Null);
        debug!(relation = self.name, table = self.table, "Resolving relation");

        if local.is_null() {
            return Ok(match self.kind {
                RelationKind::HasOne | RelationKind::BelongsTo => Loaded::One(None),
                RelationKind::HasMany | RelationKind::BelongsToMany => Loaded::Many(Vec::new()),
            });
        }

        let mut query = QueryBuilder::new(db.clone(), self.table);
        Ok(match (self.kind, &self.pivot) {
            (RelationKind::HasOne | RelationKind::BelongsTo, _) => {
                Loaded::One(query.where_eq(self.related_key, local).first().await?)
            }
            (RelationKind::HasMany, _) => {
                Loaded::Many(query.where_eq(self.related_key, local).get().await?)
            }
            (RelationKind::BelongsToMany, Some(pivot)) => {
                let links = QueryBuilder::new(db.clone(), pivot.table)
                    .select(&[pivot.related_column])
                    .where_eq(pivot.parent_column, local)
                    .get()
                    .await?;
                let ids: Vec<DbValue> = links
                    .into_iter()
                    .filter_map(|mut row| row.shift_remove(pivot.related_column))
                    .collect();
                Loaded::Many(query.where_in(self.related_key, ids).get().await?)
            }
            (RelationKind::BelongsToMany, None) => {
                return Err(Error::invalid_query(format!(
                    "relation `{}` has no pivot table",
                    self.name
                )))
            }
        })
    }

    fn visible(&self, record: &Record) -> Value {
        Value::Object(
            record
                .iter()
                .filter(|(k, _)| !self.hidden.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// Rows produced by resolving a relation
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// `has_one` / `belongs_to`
    One(Option<Record>),
    /// `has_many` / `belongs_to_many`
    Many(Vec<Record>),
}

/// An instance of a schema's table
pub struct Model<S: Schema> {
    attributes: Record,
    loaded: IndexMap<&'static str, Loaded>,
    schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Clone for Model<S> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            loaded: self.loaded.clone(),
            schema: PhantomData,
        }
    }
}

impl<S: Schema> fmt::Debug for Model<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("table", &S::TABLE)
            .field("attributes", &self.attributes)
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S: Schema> Default for Model<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Schema> Model<S> {
    /// Empty, unsaved instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            attributes: Record::new(),
            loaded: IndexMap::new(),
            schema: PhantomData,
        }
    }

    /// Instance holding a row exactly as read from the store
    #[must_use]
    pub fn from_record(attributes: Record) -> Self {
        Self {
            attributes,
            ..Self::new()
        }
    }

    /// Builder over this model's table
    #[must_use]
    pub fn query(db: &Database) -> QueryBuilder {
        QueryBuilder::new(db.clone(), S::TABLE).key(S::PRIMARY_KEY)
    }

    fn accepts(attribute: &str) -> bool {
        S::DYNAMIC || S::FILLABLE.contains(&attribute)
    }

    fn fillable_only(data: impl IntoRecord) -> Record {
        data.into_record()
            .into_iter()
            .filter(|(k, _)| Self::accepts(k))
            .collect()
    }

    /// Assign every fillable attribute of `data`
    ///
    /// Keys outside the whitelist are dropped silently.
    pub fn fill(&mut self, data: impl IntoRecord) -> &mut Self {
        for (key, value) in data.into_record() {
            if Self::accepts(&key) {
                self.attributes.insert(key, value);
            }
        }
        self
    }

    /// Attribute value
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&DbValue> {
        self.attributes.get(attribute)
    }

    /// Set one attribute; fails outside the fillable set
    pub fn set(&mut self, attribute: &str, value: impl Into<DbValue>) -> Result<()> {
        if !Self::accepts(attribute) {
            return Err(Error::InvalidAttribute {
                model: S::TABLE,
                field: attribute.to_string(),
            });
        }
        self.attributes.insert(attribute.to_string(), value.into());
        Ok(())
    }

    /// Identity value, if the instance has been stored
    #[must_use]
    pub fn key(&self) -> Option<&DbValue> {
        self.attributes
            .get(S::PRIMARY_KEY)
            .filter(|v| !v.is_null())
    }

    /// Every attribute, hidden ones included
    #[must_use]
    pub const fn attributes(&self) -> &Record {
        &self.attributes
    }

    /// A relation resolved by [`load`](Self::load) or eager loading
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Loaded> {
        self.loaded.get(name)
    }

    /// Attributes minus hidden ones, plus loaded relations
    #[must_use]
    pub fn to_array(&self) -> Map<String, Value> {
        let mut out: Map<String, Value> = self
            .attributes
            .iter()
            .filter(|(k, _)| !S::HIDDEN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        let relations = S::relations();
        for (name, loaded) in &self.loaded {
            let Some(relation) = relations.iter().find(|r| r.name == *name) else {
                continue;
            };
            let value = match loaded {
                Loaded::One(row) => row.as_ref().map_or(Value::Null, |r| relation.visible(r)),
                Loaded::Many(rows) => rows.iter().map(|r| relation.visible(r)).collect(),
            };
            out.insert((*name).to_string(), value);
        }
        out
    }

    fn relation_named(name: &str) -> Result<Relation> {
        S::relations()
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::invalid_query(format!("{} has no relation `{name}`", S::TABLE)))
    }

    /// Resolve relation `name` now and keep the result on the instance
    pub async fn load(&mut self, db: &Database, name: &str) -> Result<&Loaded> {
        let relation = Self::relation_named(name)?;
        let loaded = relation.resolve(db, &self.attributes).await?;
        let slot = self.loaded.entry(relation.name).or_insert(Loaded::Many(Vec::new()));
        *slot = loaded;
        Ok(&*slot)
    }

    /// Find by identity
    pub async fn find(db: &Database, id: impl Into<DbValue>) -> Result<Option<Self>> {
        Ok(Self::query(db)
            .where_eq(S::PRIMARY_KEY, id)
            .first()
            .await?
            .map(Self::from_record))
    }

    /// First row where `column = value`
    pub async fn first_where(
        db: &Database,
        column: &str,
        value: impl Into<DbValue>,
    ) -> Result<Option<Self>> {
        Ok(Self::query(db)
            .where_eq(column, value)
            .first()
            .await?
            .map(Self::from_record))
    }

    /// Every row of the table
    pub async fn all(db: &Database) -> Result<Vec<Self>> {
        Ok(Self::query(db)
            .get()
            .await?
            .into_iter()
            .map(Self::from_record)
            .collect())
    }

    /// Fill a new instance from `data`, insert it and read it back
    pub async fn create(db: &Database, data: impl IntoRecord) -> Result<Self> {
        let mut model = Self::new();
        model.fill(data);
        let id = Self::query(db).insert(&model.attributes).await?;
        debug!(table = S::TABLE, id = %id, "Created");

        match Self::find(db, id.clone()).await? {
            Some(stored) => Ok(stored),
            None => {
                model.attributes.insert(S::PRIMARY_KEY.to_string(), id);
                Ok(model)
            }
        }
    }

    /// Update the fillable attributes of `data` on row `id`
    ///
    /// Returns the affected row count.
    pub async fn update(db: &Database, id: impl Into<DbValue>, data: impl IntoRecord) -> Result<u64> {
        Self::query(db)
            .where_eq(S::PRIMARY_KEY, id)
            .update(Self::fillable_only(data))
            .await
    }

    /// Delete row `id`; returns the affected row count
    pub async fn delete(db: &Database, id: impl Into<DbValue>) -> Result<u64> {
        Self::query(db).where_eq(S::PRIMARY_KEY, id).delete().await
    }

    /// Filtered query returning models
    pub fn where_(
        db: &Database,
        column: &str,
        operator: &str,
        value: impl Into<DbValue>,
    ) -> ModelQuery<S> {
        let mut query = ModelQuery::new(db);
        query.where_(column, operator, value);
        query
    }

    /// Query returning models with relations eagerly loaded
    pub fn with(db: &Database, relations: &[&'static str]) -> ModelQuery<S> {
        let mut query = ModelQuery::new(db);
        query.with(relations);
        query
    }

    /// One page of rows matching `filters` (AND-ed equality)
    ///
    /// `order_by` is `(column, direction)`.
    pub async fn paginate(
        db: &Database,
        per_page: i64,
        page: i64,
        filters: impl IntoRecord,
        order_by: Option<(&str, &str)>,
    ) -> Result<Page<S>> {
        let mut query = ModelQuery::new(db);
        for (column, value) in filters.into_record() {
            query.where_(column, "=", value);
        }
        if let Some((column, direction)) = order_by {
            query.order_by(column, direction);
        }
        query.paginate(per_page, page).await
    }

    /// Run caller SQL and hydrate the rows as models
    pub async fn raw_query_as_model(db: &Database, sql: &str, bindings: Vec<DbValue>) -> Result<Vec<Self>> {
        Ok(Self::query(db)
            .raw_query(sql, bindings)
            .await?
            .into_iter()
            .map(Self::from_record)
            .collect())
    }

    /// Run `callback` in a transaction on `db`
    ///
    /// See [`Database::transaction`].
    pub async fn transaction<F, Fut, T>(db: &Database, callback: F) -> Result<T>
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        db.transaction(callback).await
    }

    /// Insert when unsaved, otherwise update every attribute
    pub async fn save(&mut self, db: &Database) -> Result<()> {
        match self.key().cloned() {
            Some(id) => {
                let changes: Record = self
                    .attributes
                    .iter()
                    .filter(|(k, _)| k.as_str() != S::PRIMARY_KEY)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !changes.is_empty() {
                    Self::query(db)
                        .where_eq(S::PRIMARY_KEY, id)
                        .update(changes)
                        .await?;
                }
            }
            None => {
                let id = Self::query(db).insert(&self.attributes).await?;
                self.attributes.insert(S::PRIMARY_KEY.to_string(), id);
            }
        }
        Ok(())
    }

    /// Reload attributes from the store, dropping loaded relations
    pub async fn refresh(&mut self, db: &Database) -> Result<()> {
        let id = self
            .key()
            .cloned()
            .ok_or_else(|| Error::invalid_query(format!("unsaved {} cannot be refreshed", S::TABLE)))?;
        let row = Self::query(db)
            .where_eq(S::PRIMARY_KEY, id.clone())
            .first()
            .await?
            .ok_or_else(|| Error::invalid_query(format!("{} {id} no longer exists", S::TABLE)))?;
        self.attributes = row;
        self.loaded.clear();
        Ok(())
    }
}

impl<S: Schema> Serialize for Model<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> std::result::Result<Z::Ok, Z::Error> {
        self.to_array().serialize(serializer)
    }
}

/// Fluent query over one model's table
pub struct ModelQuery<S: Schema> {
    builder: QueryBuilder,
    eager: Vec<&'static str>,
    schema: PhantomData<fn() -> S>,
}

impl<S: Schema> ModelQuery<S> {
    /// Query over `S::TABLE`
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            builder: Model::<S>::query(db),
            eager: Vec::new(),
            schema: PhantomData,
        }
    }

    /// See [`QueryBuilder::where_`]
    pub fn where_(&mut self, column: impl Into<String>, operator: &str, value: impl Into<DbValue>) -> &mut Self {
        self.builder.where_(column, operator, value);
        self
    }

    /// See [`QueryBuilder::where_in`]
    pub fn where_in<V: Into<DbValue>>(
        &mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> &mut Self {
        self.builder.where_in(column, values);
        self
    }

    /// See [`QueryBuilder::order_by`]
    pub fn order_by(&mut self, column: impl Into<String>, direction: &str) -> &mut Self {
        self.builder.order_by(column, direction);
        self
    }

    /// See [`QueryBuilder::limit`]
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.builder.limit(limit);
        self
    }

    /// See [`QueryBuilder::offset`]
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.builder.offset(offset);
        self
    }

    /// Relations to resolve once the rows are fetched
    pub fn with(&mut self, relations: &[&'static str]) -> &mut Self {
        self.eager.extend_from_slice(relations);
        self
    }

    async fn hydrate(&self, rows: Vec<Record>) -> Result<Vec<Model<S>>> {
        let db = self.builder.database();
        let mut models: Vec<Model<S>> = rows.into_iter().map(Model::from_record).collect();
        if !self.eager.is_empty() {
            debug!(
                table = S::TABLE,
                models = models.len(),
                relations = self.eager.len(),
                "Eager loading per instance"
            );
        }
        for model in &mut models {
            for name in &self.eager {
                model.load(db, name).await?;
            }
        }
        Ok(models)
    }

    /// Matching models
    pub async fn get(&mut self) -> Result<Vec<Model<S>>> {
        let rows = self.builder.get().await?;
        self.hydrate(rows).await
    }

    /// First matching model
    pub async fn first(&mut self) -> Result<Option<Model<S>>> {
        let row = self.builder.first().await?;
        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    /// Number of matching rows
    pub async fn count(&mut self) -> Result<i64> {
        self.builder.count().await
    }

    /// One page of matching models plus the total match count
    ///
    /// `per_page` must be positive and `page` starts at 1.
    pub async fn paginate(&mut self, per_page: i64, page: i64) -> Result<Page<S>> {
        if per_page <= 0 {
            return Err(Error::invalid_query(format!(
                "per_page must be positive, got {per_page}"
            )));
        }
        if page < 1 {
            return Err(Error::invalid_query(format!("page must be at least 1, got {page}")));
        }

        let mut counter = self.builder.clone();
        let offset = (page - 1).saturating_mul(per_page);
        let rows = self
            .builder
            .limit(per_page.unsigned_abs())
            .offset(offset.unsigned_abs())
            .get()
            .await?;
        let data = self.hydrate(rows).await?;
        let total = counter.count().await?;

        Ok(Page {
            data,
            total,
            per_page,
            current_page: page,
            last_page: total / per_page + i64::from(total % per_page != 0),
        })
    }
}

/// One page of models
pub struct Page<S: Schema> {
    /// Models on this page
    pub data: Vec<Model<S>>,
    /// Rows matching the filters across all pages
    pub total: i64,
    /// Page size
    pub per_page: i64,
    /// 1-based page number
    pub current_page: i64,
    /// `ceil(total / per_page)`
    pub last_page: i64,
}

impl<S: Schema> Clone for Page<S> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            ..*self
        }
    }
}

impl<S: Schema> fmt::Debug for Page<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("data", &self.data)
            .field("total", &self.total)
            .field("per_page", &self.per_page)
            .field("current_page", &self.current_page)
            .field("last_page", &self.last_page)
            .finish()
    }
}

impl<S: Schema> Serialize for Page<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> std::result::Result<Z::Ok, Z::Error> {
        use serde::ser::SerializeStruct;
        let mut page = serializer.serialize_struct("Page", 5)?;
        page.serialize_field("data", &self.data)?;
        page.serialize_field("total", &self.total)?;
        page.serialize_field("perPage", &self.per_page)?;
        page.serialize_field("currentPage", &self.current_page)?;
        page.serialize_field("lastPage", &self.last_page)?;
        page.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct User;
    struct Post;
    struct Role;

    impl Schema for User {
        const TABLE: &'static str = "users";
        const FILLABLE: &'static [&'static str] = &["name", "email", "password"];
        const HIDDEN: &'static [&'static str] = &["password"];

        fn relations() -> Vec<Relation> {
            vec![
                Relation::has_many::<Post>("posts", "user_id", Self::PRIMARY_KEY),
                Relation::has_one::<Post>("latest_post", "user_id", Self::PRIMARY_KEY),
                Relation::belongs_to_many::<Role>("roles", "role_user", "user_id", "role_id", Self::PRIMARY_KEY),
            ]
        }
    }

    impl Schema for Post {
        const TABLE: &'static str = "posts";
        const FILLABLE: &'static [&'static str] = &["user_id", "title"];

        fn relations() -> Vec<Relation> {
            vec![Relation::belongs_to::<User>("author", "user_id")]
        }
    }

    impl Schema for Role {
        const TABLE: &'static str = "roles";
        const FILLABLE: &'static [&'static str] = &["name"];
    }

    type Users = Model<User>;

    async fn store() -> Database {
        let db = Database::memory().await.unwrap();
        for ddl in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT, password TEXT)",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), title TEXT)",
            "CREATE TABLE roles (id INTEGER PRIMARY KEY, name TEXT)",
            "CREATE TABLE role_user (user_id INTEGER, role_id INTEGER)",
        ] {
            db.execute(ddl, &[]).await.unwrap();
        }
        db
    }

    #[test]
    fn test_fill_drops_non_fillable() {
        let mut user = Users::new();
        user.fill(json!({"name": "x", "notFillable": "y"}));
        assert_eq!(user.attributes().len(), 1);
        assert_eq!(user.get("name"), Some(&DbValue::from("x")));
    }

    #[test]
    fn test_set_rejects_non_fillable() {
        let mut user = Users::new();
        assert!(user.set("name", "Ann").is_ok());
        assert!(matches!(
            user.set("is_admin", true),
            Err(Error::InvalidAttribute { model: "users", .. })
        ));
    }

    #[test]
    fn test_to_array_hides_fields() {
        let user = Users::from_record(
            [("id", DbValue::Int(1)), ("name", "Ann".into()), ("password", "hash".into())].into_record(),
        );
        let array = user.to_array();
        assert_eq!(Value::Object(array), json!({"id": 1, "name": "Ann"}));
        assert_eq!(serde_json::to_value(&user).unwrap(), json!({"id": 1, "name": "Ann"}));
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let db = store().await;
        let user = Users::create(&db, json!({"id": 99, "name": "Ann", "email": "a@x.io"}))
            .await
            .unwrap();
        assert_eq!(user.key(), Some(&DbValue::Int(1)));
        assert_eq!(user.get("email"), Some(&DbValue::from("a@x.io")));
    }

    #[tokio::test]
    async fn test_find_update_delete() {
        let db = store().await;
        let user = Users::create(&db, json!({"name": "Ann"})).await.unwrap();
        let id = user.key().cloned().unwrap();

        let changed = Users::update(&db, id.clone(), json!({"name": "Bea", "id": 50}))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let found = Users::find(&db, id.clone()).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&DbValue::from("Bea")));

        assert_eq!(Users::delete(&db, id.clone()).await.unwrap(), 1);
        assert!(Users::find(&db, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paginate_second_page() {
        let db = store().await;
        for i in 0..15 {
            Users::create(&db, json!({"name": format!("user{i}")})).await.unwrap();
        }

        let page = Users::paginate(&db, 10, 2, Record::new(), Some(("id", "asc")))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 5);
        assert_eq!(page.total, 15);
        assert_eq!(page.last_page, 2);
        assert_eq!(page.data[0].get("name"), Some(&DbValue::from("user10")));
    }

    #[tokio::test]
    async fn test_paginate_filters_and_rejects_bad_arguments() {
        let db = store().await;
        for name in ["a", "b", "a"] {
            Users::create(&db, json!({"name": name})).await.unwrap();
        }

        let page = Users::paginate(&db, 10, 1, [("name", "a")], None).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.last_page, 1);

        let empty = Users::paginate(&db, 10, 1, [("name", "zzz")], None).await.unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.last_page, 0);

        assert!(Users::paginate(&db, 0, 1, Record::new(), None).await.is_err());
        assert!(Users::paginate(&db, 10, 0, Record::new(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_paginate_with_huge_page_size() {
        let db = store().await;
        for name in ["a", "b"] {
            Users::create(&db, json!({"name": name})).await.unwrap();
        }

        let page = Users::paginate(&db, i64::MAX, 1, Record::new(), None).await.unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total, 2);
        assert_eq!(page.last_page, 1);

        let beyond = Users::paginate(&db, i64::MAX, 2, Record::new(), None).await.unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.last_page, 1);
    }

    #[tokio::test]
    async fn test_transaction_rollback_hides_insert() {
        let db = store().await;
        let attempted = Users::transaction(&db, |tx| async move {
            let user = Users::create(&tx, json!({"name": "ghost"})).await?;
            let id = user.key().cloned().unwrap_or(DbValue::Null);
            Err::<DbValue, _>(Error::InvalidQuery {
                reason: format!("abort after inserting {id}"),
            })
        })
        .await;

        assert!(matches!(attempted, Err(Error::Transaction { .. })));
        assert!(Users::find(&db, 1).await.unwrap().is_none());
        assert!(Users::all(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_refresh() {
        let db = store().await;
        let mut user = Users::new();
        user.set("name", "Ann").unwrap();
        user.save(&db).await.unwrap();
        assert_eq!(user.key(), Some(&DbValue::Int(1)));

        user.set("name", "Bea").unwrap();
        user.save(&db).await.unwrap();
        let mut copy = Users::find(&db, 1).await.unwrap().unwrap();
        assert_eq!(copy.get("name"), Some(&DbValue::from("Bea")));

        Users::update(&db, 1, json!({"name": "Cy"})).await.unwrap();
        copy.refresh(&db).await.unwrap();
        assert_eq!(copy.get("name"), Some(&DbValue::from("Cy")));
        assert!(Users::new().refresh(&db).await.is_err());
    }

    #[tokio::test]
    async fn test_relations_resolve() {
        let db = store().await;
        let ann = Users::create(&db, json!({"name": "Ann", "password": "secret"})).await.unwrap();
        Users::create(&db, json!({"name": "Bob"})).await.unwrap();
        for title in ["one", "two"] {
            Model::<Post>::create(&db, json!({"user_id": 1, "title": title})).await.unwrap();
        }
        Model::<Role>::create(&db, json!({"name": "admin"})).await.unwrap();
        Model::<Role>::create(&db, json!({"name": "editor"})).await.unwrap();
        db.execute("INSERT INTO role_user (user_id, role_id) VALUES (1, 2)", &[])
            .await
            .unwrap();

        let mut ann = ann;
        assert!(matches!(ann.load(&db, "posts").await.unwrap(), Loaded::Many(p) if p.len() == 2));
        assert!(matches!(ann.load(&db, "latest_post").await.unwrap(), Loaded::One(Some(_))));
        match ann.load(&db, "roles").await.unwrap() {
            Loaded::Many(roles) => {
                assert_eq!(roles.len(), 1);
                assert_eq!(roles[0]["name"], DbValue::from("editor"));
            }
            Loaded::One(_) => panic!("roles must be a collection"),
        }
        assert!(ann.load(&db, "followers").await.is_err());

        let mut post = Model::<Post>::find(&db, 1).await.unwrap().unwrap();
        match post.load(&db, "author").await.unwrap() {
            Loaded::One(Some(author)) => assert_eq!(author["name"], DbValue::from("Ann")),
            other => panic!("unexpected author: {other:?}"),
        }

        // related hidden fields stay hidden
        let author = post.to_array();
        assert!(author["author"].get("password").is_none());
    }

    #[tokio::test]
    async fn test_eager_loading() {
        let db = store().await;
        for name in ["Ann", "Bob"] {
            Users::create(&db, json!({"name": name})).await.unwrap();
        }
        Model::<Post>::create(&db, json!({"user_id": 2, "title": "hi"})).await.unwrap();

        let users = Users::with(&db, &["posts"]).order_by("id", "asc").get().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].to_array()["posts"], json!([]));
        assert_eq!(users[1].to_array()["posts"][0]["title"], json!("hi"));

        let bob = Users::where_(&db, "name", "=", "Bob").first().await.unwrap().unwrap();
        assert!(bob.relation("posts").is_none());
    }

    #[tokio::test]
    async fn test_raw_query_as_model() {
        let db = store().await;
        Users::create(&db, json!({"name": "Ann"})).await.unwrap();
        let users = Users::raw_query_as_model(&db, "SELECT * FROM users WHERE name = ?", vec!["Ann".into()])
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(Users::first_where(&db, "name", "Ann").await.unwrap().map(|u| u.key().cloned()), Some(Some(DbValue::Int(1))));
    }
}
