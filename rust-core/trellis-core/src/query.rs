//! # Query Builder
//!
//! Fluent, single-table statement builder.
//!
//! Statements are assembled by a [`SqlWriter`], whose only way to emit a
//! placeholder is to push its binding in the same call. The binding list is
//! therefore always in placeholder order, which is what makes
//! `UPDATE ... SET a = ? WHERE id = ?` bind `[a, id]`.
//!
//! Every terminal operation (`get`, `first`, `insert`, `update`, `delete`,
//! `count`) resets the accumulated clauses, so one builder can be reused
//! for unrelated queries one after another. A builder is not meant to be
//! shared between in-flight queries.

use crate::database::{Database, DbValue, Dialect, IntoRecord, Record};
use crate::error::{Error, Result};
use std::fmt;

const OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE"];

/// Check a table or column name before it is written into SQL text
///
/// Accepts `name` and `table.name` made of ASCII letters, digits and `_`.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let mut parts = identifier.split('.');
    let ok = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => valid_part(name),
        (Some(table), Some(name), None) => valid_part(table) && valid_part(name),
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(Error::invalid_query(format!("invalid identifier `{identifier}`")))
    }
}

fn validate_column_expr(column: &str) -> Result<()> {
    match column.strip_suffix(".*") {
        _ if column == "*" => Ok(()),
        Some(table) => validate_identifier(table),
        None => validate_identifier(column),
    }
}

/// A finished statement: SQL text plus positional bindings
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    bindings: Vec<DbValue>,
}

impl Statement {
    /// SQL text
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bindings in placeholder order
    #[must_use]
    pub fn bindings(&self) -> &[DbValue] {
        &self.bindings
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Append-only SQL text with bindings kept in lockstep
#[derive(Debug)]
pub struct SqlWriter {
    dialect: Dialect,
    sql: String,
    bindings: Vec<DbValue>,
}

impl SqlWriter {
    /// Start an empty statement
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            bindings: Vec::new(),
        }
    }

    /// Append trusted SQL text (keywords, validated identifiers)
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder and its binding
    pub fn push_value(&mut self, value: DbValue) -> &mut Self {
        self.bindings.push(value);
        let placeholder = self.dialect.placeholder(self.bindings.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Append `sep`-separated placeholders for every value
    pub fn push_values(&mut self, values: impl IntoIterator<Item = DbValue>, sep: &str) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            self.push_value(value);
        }
        self
    }

    /// Append caller SQL written with `?` placeholders
    ///
    /// Each `?` outside a quoted literal consumes the next binding, so the
    /// placeholders are rewritten for the dialect and the counts must agree.
    pub fn push_raw(&mut self, sql: &str, bindings: Vec<DbValue>) -> Result<&mut Self> {
        let expected = bindings.len();
        let mut values = bindings.into_iter();
        let mut quote: Option<char> = None;
        let mut used = 0;

        for c in sql.chars() {
            match (quote, c) {
                (None, '\'' | '"') => {
                    quote = Some(c);
                    self.sql.push(c);
                }
                (Some(open), _) if open == c => {
                    quote = None;
                    self.sql.push(c);
                }
                (None, '?') => {
                    let value = values.next().ok_or_else(|| {
                        Error::invalid_query(format!(
                            "statement has more placeholders than the {expected} binding(s) given"
                        ))
                    })?;
                    used += 1;
                    self.push_value(value);
                }
                _ => self.sql.push(c),
            }
        }

        if used == expected {
            Ok(self)
        } else {
            Err(Error::invalid_query(format!(
                "statement has {used} placeholder(s) but {expected} binding(s) were given"
            )))
        }
    }

    /// Finish the statement
    #[must_use]
    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            bindings: self.bindings,
        }
    }
}

/// Right-hand side of a WHERE condition
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Single(DbValue),
    List(Vec<DbValue>),
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    column: String,
    operator: String,
    operand: Operand,
}

/// Fluent statement builder bound to one table
///
/// # Example
///
/// ```ignore
/// let mut users = QueryBuilder::new(db.clone(), "users");
/// let adults = users
///     .select(&["id", "name"])
///     .where_("age", ">=", 18)
///     .order_by("name", "asc")
///     .limit(20)
///     .get()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    db: Database,
    table: String,
    key: String,
    columns: Vec<String>,
    wheres: Vec<Condition>,
    orders: Vec<(String, String)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    /// Builder for `table`, with `id` as identity column
    pub fn new(db: Database, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
            key: "id".to_string(),
            columns: Vec::new(),
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Set the identity column reported by `insert`
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Connection this builder runs on
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Table this builder targets
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns to select (default `*`)
    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.columns = columns.iter().map(ToString::to_string).collect();
        self
    }

    /// Add an AND-ed condition
    ///
    /// The operator is checked when the statement is built.
    pub fn where_(
        &mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<DbValue>,
    ) -> &mut Self {
        self.wheres.push(Condition {
            column: column.into(),
            operator: operator.into(),
            operand: Operand::Single(value.into()),
        });
        self
    }

    /// Add an AND-ed equality condition
    pub fn where_eq(&mut self, column: impl Into<String>, value: impl Into<DbValue>) -> &mut Self {
        self.where_(column, "=", value)
    }

    /// Add several AND-ed conditions at once
    pub fn where_all<C, O, V>(&mut self, conditions: impl IntoIterator<Item = (C, O, V)>) -> &mut Self
    where
        C: Into<String>,
        O: Into<String>,
        V: Into<DbValue>,
    {
        for (column, operator, value) in conditions {
            self.where_(column, operator, value);
        }
        self
    }

    /// Add a `column IN (...)` condition
    ///
    /// An empty list matches nothing.
    pub fn where_in<V: Into<DbValue>>(
        &mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> &mut Self {
        self.wheres.push(Condition {
            column: column.into(),
            operator: "IN".to_string(),
            operand: Operand::List(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Add an ORDER BY term; `direction` is `asc` or `desc`
    pub fn order_by(&mut self, column: impl Into<String>, direction: &str) -> &mut Self {
        self.orders.push((column.into(), direction.to_string()));
        self
    }

    /// Cap the number of rows
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    fn reset(&mut self) {
        self.columns.clear();
        self.wheres.clear();
        self.orders.clear();
        self.limit = None;
        self.offset = None;
    }

    fn write_where(&self, w: &mut SqlWriter) -> Result<()> {
        for (i, condition) in self.wheres.iter().enumerate() {
            validate_identifier(&condition.column)?;
            w.push(if i == 0 { " WHERE " } else { " AND " });

            match &condition.operand {
                Operand::List(values) if values.is_empty() => {
                    w.push("1 = 0");
                }
                Operand::List(values) => {
                    w.push(&condition.column).push(" IN (");
                    w.push_values(values.iter().cloned(), ", ").push(")");
                }
                Operand::Single(value) => {
                    let operator = condition.operator.trim().to_ascii_uppercase();
                    if !OPERATORS.contains(&operator.as_str()) {
                        return Err(Error::invalid_query(format!(
                            "unsupported operator `{}`",
                            condition.operator
                        )));
                    }
                    match (value, operator.as_str()) {
                        (DbValue::Null, "=") => {
                            w.push(&condition.column).push(" IS NULL");
                        }
                        (DbValue::Null, "!=" | "<>") => {
                            w.push(&condition.column).push(" IS NOT NULL");
                        }
                        _ => {
                            w.push(&condition.column)
                                .push(" ")
                                .push(&operator)
                                .push(" ")
                                .push_value(value.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn write_tail(&self, w: &mut SqlWriter) -> Result<()> {
        for (i, (column, direction)) in self.orders.iter().enumerate() {
            validate_identifier(column)?;
            let direction = match direction.to_ascii_lowercase().as_str() {
                "asc" => "ASC",
                "desc" => "DESC",
                _ => {
                    return Err(Error::invalid_query(format!(
                        "order direction must be asc or desc, got `{direction}`"
                    )))
                }
            };
            w.push(if i == 0 { " ORDER BY " } else { ", " })
                .push(column)
                .push(" ")
                .push(direction);
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => {
                w.push(&format!(" LIMIT {limit}"));
            }
            (None, Some(_)) if self.db.dialect() == Dialect::Sqlite => {
                w.push(" LIMIT -1");
            }
            (None, _) => {}
        }
        if let Some(offset) = self.offset {
            w.push(&format!(" OFFSET {offset}"));
        }
        Ok(())
    }

    /// SELECT for the accumulated clauses
    pub fn select_statement(&self) -> Result<Statement> {
        validate_identifier(&self.table)?;
        let mut w = SqlWriter::new(self.db.dialect());
        w.push("SELECT ");
        if self.columns.is_empty() {
            w.push("*");
        } else {
            for (i, column) in self.columns.iter().enumerate() {
                validate_column_expr(column)?;
                if i > 0 {
                    w.push(", ");
                }
                w.push(column);
            }
        }
        w.push(" FROM ").push(&self.table);
        self.write_where(&mut w)?;
        self.write_tail(&mut w)?;
        Ok(w.finish())
    }

    /// `SELECT COUNT(*)` under the accumulated WHERE clause
    ///
    /// Selected columns, ordering and paging are left out.
    pub fn count_statement(&self) -> Result<Statement> {
        validate_identifier(&self.table)?;
        let mut w = SqlWriter::new(self.db.dialect());
        w.push("SELECT COUNT(*) AS aggregate FROM ").push(&self.table);
        self.write_where(&mut w)?;
        Ok(w.finish())
    }

    /// INSERT of `data`, columns and bindings in `data` order
    pub fn insert_statement(&self, data: &Record) -> Result<Statement> {
        validate_identifier(&self.table)?;
        let mut w = SqlWriter::new(self.db.dialect());
        w.push("INSERT INTO ").push(&self.table);

        if data.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            w.push(" (");
            for (i, column) in data.keys().enumerate() {
                validate_identifier(column)?;
                if i > 0 {
                    w.push(", ");
                }
                w.push(column);
            }
            w.push(") VALUES (");
            w.push_values(data.values().cloned(), ", ").push(")");
        }

        if self.db.dialect().returns_identity() {
            validate_identifier(&self.key)?;
            w.push(" RETURNING ").push(&self.key);
        }
        Ok(w.finish())
    }

    /// UPDATE setting `data` under the accumulated WHERE clause
    ///
    /// SET bindings come first, WHERE bindings after them.
    pub fn update_statement(&self, data: &Record) -> Result<Statement> {
        validate_identifier(&self.table)?;
        if data.is_empty() {
            return Err(Error::invalid_query("update requires at least one column"));
        }

        let mut w = SqlWriter::new(self.db.dialect());
        w.push("UPDATE ").push(&self.table).push(" SET ");
        for (i, (column, value)) in data.iter().enumerate() {
            validate_identifier(column)?;
            if i > 0 {
                w.push(", ");
            }
            w.push(column).push(" = ").push_value(value.clone());
        }
        self.write_where(&mut w)?;
        Ok(w.finish())
    }

    /// DELETE under the accumulated WHERE clause
    pub fn delete_statement(&self) -> Result<Statement> {
        validate_identifier(&self.table)?;
        let mut w = SqlWriter::new(self.db.dialect());
        w.push("DELETE FROM ").push(&self.table);
        self.write_where(&mut w)?;
        Ok(w.finish())
    }

    /// Run the SELECT and return every row
    pub async fn get(&mut self) -> Result<Vec<Record>> {
        let statement = self.select_statement();
        self.reset();
        let statement = statement?;
        self.db.fetch_all(statement.sql(), statement.bindings()).await
    }

    /// Run the SELECT with `LIMIT 1`
    pub async fn first(&mut self) -> Result<Option<Record>> {
        self.limit = Some(1);
        let statement = self.select_statement();
        self.reset();
        let statement = statement?;
        self.db
            .fetch_optional(statement.sql(), statement.bindings())
            .await
    }

    /// Insert `data` and return the identity assigned by the store
    pub async fn insert(&mut self, data: impl IntoRecord) -> Result<DbValue> {
        let statement = self.insert_statement(&data.into_record());
        self.reset();
        let statement = statement?;
        self.db
            .insert(statement.sql(), statement.bindings(), &self.key)
            .await
    }

    /// Update matching rows; returns the affected row count
    pub async fn update(&mut self, data: impl IntoRecord) -> Result<u64> {
        let statement = self.update_statement(&data.into_record());
        self.reset();
        let statement = statement?;
        self.db.execute(statement.sql(), statement.bindings()).await
    }

    /// Delete matching rows; returns the affected row count
    pub async fn delete(&mut self) -> Result<u64> {
        let statement = self.delete_statement();
        self.reset();
        let statement = statement?;
        self.db.execute(statement.sql(), statement.bindings()).await
    }

    /// Count matching rows
    pub async fn count(&mut self) -> Result<i64> {
        let statement = self.count_statement();
        self.reset();
        let statement = statement?;
        let row = self
            .db
            .fetch_optional(statement.sql(), statement.bindings())
            .await?;
        Ok(row
            .and_then(|r| r.get("aggregate").and_then(DbValue::as_i64))
            .unwrap_or(0))
    }

    /// Run caller SQL with `?` placeholders and return its rows
    ///
    /// Leaves the accumulated clauses untouched.
    pub async fn raw_query(&self, sql: &str, bindings: Vec<DbValue>) -> Result<Vec<Record>> {
        let mut w = SqlWriter::new(self.db.dialect());
        w.push_raw(sql, bindings)?;
        let statement = w.finish();
        self.db.fetch_all(statement.sql(), statement.bindings()).await
    }

    /// Execute caller SQL with `?` placeholders; returns the affected row count
    pub async fn raw_exec(&self, sql: &str, bindings: Vec<DbValue>) -> Result<u64> {
        let mut w = SqlWriter::new(self.db.dialect());
        w.push_raw(sql, bindings)?;
        let statement = w.finish();
        self.db.execute(statement.sql(), statement.bindings()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> QueryBuilder {
        let db = Database::memory().await.unwrap();
        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)",
            &[],
        )
        .await
        .unwrap();
        let mut q = QueryBuilder::new(db, "users");
        for (name, age) in [("Ann", 31), ("Bob", 17), ("Cid", 45), ("Dee", 17)] {
            q.insert([("name", DbValue::from(name)), ("age", DbValue::from(age))])
                .await
                .unwrap();
        }
        q
    }

    #[tokio::test]
    async fn test_update_binds_set_before_where() {
        let db = Database::memory().await.unwrap();
        let mut q = QueryBuilder::new(db, "users");
        q.where_("id", "=", 5);

        let statement = q.update_statement(&[("name", "A")].into_record()).unwrap();
        assert_eq!(statement.sql(), "UPDATE users SET name = ? WHERE id = ?");
        assert_eq!(statement.bindings(), &[DbValue::from("A"), DbValue::Int(5)]);
    }

    #[tokio::test]
    async fn test_select_statement_shape() {
        let db = Database::memory().await.unwrap();
        let mut q = QueryBuilder::new(db, "users");
        q.select(&["id", "name"])
            .where_all([("age", ">=", 18), ("age", "<", 65)])
            .where_in("id", [1, 2])
            .order_by("name", "desc")
            .limit(10)
            .offset(20);

        let statement = q.select_statement().unwrap();
        assert_eq!(
            statement.sql(),
            "SELECT id, name FROM users WHERE age >= ? AND age < ? AND id IN (?, ?) \
             ORDER BY name DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(statement.bindings().len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_operator_and_identifier_rejected() {
        let db = Database::memory().await.unwrap();
        let mut q = QueryBuilder::new(db.clone(), "users");
        q.where_("id", "; DROP", 1);
        assert!(matches!(q.select_statement(), Err(Error::InvalidQuery { .. })));

        let mut q = QueryBuilder::new(db.clone(), "users");
        q.where_("id = 1 OR 1", "=", 1);
        assert!(q.select_statement().is_err());

        let mut q = QueryBuilder::new(db, "users");
        q.order_by("name", "sideways");
        assert!(q.select_statement().is_err());
    }

    #[tokio::test]
    async fn test_get_filters_and_resets() {
        let mut q = seeded().await;

        let minors = q.where_("age", "<", 18).order_by("name", "asc").get().await.unwrap();
        assert_eq!(minors.len(), 2);
        assert_eq!(minors[0]["name"], DbValue::from("Bob"));

        // previous clauses must not leak into the next query
        let everyone = q.get().await.unwrap();
        assert_eq!(everyone.len(), 4);
    }

    #[tokio::test]
    async fn test_first_and_count() {
        let mut q = seeded().await;

        let oldest = q.order_by("age", "desc").first().await.unwrap().unwrap();
        assert_eq!(oldest["name"], DbValue::from("Cid"));

        assert_eq!(q.where_eq("age", 17).count().await.unwrap(), 2);
        assert_eq!(q.count().await.unwrap(), 4);

        let none = q.where_eq("name", "Zed").first().await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_count_leaves_selected_columns_alone() {
        let mut q = seeded().await;
        q.select(&["name"]).where_eq("age", 17).order_by("name", "asc");

        let count = q.count_statement().unwrap();
        assert_eq!(count.sql(), "SELECT COUNT(*) AS aggregate FROM users WHERE age = ?");
        let select = q.select_statement().unwrap();
        assert_eq!(
            select.sql(),
            "SELECT name FROM users WHERE age = ? ORDER BY name ASC"
        );

        let rows = q.get().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.keys().eq(["name"])));

        // count is terminal: the selection does not carry over
        q.select(&["name"]).where_eq("age", 17);
        assert_eq!(q.count().await.unwrap(), 2);
        let columns: Vec<_> = q.first().await.unwrap().unwrap().keys().cloned().collect();
        assert_eq!(columns, ["id", "name", "age"]);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let mut q = seeded().await;

        let changed = q.where_eq("age", 17).update([("age", 18)]).await.unwrap();
        assert_eq!(changed, 2);
        assert_eq!(q.where_eq("age", 18).count().await.unwrap(), 2);

        let removed = q.where_eq("name", "Ann").delete().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(q.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_where_in_empty_matches_nothing() {
        let mut q = seeded().await;
        let rows = q.where_in("id", Vec::<i64>::new()).get().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_offset_without_limit() {
        let mut q = seeded().await;
        let rows = q.order_by("id", "asc").offset(3).get().await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_raw_query_binds_values() {
        let q = seeded().await;
        let rows = q
            .raw_query(
                "SELECT name FROM users WHERE age = ? AND name != '?' ORDER BY name",
                vec![17.into()],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let err = q.raw_exec("DELETE FROM users WHERE id = ?", vec![]).await;
        assert!(matches!(err, Err(Error::InvalidQuery { .. })));
    }

    #[test]
    fn test_push_raw_rewrites_postgres_placeholders() {
        let mut w = SqlWriter::new(Dialect::Postgres);
        w.push_raw("SELECT * FROM t WHERE a = ? AND b = ?", vec![1.into(), 2.into()])
            .unwrap();
        let statement = w.finish();
        assert_eq!(statement.sql(), "SELECT * FROM t WHERE a = $1 AND b = $2");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("users.id").is_ok());
        assert!(validate_identifier("_tmp1").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("name; --").is_err());
        assert!(validate_column_expr("*").is_ok());
        assert!(validate_column_expr("users.*").is_ok());
    }
}
