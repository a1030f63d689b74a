use crate::constants;
use crate::database_migrate_refinery;
use crate::error::Error;
use crate::error::ErrorContext;
use crate::error::Result;
use chrono::Utc;
use log::debug;
use log::info;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::Rng;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use rusqlite::OpenFlags;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use warp::http::StatusCode;

pub type DBTime = i64;

/// Identifier of a stored document: 4 bytes of big-endian seconds since the epoch,
/// followed by 8 random bytes. Rendered as 24 lowercase hex characters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn generate() -> ObjectId {
        let mut bytes = [0u8; 12];
        let seconds = Utc::now().timestamp() as u32;
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        rand::thread_rng().fill(&mut bytes[4..]);
        ObjectId(bytes)
    }

    /// Parse the textual form of an id. `None` if the input is not 24 hex characters.
    pub fn parse(id: &str) -> Option<ObjectId> {
        let decoded = hex::decode(id).ok()?;
        if decoded.len() != 12 {
            return None;
        }
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&decoded);
        Some(ObjectId(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Collection {
    Items,
    ClockInRecords,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Items => constants::ITEMS_COLLECTION,
            Collection::ClockInRecords => constants::CLOCK_IN_COLLECTION,
        }
    }

    /// Fields every document of this collection carries, `id` excluded.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Collection::Items => &[
                "email",
                "item_name",
                "quantity",
                "expiry_date",
                "insert_date",
            ],
            Collection::ClockInRecords => &["email", "location", "insert_datetime"],
        }
    }

    fn check_field(self, field: &str) -> Result<()> {
        if self.fields().contains(&field) {
            Ok(())
        } else {
            Err(Error {
                code: StatusCode::INTERNAL_SERVER_ERROR,
                msg: format!("Field {} does not exist in collection {}", field, self.name()),
            })
        }
    }
}

/// A document as read back from a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: ObjectId,
    pub fields: HashMap<String, SqlValue>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Comparison {
    Equals,
    GreaterThan,
    GreaterOrEquals,
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    field: &'static str,
    comparison: Comparison,
    value: SqlValue,
}

/// Conjunction of field comparisons. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Filter {
        Filter::default()
    }

    pub fn and<V: Into<SqlValue>>(
        mut self,
        field: &'static str,
        comparison: Comparison,
        value: V,
    ) -> Filter {
        self.conditions.push(Condition {
            field,
            comparison,
            value: value.into(),
        });
        self
    }

    /// Add a condition only if the value is present.
    pub fn and_some<V: Into<SqlValue>>(
        self,
        field: &'static str,
        comparison: Comparison,
        value: Option<V>,
    ) -> Filter {
        match value {
            Some(value) => self.and(field, comparison, value),
            None => self,
        }
    }
}

fn add_sql_param(query: &mut String, column: &str, operation: &Comparison) {
    query.push_str(column);
    match operation {
        Comparison::Equals => query.push_str(" = "),
        Comparison::GreaterThan => query.push_str(" > "),
        Comparison::GreaterOrEquals => query.push_str(" >= "),
    };
    query.push_str("? AND ");
}

/// Handle to the document store. Cloning is cheap, all clones share one connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating if needed) the database file and bring its collections up-to-date.
    pub fn open(path: &Path, pool_size: u32) -> Result<Database> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .context(|| format!("Failed to create database directory {}", dir.display()))?;
        }
        info!("Using database {}", path.display());
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
        Database::with_manager(manager, pool_size)
    }

    /// Private in-memory database, alive as long as the returned handle (or a clone) is.
    pub fn open_in_memory() -> Result<Database> {
        let name: u64 = rand::thread_rng().gen();
        let manager =
            SqliteConnectionManager::file(format!("file:memdb{}?mode=memory&cache=shared", name))
                .with_flags(
                    OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE,
                );
        Database::with_manager(manager, 2)
    }

    fn with_manager(manager: SqliteConnectionManager, pool_size: u32) -> Result<Database> {
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context_str("Failed to create SQLite connection pool")?;
        let mut conn = pool.get()?;
        database_migrate_refinery::migrate(&mut conn)?;
        drop(conn);
        Ok(Database { pool })
    }

    pub fn insert(&self, collection: Collection, fields: &[(&str, SqlValue)]) -> Result<ObjectId> {
        let mut sql = format!("INSERT INTO {} (id", collection.name());
        for (name, _) in fields {
            collection.check_field(name)?;
            sql.push_str(", ");
            sql.push_str(name);
        }
        sql.push_str(") VALUES (?");
        sql.push_str(&", ?".repeat(fields.len()));
        sql.push_str(");");
        debug!("Executing insert SQL: {}", sql);

        let id = ObjectId::generate();
        let mut params = vec![SqlValue::Text(id.to_string())];
        params.extend(fields.iter().map(|(_, value)| value.clone()));

        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare_cached(&sql)
            .context(|| format!("SQL query: {}", sql))?;
        stmt.execute(params_from_iter(params.iter()))
            .context_str("Failed to execute insert with parameters")?;
        Ok(id)
    }

    pub fn find_one(&self, collection: Collection, id: &ObjectId) -> Result<Option<Document>> {
        let sql = format!("{} WHERE id = ?;", select_clause(collection));
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let document = match rows.next()? {
            Some(row) => Some(row_to_document(collection, row)?),
            None => None,
        };
        Ok(document)
    }

    pub fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Document>> {
        let mut sql = format!("{} WHERE ", select_clause(collection));
        let mut params: Vec<&SqlValue> = Vec::new();
        for condition in &filter.conditions {
            collection.check_field(condition.field)?;
            add_sql_param(&mut sql, condition.field, &condition.comparison);
            params.push(&condition.value);
        }
        sql.push_str("1 ;"); // older sqlite versions do not support `true`
        debug!("Executing search SQL: {}", sql);

        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare_cached(&sql)
            .context(|| format!("SQL query: {}", sql))?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(row_to_document(collection, row)?);
        }
        Ok(result)
    }

    /// Overwrite the given fields of one document.
    /// Returns the number of modified documents: 0 if the id does not exist,
    /// or if every field already holds the supplied value.
    pub fn update_one(
        &self,
        collection: Collection,
        id: &ObjectId,
        fields: &[(&str, SqlValue)],
    ) -> Result<usize> {
        if fields.is_empty() {
            return Err(Error {
                code: StatusCode::INTERNAL_SERVER_ERROR,
                msg: format!("Empty update requested for {} {}", collection.name(), id),
            });
        }
        let mut assignments = Vec::new();
        let mut differences = Vec::new();
        for (name, _) in fields {
            collection.check_field(name)?;
            assignments.push(format!("{} = ?", name));
            differences.push(format!("{} IS NOT ?", name));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? AND ({});",
            collection.name(),
            assignments.join(", "),
            differences.join(" OR "),
        );
        debug!("Executing update SQL: {}", sql);

        let id = SqlValue::Text(id.to_string());
        let params = fields
            .iter()
            .map(|(_, value)| value)
            .chain(std::iter::once(&id))
            .chain(fields.iter().map(|(_, value)| value));
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare_cached(&sql)
            .context(|| format!("SQL query: {}", sql))?;
        let modified = stmt.execute(params_from_iter(params))?;
        Ok(modified)
    }

    /// Returns the number of deleted documents, 0 or 1.
    pub fn delete_one(&self, collection: Collection, id: &ObjectId) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE id = ?;", collection.name());
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let deleted = stmt.execute(params![id.to_string()])?;
        Ok(deleted)
    }

    /// Remove the table backing a collection, so that every later call on it fails.
    #[cfg(test)]
    pub(crate) fn drop_collection(&self, collection: Collection) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(&format!("DROP TABLE {};", collection.name()))?;
        Ok(())
    }

    /// Number of documents for each distinct value of `field`, in no particular order.
    pub fn aggregate_count_by(
        &self,
        collection: Collection,
        field: &str,
    ) -> Result<Vec<(SqlValue, i64)>> {
        collection.check_field(field)?;
        let sql = format!(
            "SELECT {field}, COUNT(*) FROM {table} GROUP BY {field};",
            field = field,
            table = collection.name(),
        );
        debug!("Executing aggregate SQL: {}", sql);
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push((row.get(0)?, row.get(1)?));
        }
        Ok(result)
    }
}

fn select_clause(collection: Collection) -> String {
    format!(
        "SELECT id, {} FROM {}",
        collection.fields().join(", "),
        collection.name()
    )
}

fn row_to_document(collection: Collection, row: &rusqlite::Row) -> Result<Document> {
    let id: String = row.get(0)?;
    let id = ObjectId::parse(&id).ok_or_else(|| Error {
        code: StatusCode::INTERNAL_SERVER_ERROR,
        msg: format!("Malformed id {} stored in {}", id, collection.name()),
    })?;
    let mut fields = HashMap::new();
    for (index, name) in collection.fields().iter().enumerate() {
        let value: SqlValue = row.get(index + 1)?;
        fields.insert(name.to_string(), value);
    }
    Ok(Document { id, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn clock_in(email: &str, location: &str, date: DBTime) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("email", SqlValue::Text(email.to_string())),
            ("location", SqlValue::Text(location.to_string())),
            ("insert_datetime", SqlValue::Integer(date)),
        ]
    }

    #[test]
    fn test_object_id_format() {
        let id = ObjectId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 24);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
        assert_eq!(ObjectId::parse(&text), Some(id));
        assert_eq!(ObjectId::parse(&text.to_uppercase()), Some(id));
        assert_eq!(ObjectId::parse("not-an-id"), None);
        assert_eq!(ObjectId::parse("abcdef"), None);
        assert_eq!(ObjectId::parse(""), None);
    }

    #[test]
    fn test_insert_and_find_one() -> Result<()> {
        let db = Database::open_in_memory()?;
        let date = Utc::now().timestamp_millis();
        let id = db.insert(Collection::ClockInRecords, &clock_in("a@b.c", "office", date))?;
        let document = db.find_one(Collection::ClockInRecords, &id)?;
        let document = document.expect("document was just inserted");
        assert_eq!(document.id, id);
        assert_eq!(
            document.fields.get("location"),
            Some(&SqlValue::Text("office".to_string()))
        );
        assert_eq!(
            document.fields.get("insert_datetime"),
            Some(&SqlValue::Integer(date))
        );
        assert_eq!(db.find_one(Collection::Items, &id)?, None);
        Ok(())
    }

    #[test]
    fn test_insert_generates_distinct_ids() -> Result<()> {
        let db = Database::open_in_memory()?;
        let mut ids = HashSet::new();
        for i in 0..50 {
            ids.insert(db.insert(Collection::ClockInRecords, &clock_in("a", "b", i))?);
        }
        assert_eq!(ids.len(), 50);
        Ok(())
    }

    #[test]
    fn test_unknown_field_is_rejected() -> Result<()> {
        let db = Database::open_in_memory()?;
        let fields = vec![("color; DROP TABLE items", SqlValue::Integer(1))];
        let err = db.insert(Collection::Items, &fields).unwrap_err();
        assert_eq!(err.code, StatusCode::INTERNAL_SERVER_ERROR);
        let err = db.aggregate_count_by(Collection::ClockInRecords, "quantity");
        assert!(err.is_err());
        Ok(())
    }

    #[test]
    fn test_search() -> Result<()> {
        let db = Database::open_in_memory()?;
        let c = Collection::ClockInRecords;
        db.insert(c, &clock_in("one", "office", 100))?;
        db.insert(c, &clock_in("one", "home", 200))?;
        db.insert(c, &clock_in("two", "office", 300))?;

        assert_eq!(db.find(c, &Filter::new())?.len(), 3);
        let by_email = Filter::new().and("email", Comparison::Equals, "one".to_string());
        assert_eq!(db.find(c, &by_email)?.len(), 2);
        let after = Filter::new().and("insert_datetime", Comparison::GreaterThan, 200);
        assert_eq!(db.find(c, &after)?.len(), 1);
        let from = Filter::new().and("insert_datetime", Comparison::GreaterOrEquals, 200);
        assert_eq!(db.find(c, &from)?.len(), 2);
        let combined = Filter::new()
            .and("email", Comparison::Equals, "one".to_string())
            .and("location", Comparison::Equals, "office".to_string());
        assert_eq!(db.find(c, &combined)?.len(), 1);
        let none = Filter::new().and("email", Comparison::Equals, "nobody".to_string());
        assert!(db.find(c, &none)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_and_some_skips_absent_values() {
        let filter = Filter::new()
            .and_some::<String>("email", Comparison::Equals, None)
            .and_some("quantity", Comparison::GreaterOrEquals, Some(3));
        assert_eq!(filter.conditions.len(), 1);
        let empty = Filter::new().and_some::<i64>("quantity", Comparison::Equals, None);
        assert!(empty.conditions.is_empty());
    }

    #[test]
    fn test_update_one_counts_only_changes() -> Result<()> {
        let db = Database::open_in_memory()?;
        let c = Collection::ClockInRecords;
        let id = db.insert(c, &clock_in("a", "office", 1))?;
        let same = vec![("email", SqlValue::Text("a".to_string()))];
        assert_eq!(db.update_one(c, &id, &same)?, 0);
        let changed = vec![
            ("email", SqlValue::Text("a".to_string())),
            ("location", SqlValue::Text("home".to_string())),
        ];
        assert_eq!(db.update_one(c, &id, &changed)?, 1);
        let document = db.find_one(c, &id)?.expect("document exists");
        assert_eq!(
            document.fields.get("location"),
            Some(&SqlValue::Text("home".to_string()))
        );
        assert_eq!(
            document.fields.get("insert_datetime"),
            Some(&SqlValue::Integer(1))
        );
        assert_eq!(db.update_one(c, &ObjectId::generate(), &changed)?, 0);
        Ok(())
    }

    #[test]
    fn test_delete_one() -> Result<()> {
        let db = Database::open_in_memory()?;
        let c = Collection::ClockInRecords;
        let id = db.insert(c, &clock_in("a", "office", 1))?;
        assert_eq!(db.delete_one(c, &id)?, 1);
        assert_eq!(db.delete_one(c, &id)?, 0);
        assert_eq!(db.find_one(c, &id)?, None);
        Ok(())
    }

    #[test]
    fn test_aggregate_count_by() -> Result<()> {
        let db = Database::open_in_memory()?;
        let c = Collection::ClockInRecords;
        db.insert(c, &clock_in("a", "x", 1))?;
        db.insert(c, &clock_in("a", "y", 2))?;
        db.insert(c, &clock_in("b", "x", 3))?;
        let mut counts = db.aggregate_count_by(c, "email")?;
        counts.sort_by(|l, r| l.1.cmp(&r.1).reverse());
        assert_eq!(
            counts,
            vec![
                (SqlValue::Text("a".to_string()), 2),
                (SqlValue::Text("b".to_string()), 1),
            ]
        );
        Ok(())
    }
}
