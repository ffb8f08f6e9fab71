//! SQLite storage implementation.

use color_eyre::eyre::WrapErr as _;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;

use crate::models::*;
use crate::schema::objects;
use crate::traits::*;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// SQLite-based object storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database URL.
    pub fn new(database_url: &str) -> color_eyre::eyre::Result<Self> {
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        let manager = ConnectionManager::<SqliteConnection>::new(path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .wrap_err("failed to create connection pool")?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database with migrations applied.
    pub fn in_memory() -> color_eyre::eyre::Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .wrap_err("failed to create in-memory pool")?;

        let storage = Self { pool };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Run migrations.
    pub fn run_migrations(&self) -> color_eyre::eyre::Result<()> {
        use diesel_migrations::MigrationHarness as _;

        let mut conn = self
            .pool
            .get()
            .wrap_err("failed to get connection for migrations")?;

        conn.run_pending_migrations(crate::MIGRATIONS)
            .map_err(|e| color_eyre::eyre::eyre!("migration failed: {}", e))?;

        Ok(())
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<ConnectionManager<SqliteConnection>>, StoreError> {
        self.pool.get().map_err(StoreError::backend)
    }
}

impl ObjectStore for SqliteStorage {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let mut conn = self.conn()?;

        let row: Option<ObjectRow> = objects::table
            .filter(objects::bucket.eq(bucket))
            .filter(objects::key.eq(key))
            .select(ObjectRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(StoreError::backend)?;

        Ok(row.map(|r| StoredObject {
            body: r.body,
            version: Some(r.version_id),
            cache_control: r.cache_control,
        }))
    }

    fn put(&self, object: PutObject<'_>) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        let version = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        let row = NewObject {
            bucket: object.bucket,
            key: object.key,
            body: object.body,
            version_id: &version,
            cache_control: object.cache_control,
            updated_at: now,
        };

        let result = match &object.condition {
            PutCondition::CreateOnly => diesel::insert_into(objects::table)
                .values(&row)
                .execute(&mut conn),
            PutCondition::Overwrite => diesel::insert_into(objects::table)
                .values(&row)
                .on_conflict((objects::bucket, objects::key))
                .do_update()
                .set((
                    objects::body.eq(object.body),
                    objects::version_id.eq(&version),
                    objects::cache_control.eq(object.cache_control),
                    objects::updated_at.eq(now),
                ))
                .execute(&mut conn),
            PutCondition::IfMatch(expected) => diesel::update(
                objects::table
                    .filter(objects::bucket.eq(object.bucket))
                    .filter(objects::key.eq(object.key))
                    .filter(objects::version_id.eq(expected)),
            )
            .set((
                objects::body.eq(object.body),
                objects::version_id.eq(&version),
                objects::cache_control.eq(object.cache_control),
                objects::updated_at.eq(now),
            ))
            .execute(&mut conn),
        };

        match result {
            Ok(0) => Err(StoreError::Conflict {
                bucket: object.bucket.to_string(),
                key: object.key.to_string(),
            }),
            Ok(_) => {
                tracing::debug!(bucket = object.bucket, key = object.key, version = %version, "stored object");
                Ok(Some(version))
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(StoreError::Conflict {
                    bucket: object.bucket.to_string(),
                    key: object.key.to_string(),
                })
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;

        let pattern = format!("{}%", escape_like(prefix));
        let keys: Vec<String> = objects::table
            .filter(objects::bucket.eq(bucket))
            .filter(objects::key.like(pattern).escape('\\'))
            .select(objects::key)
            .order(objects::key.asc())
            .load(&mut conn)
            .map_err(StoreError::backend)?;

        // LIKE ignores ASCII case
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}

fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
