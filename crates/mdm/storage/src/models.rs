//! Database models.

use diesel::prelude::*;

use crate::schema::objects;

/// Stored object record.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = objects)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ObjectRow {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub version_id: String,
    pub cache_control: Option<String>,
    pub updated_at: chrono::NaiveDateTime,
}

/// New object for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = objects)]
pub struct NewObject<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub body: &'a [u8],
    pub version_id: &'a str,
    pub cache_control: Option<&'a str>,
    pub updated_at: chrono::NaiveDateTime,
}
