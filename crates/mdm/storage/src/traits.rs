//! Storage traits.

/// Cache directive for objects that never change once written.
pub const CACHE_IMMUTABLE: &str = "public, max-age=31536000, immutable";
/// Cache directive for objects that must always be revalidated.
pub const CACHE_NO_STORE: &str = "no-store";
/// Cache directive for the active authority.
pub const CACHE_PRIVATE_DAY: &str = "private, max-age=86400";

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A conditional write found the object missing, present or at another version.
    #[error("object {bucket}/{key} does not match the write precondition")]
    Conflict { bucket: String, key: String },
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Precondition of a put.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PutCondition {
    /// Overwrite any existing object.
    #[default]
    Overwrite,
    /// Only create; fail with [`StoreError::Conflict`] if the key exists (`If-None-Match: *`).
    CreateOnly,
    /// Only replace the object at this version (`If-Match`).
    IfMatch(String),
}

/// A write to object storage.
#[derive(Debug, Clone)]
pub struct PutObject<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub body: &'a [u8],
    pub cache_control: Option<&'a str>,
    pub condition: PutCondition,
}

impl<'a> PutObject<'a> {
    pub fn new(bucket: &'a str, key: &'a str, body: &'a [u8]) -> Self {
        Self {
            bucket,
            key,
            body,
            cache_control: None,
            condition: PutCondition::Overwrite,
        }
    }

    pub fn cache_control(mut self, directive: &'a str) -> Self {
        self.cache_control = Some(directive);
        self
    }

    pub fn create_only(mut self) -> Self {
        self.condition = PutCondition::CreateOnly;
        self
    }

    pub fn if_match(mut self, version: impl Into<String>) -> Self {
        self.condition = PutCondition::IfMatch(version.into());
        self
    }
}

/// An object read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub version: Option<String>,
    pub cache_control: Option<String>,
}

/// Key-value blob storage addressed by bucket and key.
pub trait ObjectStore: Send + Sync {
    /// Read an object, `None` if absent.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Write an object, returning the version identifier assigned by the store, if any.
    fn put(&self, object: PutObject<'_>) -> Result<Option<String>, StoreError>;

    /// Keys in `bucket` starting with `prefix`, in lexicographic order.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        (**self).get(bucket, key)
    }

    fn put(&self, object: PutObject<'_>) -> Result<Option<String>, StoreError> {
        (**self).put(object)
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(bucket, prefix)
    }
}
