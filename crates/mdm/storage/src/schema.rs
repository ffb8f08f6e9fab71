//! Diesel schema definitions.

diesel::table! {
    objects (bucket, key) {
        bucket -> Text,
        key -> Text,
        body -> Binary,
        version_id -> Text,
        cache_control -> Nullable<Text>,
        updated_at -> Timestamp,
    }
}
