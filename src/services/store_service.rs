//! src/services/store_service.rs
//!
//! StoreService — tenant-isolated object storage backed by SQLite for
//! metadata and local disk for payloads. Blobs live beneath
//! `base_path/{owner}/{bucket}/{shard}/{shard}/{object_key}`; the metadata
//! row is the source of truth for existence, and every operation is scoped
//! to the owning tenant.

use crate::models::{bucket::Bucket, object::StoredObject};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const OBJECT_COLUMNS: &str = "id, owner_id, bucket_name, object_key, file_name, \
     content_type, size_bytes, etag, version, created_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket name `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("empty upload payload")]
    EmptyPayload,
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// StoreService provides the object-store operations:
/// - Bucket create/list/delete (metadata CRUD)
/// - Upload an object (streams bytes to disk, then inserts metadata)
/// - List objects in a bucket
/// - Download an object by its system-generated key
/// - Delete an object (blob first, then the metadata row)
#[derive(Clone)]
pub struct StoreService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const BUCKET_NAME_MAX_LEN: usize = 63;

impl StoreService {
    /// Create a new StoreService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Bucket names become path components, so reject anything that could
    /// escape the storage root.
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };
        if name.is_empty() || name.len() > BUCKET_NAME_MAX_LEN {
            return Err(invalid("must be between 1 and 63 characters"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain `..`"));
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(invalid("cannot contain path separators or control characters"));
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(owner/bucket/key) and returns the first two bytes as
    /// lowercase hex strings (00-ff). Reduces file count per directory.
    fn object_shards(owner: Uuid, bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{owner}/{bucket_name}/{key}"));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Root directory for one tenant's bucket. Tenants get disjoint
    /// subtrees, so equal bucket names across tenants never collide.
    fn bucket_root(&self, owner: Uuid, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(owner.to_string());
        path.push(bucket_name);
        path
    }

    /// Fully-qualified payload path for an object key.
    fn object_path(&self, owner: Uuid, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(owner, bucket_name, key);
        let mut path = self.bucket_root(owner, bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch a bucket owned by this tenant, or BucketNotFound.
    async fn fetch_bucket(&self, owner: Uuid, name: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, owner_id, created_at FROM buckets
             WHERE name = ? AND owner_id = ?",
        )
        .bind(name)
        .bind(owner)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::BucketNotFound(name.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Resolve an object record by `(object_key, owner)`.
    async fn fetch_object(&self, owner: Uuid, object_key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE object_key = ? AND owner_id = ?"
        ))
        .bind(object_key)
        .bind(owner)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound(object_key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Create a bucket for this tenant. Names are unique per owner only;
    /// a clash maps to BucketAlreadyExists.
    pub async fn create_bucket(&self, owner: Uuid, name: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: owner,
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.owner_id)
        .bind(bucket.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// List this tenant's buckets, oldest first.
    pub async fn list_buckets(&self, owner: Uuid) -> StoreResult<Vec<Bucket>> {
        let buckets = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, owner_id, created_at FROM buckets
             WHERE owner_id = ? ORDER BY created_at ASC, name ASC",
        )
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets)
    }

    /// Delete an empty bucket. A bucket still holding object records is
    /// rejected with BucketNotEmpty; objects must be deleted first.
    pub async fn delete_bucket(&self, owner: Uuid, name: &str) -> StoreResult<()> {
        let bucket = self.fetch_bucket(owner, name).await?;

        let object_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM objects WHERE owner_id = ? AND bucket_name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_one(&*self.db)
        .await?;
        if object_count > 0 {
            return Err(StoreError::BucketNotEmpty(name.to_string()));
        }

        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket.id)
            .execute(&*self.db)
            .await?;

        let bucket_path = self.bucket_root(owner, name);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }

        Ok(())
    }

    /// Stream-upload an object into an existing bucket.
    ///
    /// - Requires a bucket named `bucket_name` owned by this tenant.
    /// - Writes bytes incrementally to a temporary file, computing the
    ///   MD5 etag and size along the way.
    /// - Rejects empty payloads.
    /// - Fsyncs and atomically renames into the final location, then
    ///   inserts the metadata row. If that insert fails the blob is
    ///   removed again so no half-valid object is ever visible.
    ///
    /// The object key is `{uuid}-{file_name}`: collision-free under
    /// concurrency without coordination, and still greppable on disk.
    pub async fn upload_object_stream<S>(
        &self,
        owner: Uuid,
        bucket_name: &str,
        file_name: Option<&str>,
        content_type: Option<String>,
        stream: S,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let bucket = self.fetch_bucket(owner, bucket_name).await?;

        let file_name = sanitize_file_name(file_name);
        let object_key = format!("{}-{}", Uuid::new_v4(), file_name);

        let file_path = self.object_path(owner, &bucket.name, &object_key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::Io(io::Error::other("object path missing parent")))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if size_bytes == 0 {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::EmptyPayload);
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        let insert_result = sqlx::query_as::<_, StoredObject>(&format!(
            "INSERT INTO objects (
                id, owner_id, bucket_name, object_key, file_name,
                content_type, size_bytes, etag, version, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
             RETURNING {OBJECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(&bucket.name)
        .bind(&object_key)
        .bind(&file_name)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(object) => {
                debug!(
                    bucket = bucket_name,
                    key = object_key,
                    size_bytes,
                    "stored object"
                );
                Ok(object)
            }
            Err(err) => {
                // Metadata is the source of truth; without the row the
                // blob is unreachable garbage, so reclaim it now.
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    /// List object records for this tenant and bucket, oldest first.
    pub async fn list_objects(
        &self,
        owner: Uuid,
        bucket_name: &str,
    ) -> StoreResult<Vec<StoredObject>> {
        self.fetch_bucket(owner, bucket_name).await?;
        let objects = sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE owner_id = ? AND bucket_name = ?
             ORDER BY created_at ASC, object_key ASC"
        ))
        .bind(owner)
        .bind(bucket_name)
        .fetch_all(&*self.db)
        .await?;
        Ok(objects)
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// A metadata row whose blob is missing from disk is corrupted state:
    /// it is logged loudly but surfaces to the caller as plain not-found,
    /// indistinguishable from an object that never existed.
    pub async fn get_object_reader(
        &self,
        owner: Uuid,
        object_key: &str,
    ) -> StoreResult<(StoredObject, File)> {
        let object = self.fetch_object(owner, object_key).await?;

        let file_path = self.object_path(owner, &object.bucket_name, object_key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                warn!(
                    key = object_key,
                    path = %file_path.display(),
                    "metadata row exists but blob is missing from disk"
                );
                StoreError::ObjectNotFound(object_key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Delete an object: blob first, then the metadata row.
    ///
    /// A crash between the two steps leaves a metadata row pointing at a
    /// missing blob, which the next delete (or download) can still reach;
    /// the reverse order would strand an unreachable blob on disk. A blob
    /// already missing during delete is not an error.
    pub async fn delete_object(&self, owner: Uuid, object_key: &str) -> StoreResult<()> {
        let object = self.fetch_object(owner, object_key).await?;

        let file_path = self.object_path(owner, &object.bucket_name, object_key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(owner, &object.bucket_name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await?;

        Ok(())
    }

    /// Recursively remove empty shard directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Return true if a SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Reduce an uploader-supplied filename to a safe path component.
/// Takes the final path segment and drops control characters; an absent
/// or empty name falls back to `file`.
fn sanitize_file_name(name: Option<&str>) -> String {
    let base = name
        .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n))
        .unwrap_or("");
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testutil;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    async fn service_in(dir: &Path) -> (StoreService, Uuid) {
        let db = testutil::pool_in(dir).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        (StoreService::new(db, dir.join("blobs")), owner)
    }

    #[tokio::test]
    async fn upload_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;
        store.create_bucket(owner, "b1").await.unwrap();

        let object = store
            .upload_object_stream(
                owner,
                "b1",
                Some("report.txt"),
                Some("text/plain".into()),
                byte_stream(vec![b"hello ", b"world"]),
            )
            .await
            .unwrap();
        assert_eq!(object.size_bytes, 11);
        assert_eq!(object.file_name, "report.txt");
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));
        assert!(object.object_key.ends_with("-report.txt"));

        let (meta, mut file) = store
            .get_object_reader(owner, &object.object_key)
            .await
            .unwrap();
        assert_eq!(meta.etag, object.etag);
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn upload_requires_existing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;

        let err = store
            .upload_object_stream(owner, "nope", Some("f"), None, byte_stream(vec![b"x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_and_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;
        store.create_bucket(owner, "b1").await.unwrap();

        let err = store
            .upload_object_stream(owner, "b1", Some("f"), None, byte_stream(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyPayload));
        assert!(store.list_objects(owner, "b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;
        store.create_bucket(owner, "b1").await.unwrap();

        let object = store
            .upload_object_stream(owner, "b1", Some("f"), None, byte_stream(vec![b"x"]))
            .await
            .unwrap();
        store.delete_object(owner, &object.object_key).await.unwrap();

        let err = store
            .get_object_reader(owner, &object.object_key)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));
        let err = store
            .delete_object(owner, &object.object_key)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn missing_blob_surfaces_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;
        store.create_bucket(owner, "b1").await.unwrap();

        let object = store
            .upload_object_stream(owner, "b1", Some("f"), None, byte_stream(vec![b"x"]))
            .await
            .unwrap();
        let path = store.object_path(owner, "b1", &object.object_key);
        std::fs::remove_file(&path).unwrap();

        let err = store
            .get_object_reader(owner, &object.object_key)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));

        // Delete still reclaims the dangling metadata row.
        store.delete_object(owner, &object.object_key).await.unwrap();
    }

    #[tokio::test]
    async fn objects_are_scoped_to_their_owner() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let alice = testutil::tenant(&db, "alice@example.com").await;
        let bob = testutil::tenant(&db, "bob@example.com").await;
        let store = StoreService::new(db, dir.path().join("blobs"));

        store.create_bucket(alice, "shared-name").await.unwrap();
        store.create_bucket(bob, "shared-name").await.unwrap();

        let object = store
            .upload_object_stream(
                alice,
                "shared-name",
                Some("secret"),
                None,
                byte_stream(vec![b"top secret"]),
            )
            .await
            .unwrap();

        assert!(store.list_objects(bob, "shared-name").await.unwrap().is_empty());
        let err = store
            .get_object_reader(bob, &object.object_key)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));
        let err = store
            .delete_object(bob, &object.object_key)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));

        // Alice's object is untouched by Bob's attempts.
        store.get_object_reader(alice, &object.object_key).await.unwrap();
    }

    #[tokio::test]
    async fn bucket_names_are_unique_per_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let alice = testutil::tenant(&db, "alice@example.com").await;
        let bob = testutil::tenant(&db, "bob@example.com").await;
        let store = StoreService::new(db, dir.path().join("blobs"));

        store.create_bucket(alice, "photos").await.unwrap();
        store.create_bucket(bob, "photos").await.unwrap();

        let err = store.create_bucket(alice, "photos").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketAlreadyExists(_)));
    }

    #[tokio::test]
    async fn bucket_delete_refuses_while_objects_remain() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;
        store.create_bucket(owner, "b1").await.unwrap();
        let object = store
            .upload_object_stream(owner, "b1", Some("f"), None, byte_stream(vec![b"x"]))
            .await
            .unwrap();

        let err = store.delete_bucket(owner, "b1").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotEmpty(_)));

        store.delete_object(owner, &object.object_key).await.unwrap();
        store.delete_bucket(owner, "b1").await.unwrap();
        assert!(store.list_buckets(owner).await.unwrap().is_empty());
        let err = store.delete_bucket(owner, "b1").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn hostile_names_are_rejected_or_defanged() {
        let dir = tempfile::tempdir().unwrap();
        let (store, owner) = service_in(dir.path()).await;

        let err = store.create_bucket(owner, "../escape").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBucketName { .. }));
        let err = store.create_bucket(owner, "").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBucketName { .. }));

        store.create_bucket(owner, "b1").await.unwrap();
        let object = store
            .upload_object_stream(
                owner,
                "b1",
                Some("../../etc/passwd"),
                None,
                byte_stream(vec![b"x"]),
            )
            .await
            .unwrap();
        assert_eq!(object.file_name, "passwd");
    }
}
