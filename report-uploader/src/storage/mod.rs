//! S3 object writes

mod error;

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client as S3Client};
use bytes::Bytes;
use tracing::debug;

pub use error::{BucketError, BucketResult};

/// A bucket that accepts whole-object writes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket, used in log lines
    fn bucket(&self) -> &str;

    /// Writes `body` under `key`, replacing any existing object
    ///
    /// # Errors
    ///
    /// Returns `BucketError` if the write is rejected or never reaches the service
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> BucketResult<()>;
}

/// [`ObjectStore`] backed by the AWS SDK
pub struct S3ObjectStore {
    s3_client: Arc<S3Client>,
    bucket_name: String,
}

impl S3ObjectStore {
    /// Creates a store writing to `bucket_name`
    ///
    /// # Arguments
    ///
    /// * `s3_client` - Pre-configured S3 client
    /// * `bucket_name` - Destination bucket
    #[must_use]
    pub const fn new(s3_client: Arc<S3Client>, bucket_name: String) -> Self {
        Self {
            s3_client,
            bucket_name,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket_name
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> BucketResult<()> {
        let content_length = i64::try_from(body.len())
            .map_err(|_| BucketError::ConfigError(format!("object too large for {key}")))?;

        debug!(
            "Putting object {} ({} bytes, {})",
            key, content_length, content_type
        );

        self.s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_length(content_length)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await?;

        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! In-memory bucket with injectable failures

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::{BucketError, BucketResult, ObjectStore};

    /// A stored object
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoredObject {
        /// Object body
        pub body: Bytes,
        /// Content type sent with the write
        pub content_type: String,
    }

    /// Records every write; keys registered with [`MockObjectStore::failing_on`] are rejected
    #[derive(Default)]
    pub struct MockObjectStore {
        objects: Mutex<HashMap<String, StoredObject>>,
        failing_keys: HashSet<String>,
        attempts: Mutex<Vec<String>>,
    }

    impl MockObjectStore {
        /// Creates an empty store
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes writes to `key` fail
        #[must_use]
        pub fn failing_on(mut self, key: impl Into<String>) -> Self {
            self.failing_keys.insert(key.into());
            self
        }

        /// The object stored under `key`, if any
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn object(&self, key: &str) -> Option<StoredObject> {
            self.objects.lock().unwrap().get(key).cloned()
        }

        /// Every key a write was attempted on, in order
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for MockObjectStore {
        fn bucket(&self) -> &str {
            "mock-bucket"
        }

        async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> BucketResult<()> {
            self.attempts.lock().unwrap().push(key.to_string());

            if self.failing_keys.contains(key) {
                return Err(BucketError::S3Error(format!("AccessDenied on {key}")));
            }

            self.objects.lock().unwrap().insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.to_string(),
                },
            );
            Ok(())
        }
    }
}
