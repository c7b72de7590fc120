//! Blob storage for question papers and answer-sheet documents. The trait
//! seam keeps upload flows testable; the S3 implementation serves an
//! S3-compatible endpoint and hands back public URLs.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};

use crate::core::config::S3Settings;
use crate::core::errors::PipelineError;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `bytes` under `folder/` and returns the public URL of the
    /// uploaded object.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        folder: &str,
        content_type: &str,
    ) -> Result<String, PipelineError>;

    /// Removes the object behind a public URL previously returned by
    /// [`BlobStorage::upload`]. Deleting an unknown URL is not an error.
    async fn delete(&self, public_url: &str) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3Storage {
    pub async fn from_settings(settings: &S3Settings) -> anyhow::Result<Option<Self>> {
        if settings.access_key.is_empty() || settings.secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "scriptmark-static",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.endpoint.clone())
            .region(aws_config::Region::new(settings.region.clone()))
            .credentials_provider(creds)
            .load()
            .await;

        let client = Client::new(&config);

        Ok(Some(Self {
            client,
            bucket: settings.bucket.clone(),
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        }))
    }

    fn key_for_url<'a>(&self, public_url: &'a str) -> Option<&'a str> {
        public_url
            .strip_prefix(&self.public_base_url)
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|key| !key.is_empty())
    }
}

#[async_trait]
impl BlobStorage for S3Storage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        folder: &str,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        // Content-addressed prefix keeps re-uploads of an edited file from
        // colliding with the original.
        let hash_hex = hex::encode(Sha256::digest(&bytes));
        let key = format!("{}/{}/{}", folder.trim_matches('/'), &hash_hex[..16], file_name);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;

        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn delete(&self, public_url: &str) -> Result<(), PipelineError> {
        let Some(key) = self.key_for_url(public_url) else {
            tracing::warn!(public_url, "delete requested for a URL outside the public base");
            return Ok(());
        };

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_base(base: &str) -> S3Storage {
        // Client construction needs no credentials for URL-mapping tests.
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        S3Storage {
            client: Client::from_conf(config),
            bucket: "assessments".to_string(),
            public_base_url: base.trim_end_matches('/').to_string(),
        }
    }

    #[test]
    fn public_urls_map_back_to_object_keys() {
        let storage = storage_with_base("https://cdn.example.com/");

        assert_eq!(
            storage.key_for_url("https://cdn.example.com/question-papers/ab12/paper.pdf"),
            Some("question-papers/ab12/paper.pdf")
        );
        assert_eq!(storage.key_for_url("https://elsewhere.example.com/paper.pdf"), None);
        assert_eq!(storage.key_for_url("https://cdn.example.com/"), None);
    }
}
