use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::storage::{BlobStore, StoredObject};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use function_name::named;
use getset::Getters;
use s3::creds::Credentials;
use s3::region::Region;
use s3::Bucket;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::future::Future;
use std::path::Path;
use validator::Validate;

/// Objects requested per listing call
pub const LIST_PAGE_SIZE: usize = 100;

/// Connection settings for an S3-compatible bucket
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct S3Config {
    #[validate(length(min = 1))]
    #[builder(into)]
    access_key_id: String,
    #[validate(nested)]
    #[builder(into)]
    secret_access_key: RedactedString,
    #[validate(length(min = 1))]
    #[builder(into)]
    bucket: String,
    #[validate(length(min = 1))]
    #[builder(into)]
    region: String,
    /// Custom endpoint for non-AWS providers (MinIO, R2, ...)
    #[validate(url)]
    #[builder(into)]
    endpoint: Option<String>,
}

pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    #[named]
    pub fn from_config(config: &S3Config) -> Result<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => {
                tracing::info!("Using custom endpoint: {endpoint}");
                Region::Custom {
                    region: config.region.clone(),
                    endpoint: endpoint.clone(),
                }
            }
            None => match config.region.parse::<Region>() {
                // unknown names parse as a custom region pointing at the name itself
                Ok(Region::Custom { .. }) | Err(_) => {
                    return Err(Error::config_error(format!(
                        "unknown AWS region {:?}, a custom endpoint is required for other providers",
                        config.region
                    )))
                    .add_fn_name(function_path!());
                }
                Ok(region) => region,
            },
        };

        let credentials = Credentials::new(
            Some(config.access_key_id.as_str()),
            Some(config.secret_access_key.inner().as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| Error::config_error(format!("invalid storage credentials: {e}")))?;

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        // virtual-hosted addressing only works on AWS itself
        let bucket = if config.endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn put_file(&self, path: &Path, key: &str) -> Result<()> {
        let mut file = tokio::fs::File::open(path).await?;
        self.bucket.put_object_stream(&mut file, key).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        collect_pages(|continuation_token| async move {
            let (page, _) = self
                .bucket
                .list_page(
                    prefix.to_string(),
                    None,
                    continuation_token,
                    None,
                    Some(LIST_PAGE_SIZE),
                )
                .await?;
            let next = if page.is_truncated {
                page.next_continuation_token
            } else {
                None
            };
            let objects = page
                .contents
                .into_iter()
                .map(|o| StoredObject {
                    last_modified: parse_last_modified(&o.last_modified),
                    key: o.key,
                })
                .collect();
            Ok((objects, next))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.bucket.delete_object(key).await?;
        Ok(())
    }
}

/// Follows continuation tokens until the listing is exhausted.
async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<StoredObject>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<StoredObject>, Option<String>)>>,
{
    let mut objects = Vec::new();
    let mut continuation_token = None;
    loop {
        let (page, next) = fetch_page(continuation_token.take()).await?;
        tracing::debug!("Listed {} objects", page.len());
        objects.extend(page);
        match next {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }
    Ok(objects)
}

fn parse_last_modified(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.to_utc())
        .ok()
}
