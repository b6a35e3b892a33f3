use crate::backup::result_error::result::Result;
use async_trait::async_trait;

pub mod smtp;

#[async_trait]
pub trait Notification {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}
