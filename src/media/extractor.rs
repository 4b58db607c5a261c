use super::types::RawInfo;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name of the extractor
    fn name(&self) -> &'static str;

    /// Fetch metadata for the given page URL without downloading any media
    async fn extract(&self, url: &str) -> Result<RawInfo>;

    /// Test if this extractor is available on the system
    async fn test_availability(&self) -> bool;
}
