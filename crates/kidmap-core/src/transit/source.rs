use async_trait::async_trait;

use crate::api::FetchError;
use crate::models::TransitFeed;

/// Network-fetch collaborator: supplies the raw feed for a region.
///
/// Implementations classify their own failures through [`FetchError`]; the
/// updater decides whether to retry from that classification alone.
#[async_trait]
pub trait TransitSource: Send + Sync {
    async fn fetch(&self, region_id: &str) -> Result<TransitFeed, FetchError>;
}
