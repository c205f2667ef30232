mod common;

use common::{client_config, Cluster};
use std::sync::Arc;
use strata_client::{BlockWorkerClient, BlockWorkerClientPool};
use strata_core::leak::{self, LeakDetector};
use strata_core::Result;
use strata_worker::BlockStoreType;

#[tokio::test]
async fn test_unclosed_client_and_handle_reported_as_leaks() -> Result<()> {
    let detector = Arc::new(LeakDetector::new());
    leak::install(detector.clone());

    let cluster = Cluster::start(BlockStoreType::Mono).await;
    let config = client_config(0, 2);
    let pool = BlockWorkerClientPool::new(
        cluster.address(),
        cluster.user.clone(),
        cluster.transport.clone(),
        config.clone(),
    );
    let leaked = BlockWorkerClient::connect(
        cluster.address(),
        cluster.user.clone(),
        cluster.transport.clone(),
        &config,
    )
    .await?;
    let handle = pool.acquire().await?.downgrade_and_release().await?;

    // The pooled client is closed properly
    pool.close();
    assert_eq!(detector.leaked(), 0);

    drop(leaked);
    drop(handle);
    leak::uninstall();
    assert_eq!(detector.leaked(), 2);
    assert_eq!(detector.open_resources(), 0);
    Ok(())
}
