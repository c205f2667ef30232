//! Contract tests run against both store layouts

use super::*;
use crate::config::{BlockStoreType, DirConfig, TierConfig, WorkerConfigBuilder};
use crate::fallback::UfsFallback;
use crate::ufs::{LocalUnderFileSystem, UfsManager, UnderFileSystem};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{Error, MEM_TIER, SSD_TIER};
use tempfile::TempDir;

const SESSION: SessionId = 1;
const MOUNT: u64 = 1;

/// Local under-storage that counts range reads
struct CountingUfs {
    inner: LocalUnderFileSystem,
    reads: AtomicUsize,
}

#[async_trait]
impl UnderFileSystem for CountingUfs {
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_range(path, offset, len).await
    }

    async fn file_length(&self, path: &str) -> Result<u64> {
        self.inner.file_length(path).await
    }
}

struct Fixture {
    _temp_dir: TempDir,
    store: Arc<dyn BlockStore>,
    mono: Option<Arc<MonoBlockStore>>,
    paged: Option<Arc<PagedBlockStore>>,
    ufs: Arc<CountingUfs>,
    fallback: Arc<UfsFallback>,
}

impl Fixture {
    async fn new(store_type: BlockStoreType) -> Self {
        Self::with_capacity(store_type, 1024 * 1024).await
    }

    async fn with_capacity(store_type: BlockStoreType, capacity: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ufs_root = temp_dir.path().join("ufs");
        std::fs::create_dir_all(&ufs_root).unwrap();

        let config = WorkerConfigBuilder::new()
            .with_store_type(store_type)
            .with_tiers(vec![
                TierConfig {
                    alias: MEM_TIER.into(),
                    dirs: vec![DirConfig {
                        path: temp_dir.path().join("mem"),
                        capacity_bytes: capacity,
                    }],
                },
                TierConfig {
                    alias: SSD_TIER.into(),
                    dirs: vec![DirConfig {
                        path: temp_dir.path().join("ssd"),
                        capacity_bytes: capacity,
                    }],
                },
            ])
            .with_page_size(4)
            .with_page_store(temp_dir.path().join("pages"), capacity)
            .build()
            .unwrap();

        let ufs = Arc::new(CountingUfs {
            inner: LocalUnderFileSystem::new(&ufs_root),
            reads: AtomicUsize::new(0),
        });
        let manager = Arc::new(UfsManager::new());
        manager.add_mount(MOUNT, ufs.clone());
        let fallback = Arc::new(UfsFallback::new(manager));

        let (store, mono, paged) = match store_type {
            BlockStoreType::Mono => {
                let mono = Arc::new(MonoBlockStore::open(&config, fallback.clone()).await.unwrap());
                (mono.clone() as Arc<dyn BlockStore>, Some(mono), None)
            }
            BlockStoreType::Paged => {
                let paged =
                    Arc::new(PagedBlockStore::open(&config, fallback.clone()).await.unwrap());
                (paged.clone() as Arc<dyn BlockStore>, None, Some(paged))
            }
        };
        Self {
            _temp_dir: temp_dir,
            store,
            mono,
            paged,
            ufs,
            fallback,
        }
    }

    fn put_ufs_file(&self, name: &str, data: &[u8]) -> OpenUfsBlockOptions {
        std::fs::write(self._temp_dir.path().join("ufs").join(name), data).unwrap();
        OpenUfsBlockOptions {
            ufs_path: format!("/{name}"),
            mount_id: MOUNT,
            block_size: data.len() as u64,
            offset_in_file: 0,
            max_ufs_read_concurrency: 1,
            no_cache: false,
        }
    }

    fn lock_entries(&self) -> usize {
        match (&self.mono, &self.paged) {
            (Some(mono), _) => mono.lock_entries(),
            (_, Some(paged)) => paged.lock_entries(),
            _ => 0,
        }
    }

    fn ufs_reads(&self) -> usize {
        self.ufs.reads.load(Ordering::SeqCst)
    }

    async fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()> {
        self.store
            .create_block(SESSION, block_id, 0, &CreateBlockOptions::new(None, 0))
            .await?;
        let mut writer = self.store.create_block_writer(SESSION, block_id).await?;
        writer.append(Bytes::copy_from_slice(data)).await?;
        writer.close().await?;
        self.store.commit_block(SESSION, block_id, false).await
    }

    async fn read_all(
        &self,
        block_id: BlockId,
        ufs: Option<&OpenUfsBlockOptions>,
    ) -> Result<Bytes> {
        let mut reader = self
            .store
            .create_block_reader(SESSION, block_id, 0, false, ufs)
            .await?;
        let length = reader.length();
        let data = reader.read(0, length).await?;
        reader.close().await?;
        Ok(data)
    }
}

const BOTH: [BlockStoreType; 2] = [BlockStoreType::Mono, BlockStoreType::Paged];

#[tokio::test]
async fn test_write_commit_read_round_trip() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        let data = b"the quick brown fox jumps";
        fixture.write_block(10, data).await?;

        assert!(fixture.store.has_block(10));
        assert_eq!(fixture.store.block_meta(10).unwrap().length, data.len() as u64);
        assert_eq!(&fixture.read_all(10, None).await?[..], data);

        let mut reader = fixture
            .store
            .create_block_reader(SESSION, 10, 0, false, None)
            .await?;
        assert_eq!(&reader.read(5, 9).await?[..], b"uick brow");
        assert_eq!(&reader.read(20, 100).await?[..], b"jumps");
        reader.close().await?;
        // Closing twice is harmless
        reader.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_transfer_to_walks_the_block() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        fixture.write_block(11, b"abcdefghij").await?;

        let mut reader = fixture
            .store
            .create_block_reader(SESSION, 11, 2, false, None)
            .await?;
        let mut buf = bytes::BytesMut::new();
        while reader.transfer_to(&mut buf, 3).await? > 0 {}
        assert_eq!(&buf[..], b"cdefghij");
        reader.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_second_writer_conflicts() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        fixture
            .store
            .create_block(SESSION, 20, 0, &CreateBlockOptions::new(None, 8))
            .await?;
        let mut first = fixture.store.create_block_writer(SESSION, 20).await?;

        let second = fixture.store.create_block_writer(SESSION, 20).await;
        assert!(matches!(second, Err(Error::Conflict { .. })));

        let commit = fixture.store.commit_block(SESSION, 20, false).await;
        assert!(matches!(commit, Err(Error::Conflict { .. })));

        first.close().await?;
        fixture.store.commit_block(SESSION, 20, false).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_reopened_writer_continues_after_partial_page() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        fixture
            .store
            .create_block(SESSION, 77, 0, &CreateBlockOptions::default())
            .await?;
        let mut writer = fixture.store.create_block_writer(SESSION, 77).await?;
        writer.append(Bytes::from_static(b"abcdef")).await?;
        writer.close().await?;

        let mut writer = fixture.store.create_block_writer(SESSION, 77).await?;
        assert_eq!(writer.position(), 6, "{store_type:?}");
        assert_eq!(writer.append(Bytes::from_static(b"xy")).await?, 8);
        writer.close().await?;

        fixture.store.commit_block(SESSION, 77, false).await?;
        assert_eq!(fixture.store.block_meta(77).unwrap().length, 8);
        assert_eq!(&fixture.read_all(77, None).await?[..], b"abcdefxy", "{store_type:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_writer_for_foreign_session_not_found() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        fixture
            .store
            .create_block(SESSION, 21, 0, &CreateBlockOptions::default())
            .await?;
        let result = fixture.store.create_block_writer(SESSION + 1, 21).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
    Ok(())
}

#[tokio::test]
async fn test_duplicate_create_conflicts() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        fixture.write_block(30, b"data").await?;
        let again = fixture
            .store
            .create_block(SESSION, 30, 0, &CreateBlockOptions::default())
            .await;
        assert!(matches!(again, Err(Error::Conflict { .. })));
    }
    Ok(())
}

#[tokio::test]
async fn test_remove_open_block_conflicts_without_partial_state() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        fixture.write_block(40, b"payload").await?;

        let mut reader = fixture
            .store
            .create_block_reader(SESSION, 40, 0, false, None)
            .await?;
        let removed = fixture.store.remove_block(SESSION, 40).await;
        assert!(matches!(removed, Err(Error::Conflict { .. })));
        assert!(fixture.store.has_block(40));
        assert_eq!(&reader.read(0, 7).await?[..], b"payload");
        reader.close().await?;

        fixture.store.remove_block(SESSION, 40).await?;
        assert!(!fixture.store.has_block(40));
        let missing = fixture.read_all(40, None).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }
    Ok(())
}

#[tokio::test]
async fn test_abort_and_session_cleanup() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        for block_id in [50, 51] {
            fixture
                .store
                .create_block(SESSION, block_id, 0, &CreateBlockOptions::new(None, 16))
                .await?;
        }
        fixture.store.abort_block(SESSION, 50).await?;
        fixture.store.cleanup_session(SESSION).await?;

        // Both ids are free again
        fixture.write_block(50, b"x").await?;
        fixture.write_block(51, b"y").await?;
        let mut committed = fixture.store.committed_blocks();
        committed.sort_unstable();
        assert_eq!(committed, vec![50, 51]);
    }
    Ok(())
}

#[tokio::test]
async fn test_mono_capacity_and_tiers() -> Result<()> {
    let fixture = Fixture::with_capacity(BlockStoreType::Mono, 16).await;
    let too_big = fixture
        .store
        .create_block(SESSION, 60, 0, &CreateBlockOptions::new(None, 17))
        .await;
    assert!(matches!(too_big, Err(Error::Capacity { .. })));

    let location = fixture
        .store
        .create_block(SESSION, 61, 0, &CreateBlockOptions::new(Some(SSD_TIER.into()), 4))
        .await?;
    assert_eq!(location.tier_alias, SSD_TIER);
    let temp_path = fixture.store.local_block_path(SESSION, 61).unwrap();
    assert!(temp_path.to_string_lossy().contains(strata_core::TEMP_BLOCKS_DIR));
    fixture.store.abort_block(SESSION, 61).await?;

    fixture.write_block(62, b"tiered").await?;
    assert_eq!(fixture.store.block_meta(62).unwrap().location.tier_alias, MEM_TIER);
    fixture.store.move_block(SESSION, 62, SSD_TIER).await?;
    assert_eq!(fixture.store.block_meta(62).unwrap().location.tier_alias, SSD_TIER);
    assert_eq!(&fixture.read_all(62, None).await?[..], b"tiered");
    Ok(())
}

#[tokio::test]
async fn test_move_open_block_conflicts() -> Result<()> {
    let fixture = Fixture::new(BlockStoreType::Mono).await;
    fixture.write_block(63, b"busy").await?;
    let mut reader = fixture
        .store
        .create_block_reader(SESSION, 63, 0, false, None)
        .await?;
    let moved = fixture.store.move_block(SESSION, 63, SSD_TIER).await;
    assert!(matches!(moved, Err(Error::Conflict { .. })));
    assert_eq!(fixture.store.block_meta(63).unwrap().location.tier_alias, MEM_TIER);
    reader.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_paged_move_is_single_medium() -> Result<()> {
    let fixture = Fixture::new(BlockStoreType::Paged).await;
    fixture.write_block(64, b"pages").await?;
    fixture.store.move_block(SESSION, 64, SSD_TIER).await?;
    let moved = fixture.store.move_block(SESSION, 64, MEM_TIER).await;
    assert!(matches!(moved, Err(Error::Unimplemented { .. })));
    assert!(fixture.store.local_block_path(SESSION, 64).is_none());
    Ok(())
}

#[tokio::test]
async fn test_fallback_read_then_cache_hit() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        let data = b"stored only in under-storage";
        let options = fixture.put_ufs_file("cold", data);

        assert!(!fixture.store.has_block(70));
        assert_eq!(&fixture.read_all(70, Some(&options)).await?[..], data);
        let reads_after_miss = fixture.ufs_reads();
        assert!(reads_after_miss > 0);
        assert!(fixture.store.has_block(70));

        assert_eq!(&fixture.read_all(70, Some(&options)).await?[..], data);
        assert_eq!(fixture.ufs_reads(), reads_after_miss);
    }
    Ok(())
}

#[tokio::test]
async fn test_no_cache_reads_pass_through() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        let mut options = fixture.put_ufs_file("passthrough", b"not admitted");
        options.no_cache = true;

        assert_eq!(&fixture.read_all(71, Some(&options)).await?[..], b"not admitted");
        assert!(!fixture.store.has_block(71));
        let reads = fixture.ufs_reads();
        fixture.read_all(71, Some(&options)).await?;
        assert!(fixture.ufs_reads() > reads);
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_block_without_ufs_options() {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        let result = fixture.read_all(72, None).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));

        let unreadable = OpenUfsBlockOptions::default();
        let result = fixture.read_all(72, Some(&unreadable)).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
}

#[tokio::test]
async fn test_fallback_read_not_blocked_by_open_writer() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        let mut options = fixture.put_ufs_file("contested", b"from under-storage");
        options.no_cache = true;
        fixture
            .store
            .create_block(SESSION, 9, 0, &CreateBlockOptions::default())
            .await?;
        let mut writer = fixture.store.create_block_writer(SESSION, 9).await?;

        let reader = tokio::time::timeout(
            Duration::from_millis(500),
            fixture
                .store
                .create_block_reader(SESSION + 1, 9, 0, false, Some(&options)),
        )
        .await
        .expect("reader waited on the open writer");
        let mut reader = reader?;
        assert_eq!(&reader.read(0, 18).await?[..], b"from under-storage");
        reader.close().await?;
        writer.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_lock_entries_do_not_outlive_blocks() -> Result<()> {
    for store_type in BOTH {
        let fixture = Fixture::new(store_type).await;
        for block_id in 1000..2000 {
            let missing = fixture.read_all(block_id, None).await;
            assert!(matches!(missing, Err(Error::NotFound { .. })));
        }
        assert_eq!(fixture.lock_entries(), 0, "{store_type:?}");

        fixture
            .store
            .create_block(SESSION, 5, 0, &CreateBlockOptions::default())
            .await?;
        let mut writer = fixture.store.create_block_writer(SESSION, 5).await?;
        assert_eq!(fixture.lock_entries(), 1);
        writer.close().await?;
        fixture.store.abort_block(SESSION, 5).await?;
        let moved = fixture.store.move_block(SESSION, 6, SSD_TIER).await;
        assert!(matches!(moved, Err(Error::NotFound { .. })));

        fixture.write_block(7, b"kept").await?;
        fixture.read_all(7, None).await?;
        fixture.store.remove_block(SESSION, 7).await?;
        assert_eq!(fixture.lock_entries(), 0, "{store_type:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_paged_caches_only_touched_pages() -> Result<()> {
    let fixture = Fixture::new(BlockStoreType::Paged).await;
    let options = fixture.put_ufs_file("partial", b"0123456789ab");

    let mut reader = fixture
        .store
        .create_block_reader(SESSION, 73, 0, false, Some(&options))
        .await?;
    assert_eq!(&reader.read(5, 2).await?[..], b"56");
    reader.close().await?;

    // Only page 1 of three was fetched and admitted
    let paged = fixture.paged.as_ref().unwrap();
    assert!(!fixture.store.has_block(73));
    assert!(!paged.is_page_cached(PageId::new(73, 0)));
    assert!(paged.is_page_cached(PageId::new(73, 1)));
    assert!(!paged.is_page_cached(PageId::new(73, 2)));
    assert_eq!(paged.used_bytes(), 4);
    let reads = fixture.ufs_reads();
    assert_eq!(reads, 1);
    let mut reader = fixture
        .store
        .create_block_reader(SESSION, 73, 0, false, Some(&options))
        .await?;
    assert_eq!(&reader.read(4, 4).await?[..], b"4567");
    assert_eq!(fixture.ufs_reads(), reads);
    assert_eq!(&reader.read(0, 12).await?[..], b"0123456789ab");
    reader.close().await?;
    assert!(fixture.store.has_block(73));
    assert_eq!(paged.used_bytes(), 12);
    Ok(())
}

#[tokio::test]
async fn test_paged_evicts_cached_pages_under_pressure() -> Result<()> {
    // Room for two pages of four bytes
    let fixture = Fixture::with_capacity(BlockStoreType::Paged, 8).await;
    let first = fixture.put_ufs_file("first", b"aaaabbbb");
    let second = fixture.put_ufs_file("second", b"ccccdddd");

    assert_eq!(&fixture.read_all(80, Some(&first)).await?[..], b"aaaabbbb");
    assert!(fixture.store.has_block(80));
    assert_eq!(&fixture.read_all(81, Some(&second)).await?[..], b"ccccdddd");
    assert!(fixture.store.has_block(81));
    assert!(!fixture.store.has_block(80));

    // Written blocks need space of their own and cannot evict each other
    fixture.write_block(82, b"eeeeffff").await?;
    let full = fixture
        .store
        .create_block(SESSION, 83, 0, &CreateBlockOptions::new(None, 4))
        .await;
    assert!(matches!(full, Err(Error::Capacity { .. })));
    Ok(())
}

#[tokio::test]
async fn test_fallback_concurrency_is_capped() -> Result<()> {
    for store_type in BOTH {
        let fixture = Arc::new(Fixture::new(store_type).await);
        let mut options = fixture.put_ufs_file("hot", b"contended block");
        options.no_cache = true;
        options.max_ufs_read_concurrency = 2;

        let open = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let fixture = Arc::clone(&fixture);
            let options = options.clone();
            let open = Arc::clone(&open);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let mut reader = fixture
                    .store
                    .create_block_reader(SESSION, 90, 0, false, Some(&options))
                    .await?;
                let data = reader.read(0, 15).await?;
                let now = open.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(fixture.fallback.in_flight(90) <= 2);
                tokio::time::sleep(Duration::from_millis(10)).await;
                open.fetch_sub(1, Ordering::SeqCst);
                reader.close().await?;
                Ok::<Bytes, Error>(data)
            }));
        }
        for task in tasks {
            let data = task.await.unwrap()?;
            assert_eq!(&data[..], b"contended block");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(fixture.fallback.in_flight(90), 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_leaked_reader_is_reported() -> Result<()> {
    let detector = Arc::new(strata_core::leak::LeakDetector::new());
    strata_core::leak::install(detector.clone());

    let fixture = Fixture::new(BlockStoreType::Mono).await;
    fixture.write_block(95, b"leak").await?;
    let reader = fixture
        .store
        .create_block_reader(SESSION, 95, 0, false, None)
        .await?;
    drop(reader);

    strata_core::leak::uninstall();
    assert!(detector.leaked() >= 1);
    Ok(())
}
