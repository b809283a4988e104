//! End-to-end sync against the SQLite store.
//!
//! These tests drive the library the way the CLI and HTTP server do:
//! documents on disk, a real database file, and the synchronizer in between.

use point_blocks::config::Config;
use point_blocks::content::{ContentService, ContentSource};
use point_blocks::locator::FileLocator;
use point_blocks::models::{ModuleCode, StageId};
use point_blocks::store::{BlockStore, SqliteBlockStore};
use point_blocks::sync::{SyncOptions, SyncOutcome, Synchronizer};
use point_blocks::ContentError;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const DOC: &str = "第一阶段：建立框架\n【考点 C5.2｜M02｜本页定位】\n定位\n【考点 C5.2｜M03｜必背】\n要点\n第二阶段：复习\n【考点 C5.2｜M05｜易错】\n易错\n";

async fn setup() -> (TempDir, Config, SqliteBlockStore, Synchronizer) {
    let tmp = TempDir::new().unwrap();
    let config = Config::rooted_at(tmp.path());
    fs::create_dir_all(&config.content.dir).unwrap();
    fs::write(config.content.dir.join("c5.2.txt"), DOC).unwrap();

    let store = SqliteBlockStore::open(&config).await.unwrap();
    let sync = Synchronizer::new(
        FileLocator::from_config(&config.content).unwrap(),
        Arc::new(store.clone()),
        SyncOptions::default(),
    );
    (tmp, config, store, sync)
}

#[tokio::test]
async fn test_sync_persists_and_skips() {
    let (_tmp, _config, store, sync) = setup().await;

    let outcome = sync.sync_one("c5.2").await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Written {
            file_name: "c5.2.txt".to_string(),
            blocks: 3
        }
    );

    let record = store.file_record("C5.2").await.unwrap().unwrap();
    assert_eq!(record.file_name, "c5.2.txt");
    assert_eq!(record.raw_content, DOC);
    assert_eq!(record.file_hash.len(), 64);

    let blocks = store.blocks("C5.2", Some(StageId::Stage1), None).await.unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(blocks.iter().all(|b| b.source_file_hash == record.file_hash));

    assert!(matches!(
        sync.sync_one("C5.2").await.unwrap(),
        SyncOutcome::Skipped { .. }
    ));
    store.close().await;
}

#[tokio::test]
async fn test_resync_replaces_whole_set() {
    let (_tmp, config, store, sync) = setup().await;
    sync.sync_one("C5.2").await.unwrap();

    fs::write(
        config.content.dir.join("c5.2.txt"),
        "第三阶段：冲刺\n【考点 C5.2｜M06｜小结】\n只剩一块\n",
    )
    .unwrap();
    assert_eq!(sync.sync_one("C5.2").await.unwrap().blocks_written(), 1);

    let blocks = store.blocks("C5.2", None, None).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].stage, StageId::Stage3);
    assert_eq!(blocks[0].module_code, ModuleCode::M06);
    store.close().await;
}

#[tokio::test]
async fn test_empty_parse_leaves_database_untouched() {
    let (_tmp, config, store, sync) = setup().await;
    sync.sync_one("C5.2").await.unwrap();
    let before = store.file_record("C5.2").await.unwrap();

    fs::write(config.content.dir.join("c5.2.txt"), "").unwrap();
    let err = sync.sync_one("C5.2").await.unwrap_err();
    assert!(matches!(err, ContentError::EmptyParse { .. }));

    assert_eq!(store.block_count("C5.2").await.unwrap(), 3);
    assert_eq!(store.file_record("C5.2").await.unwrap(), before);
    store.close().await;
}

#[tokio::test]
async fn test_store_fallback_after_file_removed() {
    let (_tmp, config, store, sync) = setup().await;
    sync.sync_one("C5.2").await.unwrap();
    fs::remove_file(config.content.dir.join("c5.2.txt")).unwrap();

    let service = ContentService::with_store(
        FileLocator::from_config(&config.content).unwrap(),
        Arc::new(store.clone()),
    );
    let content = service.get_content_or_stored("C5.2").await.unwrap();
    assert_eq!(content.source, ContentSource::Store);
    assert_eq!(content.module_count(), 3);
    assert_eq!(
        content.stages[1].stage_title,
        StageId::Stage2.canonical_title()
    );
    store.close().await;
}

#[tokio::test]
async fn test_sync_all_and_stats() {
    let (_tmp, config, store, sync) = setup().await;
    fs::write(
        config.content.dir.join("c5.3.txt"),
        "第二阶段：复习\n【考点 C5.3｜M04｜秒杀】\n秒\n",
    )
    .unwrap();

    let report = sync.sync_all().await.unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.blocks_written, 4);
    assert_eq!(report.chapters.get("C5"), Some(&2));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.codes, 2);
    assert_eq!(stats.blocks, 4);
    assert_eq!(stats.files, 2);
    assert!(stats.by_stage.contains(&(StageId::Stage2, 2)));

    let similar = store.similar_codes("5.", 10).await.unwrap();
    assert_eq!(similar.len(), 2);
    store.close().await;
}
