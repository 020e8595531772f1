//! Crash recovery and durability tests.

use std::sync::Arc;
use strata_core::{Config, StorageEnvironment};
use strata_storage::{LogDirectory, MemoryLogDirectory, MemoryPager, PageNumber, Pager};
use tempfile::tempdir;

const PAGE: usize = 1024;

fn config() -> Config {
    Config::default().page_size(PAGE).checkpoint_threshold(0)
}

fn put(env: &StorageEnvironment, key: &[u8], value: &[u8]) {
    env.write(|txn| txn.create_tree("t")?.add(key, value)).unwrap();
}

fn get(env: &StorageEnvironment, key: &[u8]) -> Option<Vec<u8>> {
    env.read(|txn| match txn.open_tree("t")? {
        Some(tree) => tree.read(key),
        None => Ok(None),
    })
    .unwrap()
}

/// Copies every page of a pager, as a stand-in for what reached the disk.
fn disk_image(pager: &dyn Pager) -> Arc<dyn Pager> {
    let copy = MemoryPager::new(pager.page_size());
    copy.ensure(pager.capacity()).unwrap();
    for page in 0..pager.capacity() {
        copy.write(PageNumber(page), &pager.read(PageNumber(page)).unwrap())
            .unwrap();
    }
    Arc::new(copy)
}

#[test]
fn committed_data_survives_reopen_without_close() {
    let dir = tempdir().unwrap();
    {
        let env = StorageEnvironment::open_with_config(dir.path(), config()).unwrap();
        for i in 0..100u32 {
            put(&env, &i.to_be_bytes(), format!("value {i}").as_bytes());
        }
        // Dropped without close: nothing is checkpointed.
    }

    let env = StorageEnvironment::open_with_config(dir.path(), config()).unwrap();
    assert_eq!(env.recovery_report().replayed, 100);
    for i in 0..100u32 {
        assert_eq!(
            get(&env, &i.to_be_bytes()),
            Some(format!("value {i}").into_bytes())
        );
    }
    assert!(env.verify().unwrap().is_ok());
}

#[test]
fn journal_replay_rebuilds_a_stale_data_file() {
    let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(PAGE));
    let journal = MemoryLogDirectory::new();

    let env =
        StorageEnvironment::open_with_storage(config(), Arc::clone(&pager), Arc::new(journal.clone()))
            .unwrap();
    // The data file as of the last checkpoint.
    let stale = disk_image(pager.as_ref());
    put(&env, b"a", b"1");
    put(&env, b"b", b"2");
    drop(env);

    let env = StorageEnvironment::open_with_storage(config(), stale, Arc::new(journal)).unwrap();
    assert_eq!(env.recovery_report().replayed, 2);
    assert_eq!(get(&env, b"a"), Some(b"1".to_vec()));
    assert_eq!(get(&env, b"b"), Some(b"2".to_vec()));
    assert!(env.verify().unwrap().is_ok());
}

#[test]
fn torn_journal_tail_is_discarded() {
    let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(PAGE));
    let journal = MemoryLogDirectory::new();

    let env =
        StorageEnvironment::open_with_storage(config(), Arc::clone(&pager), Arc::new(journal.clone()))
            .unwrap();
    let stale = disk_image(pager.as_ref());
    put(&env, b"a", b"1");
    put(&env, b"b", b"2");
    drop(env);

    // Lose the end of the second record, as a crash mid-append would.
    let newest = *journal.list().unwrap().last().unwrap();
    let log = journal.log(newest).unwrap();
    let mut bytes = log.data();
    bytes.truncate(bytes.len() - 10);
    log.set_data(bytes);

    let env = StorageEnvironment::open_with_storage(config(), stale, Arc::new(journal)).unwrap();
    let report = env.recovery_report();
    assert_eq!(report.replayed, 1);
    assert!(report.torn_bytes > 0);
    assert_eq!(get(&env, b"a"), Some(b"1".to_vec()));
    assert_eq!(get(&env, b"b"), None);

    // The environment accepts writes again.
    put(&env, b"c", b"3");
    assert_eq!(get(&env, b"c"), Some(b"3".to_vec()));
    assert!(env.verify().unwrap().is_ok());
}

#[test]
fn damage_before_the_tail_is_fatal() {
    let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(PAGE));
    let journal = MemoryLogDirectory::new();

    let env =
        StorageEnvironment::open_with_storage(config(), Arc::clone(&pager), Arc::new(journal.clone()))
            .unwrap();
    put(&env, b"a", b"1");
    put(&env, b"b", b"2");
    drop(env);

    let newest = *journal.list().unwrap().last().unwrap();
    let log = journal.log(newest).unwrap();
    let mut bytes = log.data();
    // Inside the body of the first record.
    bytes[60] ^= 0xff;
    log.set_data(bytes);

    let err = StorageEnvironment::open_with_storage(config(), pager, Arc::new(journal)).unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn close_checkpoints_and_empties_the_journal() {
    let dir = tempdir().unwrap();
    {
        let env = StorageEnvironment::open_with_config(dir.path(), config()).unwrap();
        put(&env, b"k", b"v");
        env.close().unwrap();
    }
    let env = StorageEnvironment::open_with_config(dir.path(), config()).unwrap();
    assert_eq!(env.recovery_report().replayed, 0);
    assert_eq!(get(&env, b"k"), Some(b"v".to_vec()));
}

#[test]
fn automatic_checkpoint_bounds_the_journal() {
    let dir = tempdir().unwrap();
    let config = config().checkpoint_threshold(16 * 1024);
    let env = StorageEnvironment::open_with_config(dir.path(), config).unwrap();
    for i in 0..200u32 {
        put(&env, &i.to_be_bytes(), &[7u8; 64]);
    }
    let stats = env.stats().unwrap();
    assert!(stats.journal_bytes < 2 * 16 * 1024);
    assert!(stats.checkpoint_txid.as_u64() > 1);
}

#[test]
fn journal_rotates_into_numbered_files() {
    let dir = tempdir().unwrap();
    let config = config().journal_file_size(4 * 1024);
    {
        let env = StorageEnvironment::open_with_config(dir.path(), config.clone()).unwrap();
        for i in 0..20u32 {
            put(&env, &i.to_be_bytes(), &[1u8; 32]);
        }
        assert!(env.stats().unwrap().journal_files > 1);
    }
    let env = StorageEnvironment::open_with_config(dir.path(), config).unwrap();
    assert!(env.recovery_report().files > 1);
    assert_eq!(env.recovery_report().replayed, 20);
    assert_eq!(get(&env, &19u32.to_be_bytes()), Some(vec![1u8; 32]));
}

#[test]
fn out_of_space_aborts_only_the_transaction() {
    let config = config().initial_size(8 * PAGE as u64).max_size(16 * PAGE as u64);
    let env = StorageEnvironment::open_in_memory_with_config(config).unwrap();
    put(&env, b"small", b"1");

    let result = env.write(|txn| {
        let mut tree = txn.create_tree("t")?;
        for i in 0..64u32 {
            tree.add(&i.to_be_bytes(), &[0u8; 900])?;
        }
        Ok(())
    });
    let err = result.unwrap_err();
    assert!(err.is_out_of_space(), "{err}");

    assert!(env.poisoned().is_none());
    assert_eq!(get(&env, b"small"), Some(b"1".to_vec()));
    assert_eq!(get(&env, &0u32.to_be_bytes()), None);
    put(&env, b"after", b"2");
    assert_eq!(get(&env, b"after"), Some(b"2".to_vec()));
    assert!(env.verify().unwrap().is_ok());
}
