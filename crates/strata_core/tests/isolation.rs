//! Snapshot isolation and single-writer tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use strata_core::{Config, CoreError, CoreResult, Slice, StorageEnvironment, TransactionState};
use tempfile::tempdir;

fn env() -> StorageEnvironment {
    StorageEnvironment::open_in_memory_with_config(Config::default().page_size(1024)).unwrap()
}

fn keys(env: &StorageEnvironment, tree: &str) -> Vec<Vec<u8>> {
    env.read(|txn| {
        let tree = txn.open_tree(tree)?.expect("tree exists");
        tree.iterate(Slice::BeforeAllKeys, Slice::AfterAllKeys)?
            .map(|entry| entry.map(|(key, _)| key))
            .collect()
    })
    .unwrap()
}

#[test]
fn reader_keeps_its_generation_after_a_delete_commits() {
    let env = env();
    env.write(|txn| {
        let mut tree = txn.create_tree("t")?;
        tree.add(b"doomed", b"original")?;
        tree.add(b"other", b"x")?;
        Ok(())
    })
    .unwrap();

    let r1 = env.begin_read().unwrap();
    env.write(|txn| txn.create_tree("t")?.delete(b"doomed")).unwrap();

    let before = r1.open_tree("t").unwrap().unwrap();
    assert_eq!(before.read(b"doomed").unwrap(), Some(b"original".to_vec()));
    assert_eq!(before.len(), 2);

    let r2 = env.begin_read().unwrap();
    let after = r2.open_tree("t").unwrap().unwrap();
    assert_eq!(after.read(b"doomed").unwrap(), None);
    assert_eq!(after.len(), 1);
    assert!(r2.generation() > r1.generation());
}

#[test]
fn reader_never_sees_uncommitted_pages() {
    let env = env();
    env.write(|txn| txn.create_tree("t")?.add(b"k", b"committed")).unwrap();

    let mut writer = env.begin_write().unwrap();
    {
        let mut tree = writer.create_tree("t").unwrap();
        for i in 0..500u32 {
            tree.add(&i.to_be_bytes(), &[1u8; 64]).unwrap();
        }
        tree.add(b"k", b"pending").unwrap();
    }

    let reader = env.begin_read().unwrap();
    let tree = reader.open_tree("t").unwrap().unwrap();
    assert_eq!(tree.read(b"k").unwrap(), Some(b"committed".to_vec()));
    assert_eq!(tree.len(), 1);

    writer.commit().unwrap();
    // Still the old generation.
    assert_eq!(tree.read(b"k").unwrap(), Some(b"committed".to_vec()));
    assert_eq!(tree.iter().unwrap().count(), 1);
}

#[test]
fn rollback_leaves_other_views_unchanged() {
    let env = env();
    env.write(|txn| {
        let mut tree = txn.create_tree("t")?;
        for i in 0..100u32 {
            tree.add(&i.to_be_bytes(), b"v")?;
        }
        Ok(())
    })
    .unwrap();
    let before = keys(&env, "t");
    let stats_before = env.stats().unwrap();

    let mut writer = env.begin_write().unwrap();
    {
        let mut tree = writer.create_tree("t").unwrap();
        for i in 0..100u32 {
            if i % 3 == 0 {
                tree.delete(&i.to_be_bytes()).unwrap();
            } else {
                tree.add(&(i + 1000).to_be_bytes(), &[9u8; 300]).unwrap();
            }
        }
    }
    writer.create_tree("extra").unwrap();
    writer.rollback().unwrap();
    assert_eq!(writer.state(), TransactionState::RolledBack);
    assert!(writer.commit().is_err());
    drop(writer);

    assert_eq!(keys(&env, "t"), before);
    assert!(env.read(|txn| txn.open_tree("extra").map(|t| t.is_none())).unwrap());
    let stats_after = env.stats().unwrap();
    assert_eq!(stats_after.generation, stats_before.generation);
    assert_eq!(stats_after.allocated_pages, stats_before.allocated_pages);
    assert!(env.verify().unwrap().is_ok());
}

#[test]
fn second_writer_blocks_until_the_first_commits() {
    let env = env();
    env.write(|txn| txn.create_tree("t")?.add(b"n", b"0")).unwrap();

    let first_committed = AtomicBool::new(false);
    let (started_tx, started_rx) = mpsc::channel();

    thread::scope(|s| {
        let env = &env;
        let first_committed = &first_committed;

        let first = s.spawn(move || {
            let mut txn = env.begin_write().unwrap();
            txn.create_tree("t").unwrap().add(b"n", b"1").unwrap();
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            first_committed.store(true, Ordering::SeqCst);
            txn.commit().unwrap();
        });

        started_rx.recv().unwrap();
        let second = s.spawn(move || {
            let mut txn = env.begin_write().unwrap();
            assert!(first_committed.load(Ordering::SeqCst));
            let seen = txn.open_tree("t").unwrap().unwrap().read(b"n").unwrap();
            txn.create_tree("t").unwrap().add(b"n", b"2").unwrap();
            txn.commit().unwrap();
            seen
        });

        first.join().unwrap();
        assert_eq!(second.join().unwrap(), Some(b"1".to_vec()));
    });

    let final_value = env
        .read(|txn| txn.open_tree("t")?.expect("tree exists").read(b"n"))
        .unwrap();
    assert_eq!(final_value, Some(b"2".to_vec()));
}

#[test]
fn readers_run_while_a_writer_is_active() {
    let env = env();
    env.write(|txn| {
        txn.create_tree("a")?.add(b"k", b"0")?;
        txn.create_tree("b")?.add(b"k", b"0")?;
        Ok(())
    })
    .unwrap();

    thread::scope(|s| {
        let env = &env;
        let writer = s.spawn(move || {
            for i in 1..=50u32 {
                env.write(|txn| {
                    let value = i.to_string();
                    txn.create_tree("a")?.add(b"k", value.as_bytes())?;
                    txn.create_tree("b")?.add(b"k", value.as_bytes())?;
                    Ok(())
                })
                .unwrap();
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(move || -> CoreResult<()> {
                    for _ in 0..200 {
                        let snapshot = env.create_snapshot()?;
                        let a = snapshot.open_tree("a")?.expect("a exists").read(b"k")?;
                        let b = snapshot.open_tree("b")?.expect("b exists").read(b"k")?;
                        assert_eq!(a, b, "trees diverged within one snapshot");
                    }
                    Ok(())
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap().unwrap();
        }
    });

    assert!(env.verify().unwrap().is_ok());
    assert_eq!(env.stats().unwrap().active_readers, 0);
}

#[test]
fn close_waits_for_the_active_writer() {
    let dir = tempdir().unwrap();
    let config = Config::default().page_size(1024);
    let env = StorageEnvironment::open_with_config(dir.path(), config.clone()).unwrap();
    env.write(|txn| txn.create_tree("t")?.add(b"before", b"0")).unwrap();

    let committing = AtomicBool::new(false);
    let (started_tx, started_rx) = mpsc::channel();

    thread::scope(|s| {
        let env = &env;
        let committing = &committing;

        let writer = s.spawn(move || -> CoreResult<()> {
            let mut txn = env.begin_write()?;
            txn.create_tree("t")?.add(b"during", b"1")?;
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
            // The environment stays usable until this transaction ends.
            let stats = env.stats()?;
            assert!(env.is_open());
            assert_eq!(stats.trees, 1);
            committing.store(true, Ordering::SeqCst);
            txn.commit()?;
            Ok(())
        });

        started_rx.recv().unwrap();
        let closer = s.spawn(move || {
            let result = env.close();
            assert!(committing.load(Ordering::SeqCst));
            result
        });

        writer.join().unwrap().unwrap();
        closer.join().unwrap().unwrap();
    });

    assert!(!env.is_open());
    assert!(matches!(env.begin_write(), Err(CoreError::EnvironmentClosed)));
    drop(env);

    let env = StorageEnvironment::open_with_config(dir.path(), config).unwrap();
    assert_eq!(env.recovery_report().replayed, 0);
    assert_eq!(keys(&env, "t"), vec![b"before".to_vec(), b"during".to_vec()]);
}
