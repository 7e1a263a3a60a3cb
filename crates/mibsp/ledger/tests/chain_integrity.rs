use std::collections::HashSet;
use std::sync::Arc;

use mibsp_ledger::{
    ChainBuilder, ChainVerifier, FindingKind, LedgerConfig, ScanMode, VerificationStatus,
};
use mibsp_storage::memory::InMemoryStorage;
use mibsp_storage::LedgerStore;
use mibsp_types::{Action, Actor, ActorRole, Detail, LedgerEntry, LinkHash, SubjectRef};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn officer(i: usize) -> Actor {
    Actor::officer(format!("officer_{i}")).unwrap()
}

async fn append_n(builder: &ChainBuilder, n: usize) {
    for i in 0..n {
        builder
            .append(
                officer(i % 3),
                Action::ALL[i % Action::ALL.len()],
                SubjectRef::user(i as u64),
                Detail::text(format!("event {i}")),
            )
            .await
            .unwrap();
    }
}

fn ledger(page_size: u64) -> (Arc<InMemoryStorage>, ChainBuilder, ChainVerifier) {
    let store = Arc::new(InMemoryStorage::new());
    let config = LedgerConfig {
        verify_page_size: page_size,
        ..LedgerConfig::default()
    };
    let builder = ChainBuilder::new(store.clone(), config.clone());
    let verifier = ChainVerifier::new(store.clone(), &config);
    (store, builder, verifier)
}

#[tokio::test]
async fn documented_example_entry() {
    let (store, builder, verifier) = ledger(500);
    let actor = Actor::officer("officer_water").unwrap();
    let subject = SubjectRef::new("MIBA1B2C3D4").unwrap();

    let first = builder
        .append(
            actor.clone(),
            Action::StatusChange,
            subject.clone(),
            Detail::text("marked resolved"),
        )
        .await
        .unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.prev_link_hash, LinkHash::GENESIS);
    assert_eq!(first.link_hash, first.recompute_link_hash());

    let second = builder
        .append(actor, Action::StatusChange, subject, Detail::text("marked resolved"))
        .await
        .unwrap();
    assert_eq!(second.sequence, 2);
    assert_ne!(second.link_hash, first.link_hash);

    let stored = store.get_entry(1).await.unwrap().unwrap();
    assert_eq!(stored, first);
    assert!(verifier
        .verify_all(ScanMode::FirstFinding)
        .await
        .unwrap()
        .is_intact());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_appends_stay_contiguous() {
    let (store, builder, verifier) = ledger(16);
    let builder = Arc::new(builder);

    let mut handles = Vec::new();
    for i in 0..64usize {
        let builder = builder.clone();
        handles.push(tokio::spawn(async move {
            builder
                .append(
                    officer(i),
                    Action::NotesAdded,
                    SubjectRef::user(i as u64),
                    Detail::text(format!("parallel {i}")),
                )
                .await
                .unwrap()
                .sequence
        }));
    }

    let mut sequences = HashSet::new();
    for handle in handles {
        assert!(sequences.insert(handle.await.unwrap()));
    }
    assert_eq!(sequences, (1..=64).collect::<HashSet<u64>>());
    assert_eq!(store.len().unwrap(), 64);
    assert!(verifier
        .verify_all(ScanMode::Forensic)
        .await
        .unwrap()
        .is_intact());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_builders_share_one_tail() {
    // Two builders model two worker processes: no shared lock, only the
    // store's compare-and-append.
    let store = Arc::new(InMemoryStorage::new());
    let config = LedgerConfig {
        max_append_attempts: 1_000,
        ..LedgerConfig::default()
    };
    let a = Arc::new(ChainBuilder::new(store.clone(), config.clone()));
    let b = Arc::new(ChainBuilder::new(store.clone(), config.clone()));

    let mut handles = Vec::new();
    for i in 0..40usize {
        let builder = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            builder
                .append(
                    Actor::system(),
                    Action::ConfigurationChange,
                    SubjectRef::new("settings").unwrap(),
                    Detail::text(format!("worker write {i}")),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let result = ChainVerifier::new(store.clone(), &config)
        .verify_all(ScanMode::Forensic)
        .await
        .unwrap();
    assert!(result.is_intact());
    assert_eq!(result.entries_checked, 40);
}

#[tokio::test]
async fn deleted_entry_surfaces_at_successor() {
    let (store, builder, verifier) = ledger(4);
    append_n(&builder, 10).await;
    store.excise_entry(6).unwrap();

    let result = verifier.verify_all(ScanMode::FirstFinding).await.unwrap();
    assert_eq!(
        result.status(),
        VerificationStatus::Tampered {
            sequence: 7,
            kind: FindingKind::SequenceGap
        }
    );
}

#[tokio::test]
async fn swapped_entries_are_detected() {
    let (store, builder, verifier) = ledger(500);
    append_n(&builder, 5).await;
    let two = store.get_entry(2).await.unwrap().unwrap();
    let three = store.get_entry(3).await.unwrap().unwrap();
    store.tamper_entry(2, |e| *e = renumbered(three, 2));
    store.tamper_entry(3, |e| *e = renumbered(two, 3));

    let result = verifier.verify_all(ScanMode::FirstFinding).await.unwrap();
    assert_eq!(
        result.status(),
        VerificationStatus::Tampered {
            sequence: 2,
            kind: FindingKind::ContentTampering
        }
    );
}

fn renumbered(mut entry: LedgerEntry, sequence: u64) -> LedgerEntry {
    entry.sequence = sequence;
    entry
}

#[tokio::test]
async fn incremental_verification_from_seed() {
    let (store, builder, verifier) = ledger(3);
    append_n(&builder, 12).await;
    let seed = store.get_entry(8).await.unwrap().unwrap().link_hash;

    let result = verifier
        .verify_range(9, 12, seed, ScanMode::FirstFinding)
        .await
        .unwrap();
    assert!(result.is_intact());
    assert_eq!(result.entries_checked, 4);

    store.tamper_entry(10, |e| e.subject_ref = SubjectRef::user(999));
    let result = verifier
        .verify_range(9, 12, seed, ScanMode::FirstFinding)
        .await
        .unwrap();
    assert_eq!(
        result.status(),
        VerificationStatus::Tampered {
            sequence: 10,
            kind: FindingKind::ContentTampering
        }
    );
}

#[tokio::test]
async fn verification_does_not_mutate() {
    let (store, builder, verifier) = ledger(2);
    append_n(&builder, 6).await;
    let before = store.scan_ascending(1, 6).await.unwrap();

    let first = verifier.verify_all(ScanMode::Forensic).await.unwrap();
    let second = verifier.verify_all(ScanMode::Forensic).await.unwrap();

    assert_eq!(store.scan_ascending(1, 6).await.unwrap(), before);
    assert_eq!(first.findings, second.findings);
    assert_eq!(first.entries_checked, second.entries_checked);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_number_of_appends_verifies(n in 0usize..40, page in 1u64..8) {
        runtime().block_on(async {
            let (_, builder, verifier) = ledger(page);
            append_n(&builder, n).await;
            let result = verifier.verify_all(ScanMode::FirstFinding).await.unwrap();
            prop_assert!(result.is_intact());
            prop_assert_eq!(result.entries_checked, n as u64);
            Ok(())
        })?;
    }

    #[test]
    fn mutation_is_reported_at_its_sequence(
        n in 2usize..30,
        pick in any::<prop::sample::Index>(),
        field in 0u8..9,
    ) {
        runtime().block_on(async {
            let (store, builder, verifier) = ledger(4);
            append_n(&builder, n).await;
            // Any entry before the tail.
            let k = pick.index(n - 1) as u64 + 1;
            store.tamper_entry(k, |e| match field {
                0 => e.detail = Detail::text("forged"),
                1 if e.action == Action::AdminOverride => e.action = Action::Login,
                1 => e.action = Action::AdminOverride,
                2 => e.actor = Actor::admin("intruder").unwrap(),
                3 => e.actor = Actor::from_stored(ActorRole::System, e.actor.id()),
                4 => e.timestamp += chrono::Duration::seconds(1),
                5 => e.subject_ref = SubjectRef::from_stored(""),
                6 => e.prev_link_hash = LinkHash::from_bytes([0xaa; 32]),
                7 => e.link_hash = LinkHash::from_bytes([0xee; 32]),
                _ => e.sequence += 1_000,
            });

            let result = verifier.verify_all(ScanMode::FirstFinding).await.unwrap();
            prop_assert_eq!(
                result.status(),
                VerificationStatus::Tampered { sequence: k, kind: FindingKind::ContentTampering }
            );
            Ok(())
        })?;
    }
}
