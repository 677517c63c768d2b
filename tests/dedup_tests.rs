use spotify_playlist_dedup as lib;

use lib::api::mock::MockApi;
use lib::auth::SessionManager;
use lib::config::Config;
use lib::dedup::DuplicateResolver;
use lib::error::DedupError;
use lib::models::{
    Account, AccountSet, Credential, DuplicateCandidate, ItemKind, Page, PlaylistEntry, TokenSet,
};
use lib::store::{CredentialStore, MemoryStore, ACCOUNTS_KEY};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn test_config() -> Config {
    Config {
        client_id: "test-client".into(),
        client_secret: "test-secret".into(),
        ..Default::default()
    }
}

fn authorized_store() -> Arc<MemoryStore> {
    let set = AccountSet {
        accounts: vec![Account {
            user_id: "user-1".into(),
            display_name: None,
            credential: Credential {
                scopes: vec!["playlist-read-private".into()],
                tokens: Some(TokenSet {
                    access_token: "seed-access".into(),
                    refresh_token: "seed-refresh".into(),
                    expires_at: chrono::Utc::now().timestamp() + 3600,
                }),
            },
        }],
        current: Some("user-1".into()),
    };
    let store = Arc::new(MemoryStore::new());
    store
        .set(ACCOUNTS_KEY, &serde_json::to_vec(&set).unwrap())
        .unwrap();
    store
}

fn resolver_with(api: Arc<MockApi>) -> DuplicateResolver {
    let cfg = test_config();
    let session = SessionManager::new(&cfg, api.clone(), authorized_store()).unwrap();
    DuplicateResolver::new(session, api, &cfg)
}

fn track(uri: &str, name: &str, artist: &str, ms: u64) -> Option<PlaylistEntry> {
    Some(PlaylistEntry {
        uri: Some(uri.into()),
        kind: ItemKind::Track,
        name: name.into(),
        by: Some(artist.into()),
        duration_ms: Some(ms),
        is_local: false,
    })
}

#[tokio::test]
async fn scan_carries_positions_across_pages() {
    // [A, B, A'] then [C, A'']; A/A'/A'' share a uri.
    let api = Arc::new(MockApi {
        pages: vec![
            Page {
                items: vec![
                    track("spotify:track:a", "A", "Artist", 200_000),
                    track("spotify:track:b", "B", "Artist", 180_000),
                    track("spotify:track:a", "A", "Artist", 200_000),
                ],
                offset: 0,
                total: 5,
            },
            Page {
                items: vec![
                    track("spotify:track:c", "C", "Artist", 240_000),
                    track("spotify:track:a", "A", "Artist", 200_000),
                ],
                offset: 3,
                total: 5,
            },
        ],
        ..Default::default()
    });
    let resolver = resolver_with(api.clone());

    let candidates = resolver.find_duplicates("playlist-1").await.unwrap();
    assert_eq!(
        candidates,
        vec![
            DuplicateCandidate {
                uri: "spotify:track:a".into(),
                position: 2,
            },
            DuplicateCandidate {
                uri: "spotify:track:a".into(),
                position: 4,
            },
        ]
    );
    assert_eq!(api.page_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn local_and_unresolvable_entries_are_skipped() {
    let local = Some(PlaylistEntry {
        uri: Some("spotify:local:a".into()),
        kind: ItemKind::Track,
        name: "A".into(),
        by: Some("Artist".into()),
        duration_ms: Some(200_000),
        is_local: true,
    });
    let api = Arc::new(MockApi {
        pages: vec![Page {
            items: vec![
                local.clone(),
                None,
                track("spotify:track:a", "A", "Artist", 200_000),
                local,
                track("spotify:track:a", "A", "Artist", 200_000),
            ],
            offset: 0,
            total: 5,
        }],
        ..Default::default()
    });
    let resolver = resolver_with(api);

    let candidates = resolver.find_duplicates("playlist-1").await.unwrap();
    // Only the second real occurrence counts, at its absolute position.
    assert_eq!(
        candidates,
        vec![DuplicateCandidate {
            uri: "spotify:track:a".into(),
            position: 4,
        }]
    );
}

#[tokio::test]
async fn entries_without_a_uri_are_seen_but_never_candidates() {
    let uriless = Some(PlaylistEntry {
        uri: None,
        kind: ItemKind::Track,
        name: "Song".into(),
        by: Some("Artist".into()),
        duration_ms: Some(200_000),
        is_local: false,
    });
    let api = Arc::new(MockApi {
        pages: vec![Page {
            items: vec![
                uriless.clone(),
                uriless,
                track("spotify:track:x", "Song", "Artist", 201_000),
            ],
            offset: 0,
            total: 3,
        }],
        ..Default::default()
    });
    let resolver = resolver_with(api);

    let candidates = resolver.find_duplicates("playlist-1").await.unwrap();
    // The two uri-less twins cannot be recorded, but the third occurrence
    // (with a uri) matches them by name/artist/duration.
    assert_eq!(
        candidates,
        vec![DuplicateCandidate {
            uri: "spotify:track:x".into(),
            position: 2,
        }]
    );
}

#[tokio::test]
async fn empty_candidate_list_means_no_network_calls() {
    let api = Arc::new(MockApi::new());
    let resolver = resolver_with(api.clone());

    let summary = resolver.remove_duplicates("playlist-1", &[]).await.unwrap();
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.batches_applied, 0);
    assert_eq!(api.removal_calls.load(Ordering::SeqCst), 0);
    assert_eq!(api.page_calls.load(Ordering::SeqCst), 0);
}

fn many_candidates(n: usize) -> Vec<DuplicateCandidate> {
    (0..n)
        .map(|i| DuplicateCandidate {
            uri: format!("spotify:track:{}", i % 7),
            position: i,
        })
        .collect()
}

#[tokio::test]
async fn removal_batches_are_sequential_and_fail_fast() {
    let api = Arc::new(MockApi {
        fail_removal_at_batch: Some(1),
        ..Default::default()
    });
    let resolver = resolver_with(api.clone());

    // 250 candidates -> 3 batches of <= 100.
    let err = resolver
        .remove_duplicates("playlist-1", &many_candidates(250))
        .await
        .unwrap_err();
    match err {
        DedupError::Removal {
            batches_applied, ..
        } => assert_eq!(batches_applied, 1),
        other => panic!("unexpected error: {}", other),
    }
    // Batch 0 applied, batch 1 failed, batch 2 never sent.
    assert_eq!(api.removal_calls.load(Ordering::SeqCst), 2);
    assert_eq!(api.removed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn successful_removal_reports_totals_and_snapshot() {
    let api = Arc::new(MockApi::new());
    let resolver = resolver_with(api.clone());

    let summary = resolver
        .remove_duplicates("playlist-1", &many_candidates(250))
        .await
        .unwrap();
    assert_eq!(summary.removed, 250);
    assert_eq!(summary.batches_applied, 3);

    let removed = api.removed.lock().unwrap();
    assert_eq!(removed.len(), 3);
    // Every batch was pinned to the scan-time snapshot.
    assert!(removed
        .iter()
        .all(|(snapshot, _)| snapshot == "mock-snapshot-1"));
    let positions: usize = removed
        .iter()
        .flat_map(|(_, batch)| batch.iter())
        .map(|b| b.positions.len())
        .sum();
    assert_eq!(positions, 250);
}

#[tokio::test]
async fn page_fetch_failure_aborts_without_removing() {
    let api = Arc::new(MockApi {
        pages: vec![Page {
            items: vec![
                track("spotify:track:a", "A", "Artist", 200_000),
                track("spotify:track:a", "A", "Artist", 200_000),
            ],
            offset: 0,
            total: 4,
        }],
        fail_page_at_offset: Some(2),
        ..Default::default()
    });
    let resolver = resolver_with(api.clone());

    let err = resolver.find_and_remove("playlist-1").await.unwrap_err();
    assert!(matches!(err, DedupError::Scan(_)));
    assert_eq!(api.removal_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn busy_flag_clears_after_a_failed_run() {
    let api = Arc::new(MockApi {
        fail_page_at_offset: Some(0),
        ..Default::default()
    });
    let resolver = resolver_with(api);

    let err = resolver.find_duplicates("playlist-1").await.unwrap_err();
    assert!(matches!(err, DedupError::Scan(_)));
    assert!(!resolver.is_busy());

    // A second run must not see a stuck busy flag.
    let err = resolver.find_duplicates("playlist-1").await.unwrap_err();
    assert!(matches!(err, DedupError::Scan(_)));
}

#[tokio::test]
async fn find_and_remove_round_trip() {
    let api = Arc::new(MockApi {
        pages: vec![Page {
            items: vec![
                track("spotify:track:a", "A", "Artist", 200_000),
                track("spotify:track:b", "B", "Artist", 180_000),
                track("spotify:track:a", "A", "Artist", 200_000),
            ],
            offset: 0,
            total: 3,
        }],
        ..Default::default()
    });
    let resolver = resolver_with(api.clone());

    let summary = resolver.find_and_remove("playlist-1").await.unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.batches_applied, 1);

    let removed = api.removed.lock().unwrap();
    assert_eq!(removed[0].1[0].uri, "spotify:track:a");
    assert_eq!(removed[0].1[0].positions, vec![2]);
}
