use crate::api::SpotifyApi;
use crate::auth::SessionManager;
use crate::config::Config;
use crate::error::DedupError;
use crate::models::{DuplicateCandidate, PlaylistEntry, RemovalSummary, UriPositions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Finds probable-duplicate items in a playlist and removes them in
/// bounded batches.
///
/// Scanning walks every page in order, carrying the absolute position
/// across page boundaries. Removal is strictly sequential and stops at the
/// first failed batch: later batches were computed against the scan-time
/// snapshot and cannot be trusted after a partial mutation.
pub struct DuplicateResolver {
    session: SessionManager,
    api: Arc<dyn SpotifyApi>,
    page_limit: usize,
    max_batch: usize,
    busy: AtomicBool,
}

impl DuplicateResolver {
    pub fn new(session: SessionManager, api: Arc<dyn SpotifyApi>, cfg: &Config) -> Self {
        Self {
            session,
            api,
            page_limit: cfg.page_limit,
            max_batch: cfg.max_removal_batch,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a scan or removal is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Scan the whole playlist and return every later occurrence of an
    /// already-seen item. Nothing is removed.
    pub async fn find_duplicates(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<DuplicateCandidate>, DedupError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let token = self.access_token().await?;
        self.scan(&token, playlist_id).await
    }

    /// Remove previously found candidates. An empty candidate list returns
    /// a zero summary without touching the network.
    pub async fn remove_duplicates(
        &self,
        playlist_id: &str,
        candidates: &[DuplicateCandidate],
    ) -> Result<RemovalSummary, DedupError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        if candidates.is_empty() {
            return Ok(RemovalSummary {
                removed: 0,
                batches_applied: 0,
            });
        }
        let token = self.access_token().await?;
        let snapshot = self
            .api
            .playlist_snapshot_id(&token, playlist_id)
            .await
            .map_err(DedupError::Scan)?;
        self.remove(&token, playlist_id, &snapshot, candidates).await
    }

    /// One full deduplication cycle, holding the busy flag across both
    /// phases. The snapshot id is captured before the scan so removal
    /// positions are evaluated against exactly what was scanned.
    pub async fn find_and_remove(&self, playlist_id: &str) -> Result<RemovalSummary, DedupError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let token = self.access_token().await?;
        let snapshot = self
            .api
            .playlist_snapshot_id(&token, playlist_id)
            .await
            .map_err(DedupError::Scan)?;
        let candidates = self.scan(&token, playlist_id).await?;
        if candidates.is_empty() {
            info!("playlist {} has no duplicates", playlist_id);
            return Ok(RemovalSummary {
                removed: 0,
                batches_applied: 0,
            });
        }
        self.remove(&token, playlist_id, &snapshot, &candidates).await
    }

    async fn access_token(&self) -> Result<String, DedupError> {
        // A failed refresh is not fatal here; the existing token stays
        // usable until it actually expires.
        if let Err(e) = self.session.refresh_if_needed(false).await {
            warn!("token refresh before playlist scan failed: {}", e);
        }
        Ok(self.session.current_access_token().await?)
    }

    async fn scan(
        &self,
        token: &str,
        playlist_id: &str,
    ) -> Result<Vec<DuplicateCandidate>, DedupError> {
        let mut seen: Vec<PlaylistEntry> = Vec::new();
        let mut candidates = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = self
                .api
                .playlist_items_page(token, playlist_id, offset, self.page_limit)
                .await
                .map_err(DedupError::Scan)?;
            let count = page.items.len();

            for (index, slot) in page.items.iter().enumerate() {
                // Unresolvable entries still occupy a position but carry
                // nothing to compare.
                let Some(entry) = slot else { continue };
                // Local files have no stable remote identity.
                if entry.is_local {
                    continue;
                }
                let position = page.offset + index;
                if let Some(uri) = &entry.uri {
                    if seen.iter().any(|prev| is_probably_same(entry, prev)) {
                        candidates.push(DuplicateCandidate {
                            uri: uri.clone(),
                            position,
                        });
                    }
                }
                // Added even when it just matched, so a third occurrence
                // matches too.
                seen.push(entry.clone());
            }

            offset = page.offset + count;
            if count == 0 || offset >= page.total {
                break;
            }
        }

        info!(
            "found {} duplicate candidate(s) in playlist {}",
            candidates.len(),
            playlist_id
        );
        Ok(candidates)
    }

    async fn remove(
        &self,
        token: &str,
        playlist_id: &str,
        snapshot_id: &str,
        candidates: &[DuplicateCandidate],
    ) -> Result<RemovalSummary, DedupError> {
        let batches = chunk_batches(candidates, self.max_batch);
        let total = batches.len();
        for (index, batch) in batches.iter().enumerate() {
            if let Err(source) = self
                .api
                .remove_playlist_items(token, playlist_id, batch, snapshot_id)
                .await
            {
                return Err(DedupError::Removal {
                    batches_applied: index,
                    source,
                });
            }
            info!("applied removal batch {}/{}", index + 1, total);
        }
        Ok(RemovalSummary {
            removed: candidates.len(),
            batches_applied: total,
        })
    }
}

/// Clears the busy flag on every exit path, error and cancellation
/// included.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, DedupError> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DedupError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Two entries are probably the same item if their URIs match, or if they
/// are the same kind with identical name, identical first artist (or show)
/// and durations within `max(10s, 10% of the longer)`. Unknown durations
/// never match.
pub fn is_probably_same(a: &PlaylistEntry, b: &PlaylistEntry) -> bool {
    if let (Some(ua), Some(ub)) = (&a.uri, &b.uri) {
        if ua == ub {
            return true;
        }
    }
    if a.kind != b.kind {
        return false;
    }
    a.name == b.name && a.by == b.by && durations_close(a.duration_ms, b.duration_ms)
}

fn durations_close(a: Option<u64>, b: Option<u64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let hi = a.max(b);
            let lo = a.min(b);
            hi - lo <= 10_000.max(hi / 10)
        }
        _ => false,
    }
}

/// Split candidates into removal batches of at most `cap` positions,
/// preserving the original order and grouping positions per uri within
/// each batch.
fn chunk_batches(candidates: &[DuplicateCandidate], cap: usize) -> Vec<Vec<UriPositions>> {
    candidates
        .chunks(cap)
        .map(|chunk| {
            let mut batch: Vec<UriPositions> = Vec::new();
            for c in chunk {
                match batch.iter_mut().find(|b| b.uri == c.uri) {
                    Some(b) => b.positions.push(c.position),
                    None => batch.push(UriPositions {
                        uri: c.uri.clone(),
                        positions: vec![c.position],
                    }),
                }
            }
            batch
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;

    fn track(uri: Option<&str>, name: &str, artist: Option<&str>, ms: Option<u64>) -> PlaylistEntry {
        PlaylistEntry {
            uri: uri.map(String::from),
            kind: ItemKind::Track,
            name: name.into(),
            by: artist.map(String::from),
            duration_ms: ms,
            is_local: false,
        }
    }

    fn episode(name: &str, show: Option<&str>, ms: Option<u64>) -> PlaylistEntry {
        PlaylistEntry {
            uri: None,
            kind: ItemKind::Episode,
            name: name.into(),
            by: show.map(String::from),
            duration_ms: ms,
            is_local: false,
        }
    }

    #[test]
    fn same_uri_is_always_a_duplicate() {
        let a = track(Some("spotify:track:x"), "A", Some("One"), Some(1000));
        let b = track(Some("spotify:track:x"), "B", Some("Two"), Some(900_000));
        assert!(is_probably_same(&a, &b));
    }

    #[test]
    fn close_durations_match_far_durations_do_not() {
        let a = track(None, "Eclipse", Some("Pink Floyd"), Some(363_000));
        let b = track(None, "Eclipse", Some("Pink Floyd"), Some(368_500));
        assert!(is_probably_same(&a, &b));

        let c = track(None, "Eclipse", Some("Pink Floyd"), Some(420_000));
        assert!(!is_probably_same(&a, &c));
    }

    #[test]
    fn relative_tolerance_applies_to_long_items() {
        // 2h episodes 11 minutes apart: beyond 10s but within 10%.
        let a = episode("Ep 1", Some("Some Show"), Some(7_200_000));
        let b = episode("Ep 1", Some("Some Show"), Some(7_860_000));
        assert!(is_probably_same(&a, &b));
    }

    #[test]
    fn unknown_durations_never_match() {
        let a = track(None, "Song", Some("Artist"), None);
        let b = track(None, "Song", Some("Artist"), None);
        assert!(!is_probably_same(&a, &b));

        let c = track(None, "Song", Some("Artist"), Some(200_000));
        assert!(!is_probably_same(&a, &c));
    }

    #[test]
    fn differing_kinds_never_match() {
        let a = track(None, "Same Name", Some("Same By"), Some(100_000));
        let mut b = episode("Same Name", Some("Same By"), Some(100_000));
        assert!(!is_probably_same(&a, &b));
        b.kind = ItemKind::Track;
        assert!(is_probably_same(&a, &b));
    }

    #[test]
    fn chunking_caps_batches_and_groups_positions() {
        let candidates: Vec<DuplicateCandidate> = (0..250)
            .map(|i| DuplicateCandidate {
                uri: format!("spotify:track:{}", i % 3),
                position: i,
            })
            .collect();
        let batches = chunk_batches(&candidates, 100);
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            let positions: usize = batch.iter().map(|b| b.positions.len()).sum();
            assert!(positions <= 100);
        }
        let last: Vec<usize> = batches[2].iter().flat_map(|b| b.positions.clone()).collect();
        assert_eq!(last.len(), 50);
        assert!(last.contains(&249));
    }

    #[test]
    fn chunking_preserves_relative_order() {
        let candidates = vec![
            DuplicateCandidate { uri: "a".into(), position: 5 },
            DuplicateCandidate { uri: "b".into(), position: 9 },
            DuplicateCandidate { uri: "a".into(), position: 12 },
        ];
        let batches = chunk_batches(&candidates, 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].uri, "a");
        assert_eq!(batches[0][0].positions, vec![5, 12]);
        assert_eq!(batches[0][1].uri, "b");
        assert_eq!(batches[0][1].positions, vec![9]);
    }
}
