//! Requirement resolution: which mission/title requirements track an action key

use std::collections::BTreeMap;
use tracing::debug;

use crate::model::{Requirement, Track};
use crate::storage::{StoreResult, StoreTx};

/// Every requirement of `track` whose key matches `key` exactly.
///
/// Zero matches is a normal outcome (nothing tracks this action yet) and
/// callers treat it as a no-op.
pub async fn requirements_for_key(
    tx: &mut dyn StoreTx,
    track: Track,
    key: &str,
) -> StoreResult<Vec<Requirement>> {
    let requirements = tx.requirements_by_key(track, key).await?;
    if requirements.is_empty() {
        debug!(%track, key, "No requirements track this action");
    }
    Ok(requirements)
}

/// Group requirements under their parent, in parent id order
pub fn group_by_parent(requirements: Vec<Requirement>) -> BTreeMap<i64, Vec<Requirement>> {
    let mut groups: BTreeMap<i64, Vec<Requirement>> = BTreeMap::new();
    for req in requirements {
        groups.entry(req.parent_id).or_default().push(req);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewRequirement;
    use crate::storage::{MemoryStore, Store};

    fn req(id: i64, parent_id: i64, key: &str) -> Requirement {
        Requirement {
            id,
            track: Track::Mission,
            parent_id,
            task: "Play".into(),
            key: key.into(),
            goal: 1,
        }
    }

    #[test]
    fn test_group_by_parent() {
        let groups = group_by_parent(vec![req(1, 20, "a"), req(2, 10, "a"), req(3, 20, "a")]);
        let parents: Vec<i64> = groups.keys().copied().collect();
        assert_eq!(parents, vec![10, 20]);
        assert_eq!(groups[&20].len(), 2);
    }

    #[test]
    fn test_group_empty() {
        assert!(group_by_parent(vec![]).is_empty());
    }

    #[tokio::test]
    async fn test_resolution_is_exact_and_per_track() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_requirement(Track::Mission, 1, &NewRequirement::new("Play", "play_game", 3))
            .await
            .unwrap();
        tx.insert_requirement(Track::Mission, 1, &NewRequirement::new("Buy", "play_game_2", 3))
            .await
            .unwrap();
        tx.insert_requirement(Track::Title, 2, &NewRequirement::new("Play", "play_game", 3))
            .await
            .unwrap();

        let missions = requirements_for_key(tx.as_mut(), Track::Mission, "play_game")
            .await
            .unwrap();
        assert_eq!(missions.len(), 1);
        assert_eq!(missions[0].key, "play_game");

        let titles = requirements_for_key(tx.as_mut(), Track::Title, "play_game")
            .await
            .unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].track, Track::Title);

        assert!(requirements_for_key(tx.as_mut(), Track::Mission, "write_review")
            .await
            .unwrap()
            .is_empty());
    }
}
