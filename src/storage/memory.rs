//! In-process store
//!
//! Keeps every table in one `MemoryState` behind an async mutex. A
//! transaction holds the mutex for its whole lifetime and writes in place,
//! journaling the previous value of every row it touches. Commit drops the
//! journal; dropping the transaction replays it backwards. Transactions
//! are therefore fully serialized, which gives the same guarantees the
//! Postgres row locks give, only coarser. Ids are not reused after a
//! rollback, like a Postgres sequence.
//!
//! Faults can be injected to exercise rollback and best-effort paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::repository::{Store, StoreError, StoreResult, StoreTx};
use crate::model::*;

/// Operation that should fail with [`StoreError::Unavailable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    SaveProgress,
    SaveCompletion,
    SaveWallet,
    SaveLevel,
    /// Progress reset of one specific mission
    ResetMission(i64),
    Commit,
}

type ProgressKey = (Track, i64, i64);

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    users: BTreeMap<i64, User>,
    wallets: BTreeMap<i64, Wallet>,
    levels: BTreeMap<i64, Level>,
    missions: BTreeMap<i64, Mission>,
    titles: BTreeMap<i64, Title>,
    /// Both tracks share one id space
    requirements: BTreeMap<i64, Requirement>,
    /// (track, user, requirement)
    progress: BTreeMap<ProgressKey, Progress>,
    /// (track, user, parent)
    completions: BTreeMap<ProgressKey, Completion>,
    /// (user, title)
    enabled_titles: BTreeSet<(i64, i64)>,
    /// (user, mission)
    assignments: BTreeSet<(i64, i64)>,
    rewards: BTreeMap<i64, Reward>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn requirement_ids(&self, track: Track, parent_id: i64) -> BTreeSet<i64> {
        self.requirements
            .values()
            .filter(|r| r.track == track && r.parent_id == parent_id)
            .map(|r| r.id)
            .collect()
    }

    fn remove_requirements(&mut self, track: Track, parent_id: i64, journal: &mut Vec<Undo>) {
        let ids = self.requirement_ids(track, parent_id);
        for id in &ids {
            if let Some(req) = self.requirements.remove(id) {
                journal.push(Undo::Requirement(*id, Some(req)));
            }
        }
        for (key, row) in drain_where(&mut self.progress, |(t, _, req), _| {
            *t == track && ids.contains(req)
        }) {
            journal.push(Undo::Progress(key, Some(row)));
        }
    }
}

/// Value a row had before the transaction touched it (`None`: absent)
#[derive(Debug)]
enum Undo {
    User(i64, Option<User>),
    Wallet(i64, Option<Wallet>),
    Level(i64, Option<Level>),
    Mission(i64, Option<Mission>),
    Title(i64, Option<Title>),
    Requirement(i64, Option<Requirement>),
    Progress(ProgressKey, Option<Progress>),
    Completion(ProgressKey, Option<Completion>),
    EnabledTitle((i64, i64), bool),
    Assignment((i64, i64), bool),
    Reward(i64, Option<Reward>),
}

impl Undo {
    fn apply(self, state: &mut MemoryState) {
        match self {
            Undo::User(k, old) => restore(&mut state.users, k, old),
            Undo::Wallet(k, old) => restore(&mut state.wallets, k, old),
            Undo::Level(k, old) => restore(&mut state.levels, k, old),
            Undo::Mission(k, old) => restore(&mut state.missions, k, old),
            Undo::Title(k, old) => restore(&mut state.titles, k, old),
            Undo::Requirement(k, old) => restore(&mut state.requirements, k, old),
            Undo::Progress(k, old) => restore(&mut state.progress, k, old),
            Undo::Completion(k, old) => restore(&mut state.completions, k, old),
            Undo::EnabledTitle(k, was) => restore_member(&mut state.enabled_titles, k, was),
            Undo::Assignment(k, was) => restore_member(&mut state.assignments, k, was),
            Undo::Reward(k, old) => restore(&mut state.rewards, k, old),
        }
    }
}

fn restore<K: Ord, V>(table: &mut BTreeMap<K, V>, key: K, old: Option<V>) {
    match old {
        Some(row) => {
            table.insert(key, row);
        }
        None => {
            table.remove(&key);
        }
    }
}

fn restore_member<K: Ord>(set: &mut BTreeSet<K>, key: K, was: bool) {
    if was {
        set.insert(key);
    } else {
        set.remove(&key);
    }
}

/// Remove and return every row matching `pred`
fn drain_where<K: Ord + Copy, V>(
    table: &mut BTreeMap<K, V>,
    pred: impl Fn(&K, &V) -> bool,
) -> Vec<(K, V)> {
    let keys: Vec<K> = table
        .iter()
        .filter(|(k, v)| pred(*k, *v))
        .map(|(k, _)| *k)
        .collect();
    keys.into_iter()
        .filter_map(|k| table.remove(&k).map(|v| (k, v)))
        .collect()
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<MemoryState>>,
    faults: Arc<Mutex<HashSet<Fault>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        self.faults.lock().remove(&fault);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            journal: Vec::new(),
            faults: self.faults.clone(),
        }))
    }
}

pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    journal: Vec<Undo>,
    faults: Arc<Mutex<HashSet<Fault>>>,
}

impl MemoryTx {
    fn state(&mut self) -> StoreResult<&mut MemoryState> {
        self.guard.as_deref_mut().ok_or(StoreError::Finished)
    }

    /// State plus the journal its writes must be recorded in
    fn parts(&mut self) -> StoreResult<(&mut MemoryState, &mut Vec<Undo>)> {
        match self.guard.as_deref_mut() {
            Some(state) => Ok((state, &mut self.journal)),
            None => Err(StoreError::Finished),
        }
    }

    fn check(&self, fault: Fault) -> StoreResult<()> {
        if self.faults.lock().contains(&fault) {
            return Err(StoreError::Unavailable(format!("{:?}", fault)));
        }
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(state) = self.guard.as_deref_mut() {
            for undo in self.journal.drain(..).rev() {
                undo.apply(state);
            }
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn create_user(&mut self, username: &str) -> StoreResult<i64> {
        let (state, journal) = self.parts()?;
        if state.users.values().any(|u| u.username == username) {
            return Err(StoreError::Constraint(format!(
                "username '{}' already taken",
                username
            )));
        }
        let id = state.next_id();
        state.users.insert(
            id,
            User {
                id,
                username: username.to_string(),
            },
        );
        state.wallets.insert(id, Wallet::new(id));
        state.levels.insert(id, Level::new(id));
        journal.extend([Undo::User(id, None), Undo::Wallet(id, None), Undo::Level(id, None)]);
        Ok(id)
    }

    async fn user_exists(&mut self, user_id: i64) -> StoreResult<bool> {
        Ok(self.state()?.users.contains_key(&user_id))
    }

    async fn all_user_ids(&mut self) -> StoreResult<Vec<i64>> {
        Ok(self.state()?.users.keys().copied().collect())
    }

    async fn insert_mission(
        &mut self,
        mission: &NewMission,
        reset_time: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let (state, journal) = self.parts()?;
        let id = state.next_id();
        state.missions.insert(
            id,
            Mission {
                id,
                text: mission.text.clone(),
                coins: mission.coins,
                experience: mission.experience,
                status: MissionStatus::Available,
                frequency: mission.frequency,
                for_all: mission.for_all,
                reset_time,
            },
        );
        journal.push(Undo::Mission(id, None));
        Ok(id)
    }

    async fn get_mission(&mut self, mission_id: i64) -> StoreResult<Option<Mission>> {
        Ok(self.state()?.missions.get(&mission_id).cloned())
    }

    async fn lock_mission(&mut self, mission_id: i64) -> StoreResult<Option<Mission>> {
        self.get_mission(mission_id).await
    }

    async fn set_mission_status(
        &mut self,
        mission_id: i64,
        status: MissionStatus,
    ) -> StoreResult<bool> {
        let (state, journal) = self.parts()?;
        match state.missions.get_mut(&mission_id) {
            Some(mission) => {
                journal.push(Undo::Mission(mission_id, Some(mission.clone())));
                mission.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_reset_time(&mut self, mission_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let (state, journal) = self.parts()?;
        if let Some(mission) = state.missions.get_mut(&mission_id) {
            journal.push(Undo::Mission(mission_id, Some(mission.clone())));
            mission.reset_time = Some(at);
        }
        Ok(())
    }

    async fn due_missions(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Mission>> {
        Ok(self
            .state()?
            .missions
            .values()
            .filter(|m| m.is_due(now))
            .cloned()
            .collect())
    }

    async fn delete_mission(&mut self, mission_id: i64) -> StoreResult<bool> {
        let (state, journal) = self.parts()?;
        let Some(mission) = state.missions.remove(&mission_id) else {
            return Ok(false);
        };
        journal.push(Undo::Mission(mission_id, Some(mission)));

        state.remove_requirements(Track::Mission, mission_id, journal);
        for (key, row) in drain_where(&mut state.completions, |(t, _, parent), _| {
            *t == Track::Mission && *parent == mission_id
        }) {
            journal.push(Undo::Completion(key, Some(row)));
        }
        let assigned: Vec<(i64, i64)> = state
            .assignments
            .iter()
            .filter(|(_, m)| *m == mission_id)
            .copied()
            .collect();
        for key in assigned {
            state.assignments.remove(&key);
            journal.push(Undo::Assignment(key, true));
        }
        for (id, row) in drain_where(&mut state.rewards, |_, r| {
            r.source == RewardSource::Mission(mission_id)
        }) {
            journal.push(Undo::Reward(id, Some(row)));
        }
        Ok(true)
    }

    async fn insert_title(&mut self, title: &NewTitle) -> StoreResult<i64> {
        let (state, journal) = self.parts()?;
        let id = state.next_id();
        state.titles.insert(
            id,
            Title {
                id,
                name: title.name.clone(),
                description: title.description.clone(),
            },
        );
        journal.push(Undo::Title(id, None));
        Ok(id)
    }

    async fn get_title(&mut self, title_id: i64) -> StoreResult<Option<Title>> {
        Ok(self.state()?.titles.get(&title_id).cloned())
    }

    async fn delete_title(&mut self, title_id: i64) -> StoreResult<bool> {
        let (state, journal) = self.parts()?;
        let Some(title) = state.titles.remove(&title_id) else {
            return Ok(false);
        };
        journal.push(Undo::Title(title_id, Some(title)));

        state.remove_requirements(Track::Title, title_id, journal);
        for (key, row) in drain_where(&mut state.completions, |(t, _, parent), _| {
            *t == Track::Title && *parent == title_id
        }) {
            journal.push(Undo::Completion(key, Some(row)));
        }
        let enabled: Vec<(i64, i64)> = state
            .enabled_titles
            .iter()
            .filter(|(_, t)| *t == title_id)
            .copied()
            .collect();
        for key in enabled {
            state.enabled_titles.remove(&key);
            journal.push(Undo::EnabledTitle(key, true));
        }
        for (id, row) in drain_where(&mut state.rewards, |_, r| {
            r.source == RewardSource::Title(title_id) || r.grant == Rewardable::Title { title_id }
        }) {
            journal.push(Undo::Reward(id, Some(row)));
        }
        Ok(true)
    }

    async fn insert_requirement(
        &mut self,
        track: Track,
        parent_id: i64,
        requirement: &NewRequirement,
    ) -> StoreResult<i64> {
        let (state, journal) = self.parts()?;
        let id = state.next_id();
        state.requirements.insert(
            id,
            Requirement {
                id,
                track,
                parent_id,
                task: requirement.task.clone(),
                key: requirement.key.clone(),
                goal: requirement.goal,
            },
        );
        journal.push(Undo::Requirement(id, None));
        Ok(id)
    }

    async fn requirements_by_key(
        &mut self,
        track: Track,
        key: &str,
    ) -> StoreResult<Vec<Requirement>> {
        Ok(self
            .state()?
            .requirements
            .values()
            .filter(|r| r.track == track && r.key == key)
            .cloned()
            .collect())
    }

    async fn requirements_of(
        &mut self,
        track: Track,
        parent_id: i64,
    ) -> StoreResult<Vec<Requirement>> {
        Ok(self
            .state()?
            .requirements
            .values()
            .filter(|r| r.track == track && r.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn lock_progress(
        &mut self,
        track: Track,
        user_id: i64,
        requirement_id: i64,
    ) -> StoreResult<Progress> {
        let (state, journal) = self.parts()?;
        let key = (track, user_id, requirement_id);
        if let Some(row) = state.progress.get(&key) {
            return Ok(row.clone());
        }
        let row = Progress::new(track, user_id, requirement_id);
        state.progress.insert(key, row.clone());
        journal.push(Undo::Progress(key, None));
        Ok(row)
    }

    async fn save_progress(&mut self, progress: &Progress) -> StoreResult<()> {
        self.check(Fault::SaveProgress)?;
        let (state, journal) = self.parts()?;
        let key = (progress.track, progress.user_id, progress.requirement_id);
        let old = state.progress.insert(key, progress.clone());
        journal.push(Undo::Progress(key, old));
        Ok(())
    }

    async fn progress_of(
        &mut self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<Vec<Progress>> {
        let state = self.state()?;
        let ids = state.requirement_ids(track, parent_id);
        Ok(ids
            .iter()
            .filter_map(|req| state.progress.get(&(track, user_id, *req)).cloned())
            .collect())
    }

    async fn reset_mission_progress(
        &mut self,
        mission_id: i64,
        user_ids: &[i64],
    ) -> StoreResult<u64> {
        self.check(Fault::ResetMission(mission_id))?;
        let (state, journal) = self.parts()?;
        let ids = state.requirement_ids(Track::Mission, mission_id);
        let users: HashSet<i64> = user_ids.iter().copied().collect();
        let mut touched = 0;
        for (&(track, user, req), progress) in state.progress.iter_mut() {
            if track == Track::Mission && ids.contains(&req) && users.contains(&user) {
                journal.push(Undo::Progress((track, user, req), Some(progress.clone())));
                progress.reset();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn lock_completion(
        &mut self,
        track: Track,
        user_id: i64,
        parent_id: i64,
    ) -> StoreResult<Completion> {
        let (state, journal) = self.parts()?;
        let key = (track, user_id, parent_id);
        if let Some(row) = state.completions.get(&key) {
            return Ok(row.clone());
        }
        let row = Completion::new(track, user_id, parent_id);
        state.completions.insert(key, row.clone());
        journal.push(Undo::Completion(key, None));
        Ok(row)
    }

    async fn save_completion(&mut self, completion: &Completion) -> StoreResult<()> {
        self.check(Fault::SaveCompletion)?;
        let (state, journal) = self.parts()?;
        let key = (completion.track, completion.user_id, completion.parent_id);
        let old = state.completions.insert(key, completion.clone());
        journal.push(Undo::Completion(key, old));
        Ok(())
    }

    async fn mission_participants(&mut self, mission_id: i64) -> StoreResult<Vec<i64>> {
        Ok(self
            .state()?
            .completions
            .keys()
            .filter(|(t, _, parent)| *t == Track::Mission && *parent == mission_id)
            .map(|(_, user, _)| *user)
            .collect())
    }

    async fn reset_mission_completions(
        &mut self,
        mission_id: i64,
        user_ids: &[i64],
    ) -> StoreResult<u64> {
        let (state, journal) = self.parts()?;
        let users: HashSet<i64> = user_ids.iter().copied().collect();
        let mut touched = 0;
        for (&(track, user, parent), completion) in state.completions.iter_mut() {
            if track == Track::Mission && parent == mission_id && users.contains(&user) {
                journal.push(Undo::Completion((track, user, parent), Some(completion.clone())));
                completion.reset();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn user_titles(&mut self, user_id: i64) -> StoreResult<Vec<UserTitle>> {
        let state = self.state()?;
        Ok(state
            .completions
            .values()
            .filter(|c| c.track == Track::Title && c.user_id == user_id)
            .map(|c| UserTitle {
                user_id,
                title_id: c.parent_id,
                completed: c.completed,
                enabled: state.enabled_titles.contains(&(user_id, c.parent_id)),
                last_completed_at: c.last_completed_at,
            })
            .collect())
    }

    async fn set_title_enabled(
        &mut self,
        user_id: i64,
        title_id: i64,
        enabled: bool,
    ) -> StoreResult<()> {
        let (state, journal) = self.parts()?;
        let key = (user_id, title_id);
        let was = if enabled {
            !state.enabled_titles.insert(key)
        } else {
            state.enabled_titles.remove(&key)
        };
        if was != enabled {
            journal.push(Undo::EnabledTitle(key, was));
        }
        Ok(())
    }

    async fn assign_mission(&mut self, user_id: i64, mission_id: i64) -> StoreResult<bool> {
        let (state, journal) = self.parts()?;
        let key = (user_id, mission_id);
        let created = state.assignments.insert(key);
        if created {
            journal.push(Undo::Assignment(key, false));
        }
        Ok(created)
    }

    async fn is_assigned(&mut self, user_id: i64, mission_id: i64) -> StoreResult<bool> {
        Ok(self.state()?.assignments.contains(&(user_id, mission_id)))
    }

    async fn insert_reward(
        &mut self,
        source: RewardSource,
        grant: &Rewardable,
    ) -> StoreResult<i64> {
        let (state, journal) = self.parts()?;
        let id = state.next_id();
        state.rewards.insert(
            id,
            Reward {
                id: Some(id),
                source,
                grant: *grant,
            },
        );
        journal.push(Undo::Reward(id, None));
        Ok(id)
    }

    async fn rewards_for(&mut self, source: RewardSource) -> StoreResult<Vec<Reward>> {
        Ok(self
            .state()?
            .rewards
            .values()
            .filter(|r| r.source == source)
            .cloned()
            .collect())
    }

    async fn lock_wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>> {
        Ok(self.state()?.wallets.get(&user_id).cloned())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> StoreResult<()> {
        self.check(Fault::SaveWallet)?;
        let (state, journal) = self.parts()?;
        let old = state.wallets.insert(wallet.user_id, wallet.clone());
        journal.push(Undo::Wallet(wallet.user_id, old));
        Ok(())
    }

    async fn lock_level(&mut self, user_id: i64) -> StoreResult<Option<Level>> {
        Ok(self.state()?.levels.get(&user_id).cloned())
    }

    async fn save_level(&mut self, level: &Level) -> StoreResult<()> {
        self.check(Fault::SaveLevel)?;
        let (state, journal) = self.parts()?;
        let old = state.levels.insert(level.user_id, level.clone());
        journal.push(Undo::Level(level.user_id, old));
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.check(Fault::Commit)?;
        if self.guard.is_none() {
            return Err(StoreError::Finished);
        }
        self.journal.clear();
        self.guard = None;
        Ok(())
    }
}
