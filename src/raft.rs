use crate::cluster::ClusterRegistry;
use crate::message::{self, RaftMessage, Status};
use crate::state_machine::{KvStore, REQUEST_LOG_COMMAND};
use crate::storage::StableStorage;
use crate::{Address, LogEntry};
use anyhow::{bail, Result};
use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Sentinel term value that tells the background role tasks to exit, mirroring
/// the source's shutdown-on-SIGINT convention.
const SHUTDOWN_TERM: u64 = 0xDEAD;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub storage_dir: String,
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub rpc_timeout: Duration,
    pub retry_count: u32,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            storage_dir: "storage".to_string(),
            heartbeat_interval: Duration::from_secs(1),
            election_timeout_min: Duration::from_secs(8),
            election_timeout_max: Duration::from_secs(18),
            rpc_timeout: Duration::from_millis(500),
            retry_count: 5,
        }
    }
}

fn random_election_timeout(config: &RaftConfig) -> Duration {
    let span = config
        .election_timeout_max
        .saturating_sub(config.election_timeout_min)
        .as_millis() as u64;
    let jitter = if span == 0 { 0 } else { rand::thread_rng().gen_range(0..=span) };
    config.election_timeout_min + Duration::from_millis(jitter)
}

/// Only a `Leader` carries replication bookkeeping; modeling role as a tagged
/// union makes that a structural fact rather than a convention to remember.
#[derive(Debug)]
enum Role {
    Follower,
    Candidate,
    Leader(LeaderState),
}

#[derive(Debug, Default)]
struct LeaderState {
    sent_length: HashMap<Address, u64>,
    ack_length: HashMap<Address, u64>,
}

struct Volatile {
    role: Role,
    cluster: ClusterRegistry,
    election_deadline: Instant,
}

/// A single replica: owns its persistent state, its state machine, and its
/// view of cluster membership. Independently constructible so multiple
/// replicas can run in one process for tests.
pub struct RaftNode {
    pub address: Address,
    config: RaftConfig,
    storage: StableStorage,
    state_machine: Mutex<KvStore>,
    volatile: Mutex<Volatile>,
}

impl RaftNode {
    pub async fn new(address: Address, config: RaftConfig) -> Result<Arc<Self>> {
        let storage = StableStorage::open(&config.storage_dir, &address).await?;
        let snapshot = storage.snapshot().await;

        let mut kv = KvStore::new();
        for entry in snapshot.log.iter().take(snapshot.commit_length as usize) {
            kv.apply(&entry.command);
        }

        let election_deadline = Instant::now() + random_election_timeout(&config);
        let node = Arc::new(Self {
            address: address.clone(),
            config,
            storage,
            state_machine: Mutex::new(kv),
            volatile: Mutex::new(Volatile {
                role: Role::Follower,
                cluster: ClusterRegistry::bootstrap(address),
                election_deadline,
            }),
        });

        Ok(node)
    }

    /// Seed this replica as the sole initial member and leader.
    pub async fn bootstrap_as_leader(self: &Arc<Self>) {
        let mut volatile = self.volatile.lock().await;
        volatile.cluster = ClusterRegistry::bootstrap(self.address.clone());
        volatile.cluster.leader = Some(self.address.clone());
        volatile.role = Role::Leader(LeaderState::default());
        info!("{} initialized as sole leader", self.address);
    }

    /// Join an existing cluster by repeatedly calling `apply_membership`
    /// against `contact`, following `redirected` replies until the actual
    /// leader answers or the retry budget is exhausted.
    pub async fn join(self: &Arc<Self>, contact: Address) -> Result<()> {
        let mut target = contact;
        for _ in 0..self.config.retry_count {
            let request = RaftMessage::ApplyMembership { address: self.address.clone() };
            match message::call(&target, &request, self.config.rpc_timeout).await {
                Ok(RaftMessage::ApplyMembershipResponse { status: Status::Redirected, address, .. }) => {
                    info!("{} redirected to {address}", self.address);
                    target = address;
                }
                Ok(RaftMessage::ApplyMembershipResponse {
                    status: Status::Success,
                    address: leader_addr,
                    cluster_addr_list,
                    log,
                    ..
                }) => {
                    self.storage.with_state(|s| s.log = log).await?;
                    let mut volatile = self.volatile.lock().await;
                    volatile.cluster = ClusterRegistry::from_members(cluster_addr_list);
                    volatile.cluster.leader = Some(leader_addr.clone());
                    volatile.role = Role::Follower;
                    info!("{} joined cluster, leader is {leader_addr}", self.address);
                    return Ok(());
                }
                Ok(other) => bail!("unexpected reply to apply_membership: {other:?}"),
                Err(e) => {
                    warn!("{} didn't get a response from {target}, retrying: {e}", self.address);
                    tokio::time::sleep(self.config.heartbeat_interval).await;
                }
            }
        }
        bail!(
            "leader at {target} failed to respond {} times, aborting membership application",
            self.config.retry_count
        )
    }

    /// Spawn the election-timer and heartbeat-sender background tasks.
    pub async fn start(self: &Arc<Self>) {
        let election_node = Arc::clone(self);
        tokio::spawn(async move { election_node.run_election_timer().await });

        let heartbeat_node = Arc::clone(self);
        tokio::spawn(async move { heartbeat_node.run_heartbeat_sender().await });
    }

    pub async fn shutdown(&self) {
        let _ = self.storage.with_state(|s| s.current_term = SHUTDOWN_TERM).await;
    }

    async fn is_shutdown(&self) -> bool {
        self.storage.snapshot().await.current_term == SHUTDOWN_TERM
    }

    pub async fn is_leader(&self) -> bool {
        matches!(self.volatile.lock().await.role, Role::Leader(_))
    }

    pub async fn leader_addr(&self) -> Option<Address> {
        self.volatile.lock().await.cluster.leader.clone()
    }

    pub async fn log(&self) -> Vec<LogEntry> {
        self.storage.snapshot().await.log
    }

    pub async fn commit_length(&self) -> u64 {
        self.storage.snapshot().await.commit_length
    }

    pub async fn current_term(&self) -> u64 {
        self.storage.snapshot().await.current_term
    }

    // -- Election timer -------------------------------------------------------

    async fn run_election_timer(self: Arc<Self>) {
        loop {
            let timeout = random_election_timeout(&self.config);
            tokio::time::sleep(timeout).await;
            if self.is_shutdown().await {
                debug!("{} stopping election timer", self.address);
                return;
            }

            let should_elect = {
                let volatile = self.volatile.lock().await;
                matches!(volatile.role, Role::Follower | Role::Candidate)
                    && Instant::now() >= volatile.election_deadline
            };
            if should_elect {
                self.start_election().await;
            }
        }
    }

    fn new_election_deadline(&self) -> Instant {
        Instant::now() + random_election_timeout(&self.config)
    }

    async fn start_election(self: &Arc<Self>) {
        let (term, last_log_index, last_log_term, majority, peers) = {
            let mut volatile = self.volatile.lock().await;
            volatile.role = Role::Candidate;
            volatile.election_deadline = self.new_election_deadline();

            let term = self
                .storage
                .with_state(|s| {
                    s.current_term += 1;
                    s.voted_for = Some(self.address.clone());
                    s.current_term
                })
                .await
                .unwrap_or(0);

            let snapshot = self.storage.snapshot().await;
            let majority = volatile.cluster.majority();
            let peers: Vec<Address> = volatile.cluster.peers_excluding(&self.address).cloned().collect();
            (term, snapshot.last_log_index(), snapshot.last_log_term(), majority, peers)
        };

        info!("{} starting election for term {term}", self.address);

        let mut votes = 1usize; // voted for self
        if votes >= majority {
            self.become_leader(term).await;
            return;
        }

        let mut polls = tokio::task::JoinSet::new();
        for peer in peers {
            let node = Arc::clone(self);
            polls.spawn(async move {
                let request = RaftMessage::Vote {
                    candidate_addr: node.address.clone(),
                    election_term: term,
                    last_log_index,
                    last_log_term,
                };
                message::call(&peer, &request, node.config.rpc_timeout).await
            });
        }

        let mut became_leader = false;
        while let Some(joined) = polls.join_next().await {
            let Ok(Ok(response)) = joined else { continue };
            match response {
                RaftMessage::VoteResponse { status: Status::Success, election_term, .. }
                    if election_term == term && !became_leader =>
                {
                    votes += 1;
                    debug!("{} received a vote ({votes}/{majority})", self.address);
                    if votes >= majority {
                        became_leader = true;
                        self.become_leader(term).await;
                    }
                }
                RaftMessage::VoteResponse { election_term, .. } if election_term > term => {
                    self.step_down(election_term).await;
                    return;
                }
                _ => {}
            }
        }

        if !became_leader {
            info!("{} election for term {term} did not reach a majority", self.address);
        }
    }

    async fn become_leader(self: &Arc<Self>, term: u64) {
        let snapshot = self.storage.snapshot().await;
        let last_index = snapshot.last_log_index();

        let mut volatile = self.volatile.lock().await;
        let peers: Vec<Address> = volatile.cluster.peers_excluding(&self.address).cloned().collect();
        let mut leader_state = LeaderState::default();
        for peer in peers {
            leader_state.sent_length.insert(peer.clone(), last_index);
            leader_state.ack_length.insert(peer, 0);
        }
        leader_state.ack_length.insert(self.address.clone(), last_index);
        leader_state.sent_length.insert(self.address.clone(), last_index);
        volatile.role = Role::Leader(leader_state);
        volatile.cluster.leader = Some(self.address.clone());
        info!("{} became leader for term {term}", self.address);
        drop(volatile);

        self.send_heartbeats().await;
    }

    async fn step_down(&self, new_term: u64) {
        let _ = self
            .storage
            .with_state(|s| {
                if new_term > s.current_term {
                    s.current_term = new_term;
                    s.voted_for = None;
                }
            })
            .await;
        let mut volatile = self.volatile.lock().await;
        volatile.role = Role::Follower;
        info!("{} stepping down to follower for term {new_term}", self.address);
    }

    // -- Heartbeat / log replication (leader side) -----------------------------

    async fn run_heartbeat_sender(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.heartbeat_interval).await;
            if self.is_shutdown().await {
                debug!("{} stopping heartbeat sender", self.address);
                return;
            }
            if self.is_leader().await {
                self.send_heartbeats().await;
            }
        }
    }

    async fn send_heartbeats(self: &Arc<Self>) {
        let (term, leader_commit, peers, send_lengths) = {
            let volatile = self.volatile.lock().await;
            let Role::Leader(leader_state) = &volatile.role else { return };
            let snapshot = self.storage.snapshot().await;
            let peers: Vec<Address> = volatile.cluster.peers_excluding(&self.address).cloned().collect();
            let send_lengths: HashMap<Address, u64> = peers
                .iter()
                .map(|p| (p.clone(), leader_state.sent_length.get(p).copied().unwrap_or(snapshot.last_log_index())))
                .collect();
            (snapshot.current_term, snapshot.commit_length, peers, send_lengths)
        };

        if peers.is_empty() {
            return;
        }

        debug!("{} sending heartbeat to {} peers", self.address, peers.len());

        let mut tasks = tokio::task::JoinSet::new();
        for peer in peers {
            let node = Arc::clone(self);
            let prev_last_index = *send_lengths.get(&peer).unwrap_or(&0);
            tasks.spawn(async move {
                let result = node.send_heartbeat_to(&peer, term, prev_last_index, leader_commit).await;
                (peer, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((peer, Err(e))) = joined {
                debug!("{} heartbeat to {peer} failed: {e}", self.address);
            }
        }
    }

    async fn send_heartbeat_to(
        self: &Arc<Self>,
        peer: &Address,
        term: u64,
        prev_last_index: u64,
        leader_commit: u64,
    ) -> Result<()> {
        let (entries, prev_last_term) = {
            let snapshot = self.storage.snapshot().await;
            let prev_last_term = if prev_last_index > 0 {
                snapshot.log.get((prev_last_index - 1) as usize).map(|e| e.term).unwrap_or(0)
            } else {
                0
            };
            let entries = snapshot
                .log
                .get(prev_last_index as usize..)
                .map(|s| s.to_vec())
                .unwrap_or_default();
            (entries, prev_last_term)
        };

        let request = RaftMessage::Heartbeat {
            leader_addr: self.address.clone(),
            election_term: term,
            prev_last_index,
            prev_last_term,
            entries,
            leader_commit,
        };
        let response = message::call(peer, &request, self.config.rpc_timeout).await?;

        match response {
            RaftMessage::HeartbeatResponse { election_term, ack, sync: true, .. } => {
                if election_term > term {
                    self.step_down(election_term).await;
                    return Ok(());
                }
                {
                    let mut volatile = self.volatile.lock().await;
                    if let Role::Leader(leader_state) = &mut volatile.role {
                        leader_state.sent_length.insert(peer.clone(), ack);
                        leader_state.ack_length.insert(peer.clone(), ack);
                    }
                }
                if let Some(target) = self.leader_recompute_commit_target().await {
                    self.commit_up_to(target).await?;
                }
            }
            RaftMessage::HeartbeatResponse { election_term, sync: false, .. } => {
                if election_term > term {
                    self.step_down(election_term).await;
                } else {
                    let mut volatile = self.volatile.lock().await;
                    if let Role::Leader(leader_state) = &mut volatile.role {
                        let current = leader_state.sent_length.get(peer).copied().unwrap_or(prev_last_index);
                        leader_state.sent_length.insert(peer.clone(), current.saturating_sub(1));
                    }
                }
            }
            other => bail!("unexpected reply to heartbeat: {other:?}"),
        }
        Ok(())
    }

    /// Largest N such that a majority (including self) has `matchIndex >= N`
    /// and `log[N-1].term == currentTerm`; `None` if no such N exceeds the
    /// current commit length.
    async fn leader_recompute_commit_target(&self) -> Option<u64> {
        let volatile = self.volatile.lock().await;
        let Role::Leader(leader_state) = &volatile.role else { return None };
        let snapshot = self.storage.snapshot().await;
        let majority = volatile.cluster.majority();
        let last_index = snapshot.last_log_index();

        let mut best = snapshot.commit_length;
        for n in (snapshot.commit_length + 1)..=last_index {
            if snapshot.log[(n - 1) as usize].term != snapshot.current_term {
                continue;
            }
            let count = leader_state.ack_length.values().filter(|&&ack| ack >= n).count();
            if count >= majority {
                best = n;
            }
        }

        if best > snapshot.commit_length {
            Some(best)
        } else {
            None
        }
    }

    /// Advance `commit_length` to `target_commit` (capped at the log length)
    /// and apply the newly committed entries to the state machine, filling in
    /// each entry's `value`. Serialized by the state-machine lock so applies
    /// stay strictly ordered even if both the leader and follower paths race.
    async fn commit_up_to(&self, target_commit: u64) -> Result<()> {
        let mut kv = self.state_machine.lock().await;

        let range = self
            .storage
            .with_state(|s| {
                let capped = target_commit.min(s.last_log_index());
                if capped <= s.commit_length {
                    return None;
                }
                let from = s.commit_length;
                s.commit_length = capped;
                Some((from, capped))
            })
            .await?;

        let Some((from, to)) = range else { return Ok(()) };

        let snapshot = self.storage.snapshot().await;
        let mut computed = Vec::with_capacity((to - from) as usize);
        for i in from..to {
            let command = snapshot.log[i as usize].command.clone();
            let value = kv.apply(&command);
            computed.push((i as usize, value));
        }
        drop(kv);

        self.storage
            .with_state(|s| {
                for (i, value) in &computed {
                    if let Some(entry) = s.log.get_mut(*i) {
                        entry.value = value.clone();
                    }
                }
            })
            .await?;

        debug!("{} committed up to index {to}", self.address);
        Ok(())
    }

    // -- RPC dispatch -----------------------------------------------------------

    pub async fn handle_message(self: &Arc<Self>, message: RaftMessage) -> Option<RaftMessage> {
        match message {
            RaftMessage::Heartbeat {
                leader_addr,
                election_term,
                prev_last_index,
                prev_last_term,
                entries,
                leader_commit,
            } => Some(
                self.handle_heartbeat(leader_addr, election_term, prev_last_index, prev_last_term, entries, leader_commit)
                    .await,
            ),
            RaftMessage::Vote { candidate_addr, election_term, last_log_index, last_log_term } => {
                Some(self.handle_vote(candidate_addr, election_term, last_log_index, last_log_term).await)
            }
            RaftMessage::ApplyMembership { address } => Some(self.handle_apply_membership(address).await),
            RaftMessage::UpdateMembership { address } => Some(self.handle_update_membership(address).await),
            RaftMessage::Execute { command, .. } => Some(self.handle_execute(command).await),
            _ => None,
        }
    }

    async fn handle_heartbeat(
        self: &Arc<Self>,
        leader_addr: Address,
        term: u64,
        prev_last_index: u64,
        prev_last_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> RaftMessage {
        let before_term = self.storage.snapshot().await.current_term;
        if term < before_term {
            return RaftMessage::HeartbeatResponse {
                status: Status::Failed,
                election_term: before_term,
                ack: 0,
                sync: false,
                address: self.address.clone(),
                reason: "stale term".into(),
            };
        }

        {
            let mut volatile = self.volatile.lock().await;
            volatile.role = Role::Follower;
            volatile.cluster.leader = Some(leader_addr);
            volatile.election_deadline = self.new_election_deadline();
        }

        let accepted = self
            .storage
            .with_state(|s| {
                if term > s.current_term {
                    s.current_term = term;
                    s.voted_for = None;
                }
                let prev_ok = prev_last_index == 0
                    || (prev_last_index <= s.last_log_index()
                        && s.log[(prev_last_index - 1) as usize].term == prev_last_term);
                if !prev_ok {
                    return None;
                }
                for (offset, entry) in entries.iter().enumerate() {
                    let idx = prev_last_index as usize + offset;
                    if idx < s.log.len() {
                        if s.log[idx].term != entry.term {
                            s.log.truncate(idx);
                            s.log.push(entry.clone());
                        }
                    } else {
                        s.log.push(entry.clone());
                    }
                }
                let ack = prev_last_index + entries.len() as u64;
                Some((ack, s.current_term, s.last_log_index()))
            })
            .await
            .unwrap_or(None);

        match accepted {
            None => {
                let current_term = self.storage.snapshot().await.current_term;
                RaftMessage::HeartbeatResponse {
                    status: Status::Failed,
                    election_term: current_term,
                    ack: 0,
                    sync: false,
                    address: self.address.clone(),
                    reason: "log mismatch".into(),
                }
            }
            Some((ack, current_term, new_log_len)) => {
                if let Err(e) = self.commit_up_to(leader_commit.min(new_log_len)).await {
                    warn!("{} failed to apply committed entries: {e}", self.address);
                }
                RaftMessage::HeartbeatResponse {
                    status: Status::Success,
                    election_term: current_term,
                    ack,
                    sync: true,
                    address: self.address.clone(),
                    reason: String::new(),
                }
            }
        }
    }

    async fn handle_vote(
        &self,
        candidate_addr: Address,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    ) -> RaftMessage {
        let mut volatile = self.volatile.lock().await;
        let before_term = self.storage.snapshot().await.current_term;

        let (granted, current_term) = self
            .storage
            .with_state(|s| {
                if term > s.current_term {
                    s.current_term = term;
                    s.voted_for = None;
                }
                if term < s.current_term {
                    return (false, s.current_term);
                }
                let log_ok = last_log_term > s.last_log_term()
                    || (last_log_term == s.last_log_term() && last_log_index >= s.last_log_index());
                let can_vote = match &s.voted_for {
                    None => true,
                    Some(v) => *v == candidate_addr,
                };
                if can_vote && log_ok {
                    s.voted_for = Some(candidate_addr.clone());
                    (true, s.current_term)
                } else {
                    (false, s.current_term)
                }
            })
            .await
            .unwrap_or((false, before_term));

        if term > before_term {
            volatile.role = Role::Follower;
        }
        if granted {
            volatile.election_deadline = self.new_election_deadline();
            info!("{} granted vote to {candidate_addr} for term {term}", self.address);
        }

        RaftMessage::VoteResponse {
            status: if granted { Status::Success } else { Status::Failed },
            election_term: current_term,
            address: self.address.clone(),
            reason: if granted { String::new() } else { "vote denied".into() },
        }
    }

    async fn handle_apply_membership(self: &Arc<Self>, address: Address) -> RaftMessage {
        let mut volatile = self.volatile.lock().await;
        if !matches!(volatile.role, Role::Leader(_)) {
            let leader = volatile.cluster.leader.clone().unwrap_or_else(|| self.address.clone());
            return RaftMessage::ApplyMembershipResponse {
                status: Status::Redirected,
                address: leader,
                cluster_addr_list: vec![],
                log: vec![],
                reason: "not leader".into(),
            };
        }

        let already_present = volatile.cluster.contains(&address);
        if !already_present {
            volatile.cluster.add_member(address.clone());
            info!("{} accepted a new member: {address}", self.address);
        }

        let snapshot = self.storage.snapshot().await;
        let response = RaftMessage::ApplyMembershipResponse {
            status: Status::Success,
            address: self.address.clone(),
            cluster_addr_list: volatile.cluster.members().to_vec(),
            log: snapshot.log,
            reason: if already_present { "already in the cluster".into() } else { "success applying membership".into() },
        };

        if !already_present {
            let others: Vec<Address> = volatile
                .cluster
                .peers_excluding(&self.address)
                .filter(|peer| **peer != address)
                .cloned()
                .collect();
            drop(volatile);
            for peer in others {
                let node = Arc::clone(self);
                let new_member = address.clone();
                tokio::spawn(async move {
                    let request = RaftMessage::UpdateMembership { address: new_member };
                    if let Err(e) = message::call(&peer, &request, node.config.rpc_timeout).await {
                        debug!("{} failed to push membership update to {peer}: {e}", node.address);
                    }
                });
            }
        }

        response
    }

    async fn handle_update_membership(&self, address: Address) -> RaftMessage {
        let mut volatile = self.volatile.lock().await;
        volatile.cluster.add_member(address);
        RaftMessage::UpdateMembershipResponse {
            status: Status::Success,
            address: self.address.clone(),
            reason: String::new(),
        }
    }

    async fn handle_execute(self: &Arc<Self>, command: String) -> RaftMessage {
        if command == REQUEST_LOG_COMMAND {
            let snapshot = self.storage.snapshot().await;
            let data = serde_json::to_string(&snapshot.log).unwrap_or_default();
            return RaftMessage::ExecuteResponse {
                status: Status::Success,
                address: self.address.clone(),
                data,
                reason: String::new(),
            };
        }

        let (is_leader, leader) = {
            let volatile = self.volatile.lock().await;
            (matches!(volatile.role, Role::Leader(_)), volatile.cluster.leader.clone())
        };

        if !is_leader {
            return match leader {
                Some(addr) => RaftMessage::ExecuteResponse {
                    status: Status::Redirected,
                    address: addr,
                    data: String::new(),
                    reason: "not leader".into(),
                },
                None => RaftMessage::ExecuteResponse {
                    status: Status::Failed,
                    address: self.address.clone(),
                    data: String::new(),
                    reason: "no known leader".into(),
                },
            };
        }

        match self.propose(command).await {
            Ok(value) => RaftMessage::ExecuteResponse {
                status: Status::Success,
                address: self.address.clone(),
                data: value,
                reason: String::new(),
            },
            Err(e) => RaftMessage::ExecuteResponse {
                status: Status::Failed,
                address: self.address.clone(),
                data: String::new(),
                reason: e.to_string(),
            },
        }
    }

    /// Append `command` to the leader's log, attempt to commit it (with an
    /// immediate replication round rather than waiting for the next
    /// heartbeat), and return the applied value once committed.
    async fn propose(self: &Arc<Self>, command: String) -> Result<String> {
        let term = self.storage.snapshot().await.current_term;
        let entry = LogEntry { term, command, value: String::new() };
        let index = self
            .storage
            .with_state(|s| {
                s.log.push(entry.clone());
                s.last_log_index()
            })
            .await?;

        {
            let mut volatile = self.volatile.lock().await;
            if let Role::Leader(leader_state) = &mut volatile.role {
                leader_state.sent_length.insert(self.address.clone(), index);
                leader_state.ack_length.insert(self.address.clone(), index);
            }
        }

        if let Some(target) = self.leader_recompute_commit_target().await {
            self.commit_up_to(target).await?;
        }

        self.send_heartbeats().await;

        if let Some(target) = self.leader_recompute_commit_target().await {
            self.commit_up_to(target).await?;
        }

        let snapshot = self.storage.snapshot().await;
        let value = snapshot.log.get((index - 1) as usize).map(|e| e.value.clone()).unwrap_or_default();
        Ok(value)
    }
}
