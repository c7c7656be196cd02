use crate::*;
use color_print::cformat;
use futures::future::join_all;
use rand::rngs::SmallRng;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch, Mutex, MutexGuard, Notify},
    task::{JoinError, JoinSet},
    time,
};
use tracing::{debug, error, info, warn};

/// Mutable protocol state of one peer, guarded by a single lock.
#[derive(Debug)]
pub struct PeerState {
    token: Option<Token>,
    stopped: bool,
    stopped_anchor: PeerId,
    wants_access: bool,
    completion: CompletionSet,
}

impl PeerState {
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Circulation may currently be paused here.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// The peer that last asked this one to let it pause.
    pub fn stopped_anchor(&self) -> PeerId {
        self.stopped_anchor
    }

    pub fn wants_access(&self) -> bool {
        self.wants_access
    }

    pub fn completion(&self) -> &CompletionSet {
        &self.completion
    }

    /// Grants recorded on the token, if this peer holds it.
    pub fn grants(&self) -> Option<u32> {
        self.token.as_ref().map(|token| token.grants)
    }
}

/// Work that must not block the handler that triggers it.
#[derive(Debug)]
enum Outbound {
    /// Act on a token that has just been received or resumed.
    Process,
    /// Hand the token to the successor.
    Handoff(Token),
    /// Tell every other peer that the quota is complete.
    Broadcast,
}

/// What a finished background task did.
#[derive(Debug)]
enum Outcome {
    Processed,
    HandedOff,
    Broadcast,
}

/// A peer of the ring: owns the protocol state and answers the remote calls.
pub struct Peer {
    id: PeerId,
    successor: PeerId,
    ring: Ring,
    config: ProtocolConfig,
    client: Client,
    critical: Arc<dyn CriticalSection>,
    state: Mutex<PeerState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    granted: Notify,
    finished: watch::Sender<bool>,
}

impl Peer {
    /// Creates the peer and the dispatcher that runs its background work.
    ///
    /// Every peer starts paused, anchored on the initial holder, which is the
    /// only one that starts with the token.
    pub fn new(
        id: PeerId,
        ring: Ring,
        config: ProtocolConfig,
        transport: Arc<dyn Transport>,
        critical: Arc<dyn CriticalSection>,
    ) -> Result<(Arc<Self>, Dispatcher)> {
        if !ring.contains(id) {
            return Err(Error::UnknownPeer(id));
        }

        let initial_holder = ring.initial_holder();
        let state = PeerState {
            token: (id == initial_holder).then(Token::new),
            stopped: true,
            stopped_anchor: initial_holder,
            wants_access: false,
            completion: CompletionSet::new(&ring),
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = watch::channel(false);

        let peer = Arc::new(Self {
            id,
            successor: ring.successor(id),
            client: Client::new(transport, config.rpc_timeout),
            ring,
            config,
            critical,
            state: Mutex::new(state),
            outbound: outbound_tx,
            granted: Notify::new(),
            finished: finished_tx,
        });

        let dispatcher = Dispatcher {
            peer: Arc::clone(&peer),
            outbound: outbound_rx,
            finished: finished_rx,
            tasks: JoinSet::new(),
        };

        Ok((peer, dispatcher))
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn successor(&self) -> PeerId {
        self.successor
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Locks the state, e.g. to inspect it.
    pub async fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().await
    }

    /// Locks the state only if nobody else holds it.
    pub fn try_state(&self) -> Option<MutexGuard<'_, PeerState>> {
        self.state.try_lock().ok()
    }

    /// Resolves once every peer of the ring is known to be complete.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    /// Serves one inbound call.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GiveToken(token) => {
                self.give_token(token).await;
                Response::Ack
            }
            Request::Done(from) => {
                self.done(from).await;
                Response::Ack
            }
            Request::StopPassingRequest(requester) => Response::StopPassing {
                allow_stop: self.stop_passing_request(requester).await,
            },
            Request::StartPassing => {
                self.start_passing().await;
                Response::Ack
            }
        }
    }

    /// Takes possession of `token` and acknowledges at once; what to do with
    /// it is decided by a separate task.
    pub async fn give_token(&self, token: Token) {
        let mut state = self.state.lock().await;

        if state.token.is_some() {
            error!(peer = %self.id, "received a second token, dropping it");
            return;
        }

        info!(
            "{}",
            cformat!(
                "Got the <yellow, bold>token</yellow, bold> ({} grants so far).",
                token.grants
            )
        );
        state.token = Some(token);
        state.stopped = false;
        self.schedule(Outbound::Process);
    }

    /// Marks `from` complete, echoing the notice the first time this peer learns of it.
    pub async fn done(&self, from: PeerId) {
        let mut state = self.state.lock().await;

        if !state.completion.mark(from) && !state.completion.is_complete(from) {
            warn!(peer = %self.id, %from, "completion notice from an unknown peer");
        }
        self.complete(&mut state);
    }

    /// Votes on whether `requester` may pause circulation.
    ///
    /// `wants_access` is read under the state lock. Every answer records the
    /// requester as the anchor; only a consent marks circulation as possibly paused.
    pub async fn stop_passing_request(&self, requester: PeerId) -> bool {
        let mut state = self.state.lock().await;
        let allow_stop = !state.wants_access;

        state.stopped_anchor = requester;
        if allow_stop {
            state.stopped = true;
        }

        debug!(peer = %self.id, %requester, allow_stop, "answered stop request");
        allow_stop
    }

    /// Wakes this peer if it is holding the token while paused; otherwise a no-op.
    pub async fn start_passing(&self) {
        let mut state = self.state.lock().await;

        if state.token.is_some() && state.stopped {
            info!(peer = %self.id, "received pass request");
            state.stopped = false;
            self.schedule(Outbound::Process);
        }
    }

    /// Raises this peer's intent to enter the critical section.
    ///
    /// If circulation may be paused, either resumes it here or asks the anchor
    /// to resume.
    pub async fn request_access(&self) -> Result<()> {
        let anchor = {
            let mut state = self.state.lock().await;

            if state.completion.is_complete(self.id) {
                return Ok(());
            }

            state.wants_access = true;
            info!(peer = %self.id, "wants access");

            if !state.stopped {
                return Ok(());
            }
            if state.token.is_some() {
                state.stopped = false;
                self.schedule(Outbound::Process);
                return Ok(());
            }
            state.stopped_anchor
        };

        if anchor == self.id {
            return Ok(());
        }

        info!(peer = %self.id, %anchor, "requested passing");
        self.client.start_passing(anchor).await
    }

    /// Decides what to do with a token that is held and not paused: enter the
    /// critical section if wanted, then either pause, terminate or pass it on.
    async fn process_token(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.stopped || state.completion.is_complete(self.id) {
            return;
        }
        let Some(token) = state.token.as_mut() else {
            return;
        };

        if !state.wants_access {
            self.pass_token(state);
            return;
        }
        if token.exhausted(self.config.quota) {
            warn!(peer = %self.id, "quota already reached, holding the token");
            return;
        }

        info!(
            "{}",
            cformat!(
                "Peer <bold>{}</bold> is accessing the critical section.",
                self.id
            )
        );
        // Only a completed access counts towards the quota.
        if let Err(e) = self.critical.access(self.id) {
            error!(peer = %self.id, "critical section failed: {e}");
            self.pass_token(state);
            return;
        }
        let grants = token.grant();
        state.wants_access = false;
        info!(peer = %self.id, grants, quota = self.config.quota, "access granted");

        if grants >= self.config.quota {
            info!(peer = %self.id, "quota reached");
            self.complete(state);
            return;
        }
        self.granted.notify_one();

        if self.negotiate_pause().await {
            info!("{}", cformat!("Pausing with the <yellow, bold>token</yellow, bold>."));
            state.stopped = true;
        } else {
            self.pass_token(state);
        }
    }

    /// Polls every other peer at once; pausing needs every single one to agree.
    ///
    /// A peer that cannot be reached does not block the pause.
    async fn negotiate_pause(&self) -> bool {
        let polls = self.ring.others(self.id).map(|other| async move {
            (other, self.client.stop_passing_request(other, self.id).await)
        });

        let mut allowed = true;
        for (other, vote) in join_all(polls).await {
            match vote {
                Ok(true) => {}
                Ok(false) => {
                    debug!(peer = %self.id, %other, "not allowed to stop");
                    allowed = false;
                }
                Err(e) => warn!(peer = %self.id, %other, "stop request failed: {e}"),
            }
        }
        allowed
    }

    /// Gives up the token before the handoff call is issued.
    fn pass_token(&self, state: &mut PeerState) {
        if let Some(token) = state.token.take() {
            state.stopped = false;
            self.schedule(Outbound::Handoff(token));
        }
    }

    /// Marks this peer complete, broadcasting the first time.
    fn complete(&self, state: &mut PeerState) {
        if state.completion.mark(self.id) {
            self.schedule(Outbound::Broadcast);
        }
        if state.completion.all_complete() {
            info!(peer = %self.id, "every peer is done");
            self.finished.send_replace(true);
        }
    }

    fn schedule(&self, outbound: Outbound) {
        if let Err(mpsc::error::SendError(outbound)) = self.outbound.send(outbound) {
            error!(peer = %self.id, ?outbound, "dispatcher is gone, dropping work");
        }
    }

    async fn hand_off(&self, token: Token) -> Result<()> {
        let to = self.successor;
        self.client
            .give_token(to, token)
            .await
            .map_err(|source| Error::Handoff {
                to,
                source: Box::new(source),
            })?;

        info!(
            "{}",
            cformat!("Passed the <yellow, bold>token</yellow, bold> to <bold>{to}</bold>.")
        );
        Ok(())
    }

    async fn broadcast_done(&self) {
        let notices = self
            .ring
            .others(self.id)
            .map(|other| async move { (other, self.client.done(other, self.id).await) });

        for (other, result) in join_all(notices).await {
            if let Err(e) = result {
                warn!(peer = %self.id, %other, "completion notice failed: {e}");
            }
        }
    }

    /// Background task that keeps raising the intent to access after random
    /// delays, waiting for each access to be granted before the next one.
    pub async fn run_demand(self: Arc<Self>, mut poisson: Poisson<SmallRng>) {
        let mut finished = self.finished();

        loop {
            tokio::select! {
                _ = time::sleep(poisson.next_delay()) => {}
                _ = async { finished.wait_for(|done| *done).await.map(|_| ()) } => break,
            }

            if let Err(e) = self.request_access().await {
                warn!(peer = %self.id, "couldn't ask for the token: {e}");
            }

            tokio::select! {
                _ = self.granted.notified() => {}
                _ = async { finished.wait_for(|done| *done).await.map(|_| ()) } => break,
            }
        }
        debug!(peer = %self.id, "demand stopped");
    }
}

/// Counts of the background work a dispatcher ran.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub handoffs: usize,
    pub failed_handoffs: usize,
    pub broadcasts: usize,
    pub processed: usize,
}

impl DispatchReport {
    fn record(&mut self, joined: std::result::Result<Result<Outcome>, JoinError>) {
        match joined {
            Ok(Ok(Outcome::Processed)) => self.processed += 1,
            Ok(Ok(Outcome::HandedOff)) => self.handoffs += 1,
            Ok(Ok(Outcome::Broadcast)) => self.broadcasts += 1,
            Ok(Err(e)) => {
                // The token is not reclaimed: the successor may have taken it.
                error!("{e}");
                self.failed_handoffs += 1;
            }
            Err(e) => error!("background task failed: {e}"),
        }
    }
}

/// The main loop of a peer: runs handoffs, completion broadcasts and token
/// processing as tasks, until the whole ring is complete.
pub struct Dispatcher {
    peer: Arc<Peer>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    finished: watch::Receiver<bool>,
    tasks: JoinSet<Result<Outcome>>,
}

impl Dispatcher {
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Runs until every peer is complete, then waits for the outstanding tasks.
    pub async fn run(mut self) -> DispatchReport {
        let mut report = DispatchReport::default();

        loop {
            tokio::select! {
                Some(outbound) = self.outbound.recv() => self.dispatch(outbound),
                Some(joined) = self.tasks.join_next() => report.record(joined),
                _ = async { self.finished.wait_for(|done| *done).await.map(|_| ()) } => break,
            }
        }

        while let Ok(outbound) = self.outbound.try_recv() {
            self.dispatch(outbound);
        }
        while let Some(joined) = self.tasks.join_next().await {
            report.record(joined);
        }

        info!(peer = %self.peer.id, ?report, "Exiting");
        report
    }

    fn dispatch(&mut self, outbound: Outbound) {
        let peer = Arc::clone(&self.peer);

        match outbound {
            Outbound::Process => self.tasks.spawn(async move {
                peer.process_token().await;
                Ok(Outcome::Processed)
            }),
            Outbound::Handoff(token) => self.tasks.spawn(async move {
                peer.hand_off(token).await?;
                Ok(Outcome::HandedOff)
            }),
            Outbound::Broadcast => self.tasks.spawn(async move {
                peer.broadcast_done().await;
                Ok(Outcome::Broadcast)
            }),
        };
    }
}
