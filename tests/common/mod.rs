//! Helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use token_ring::{CriticalSection, Error, PeerId, Request, Response, Result, Transport};
use tokio::time;

/// Critical section that remembers who entered, and notices overlapping entries.
#[derive(Default)]
pub struct Recorder {
    entries: Mutex<Vec<PeerId>>,
    inside: AtomicUsize,
    overlaps: AtomicUsize,
}

impl Recorder {
    pub fn entries(&self) -> Vec<PeerId> {
        self.entries.lock().clone()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl CriticalSection for Recorder {
    fn access(&self, peer: PeerId) -> Result<()> {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.lock().push(peer);
        self.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Critical section whose every entry fails, like a full disk.
pub struct Failing;

impl CriticalSection for Failing {
    fn access(&self, _peer: PeerId) -> Result<()> {
        Err(Error::Io(std::io::Error::other("disk full")))
    }
}

/// Transport standing in for the rest of the ring: answers every call from a
/// script and records who was called with what.
pub struct Scripted {
    pub allow_stop: bool,
    pub fail_handoff: bool,
    calls: Mutex<Vec<(PeerId, &'static str)>>,
}

impl Scripted {
    pub fn new(allow_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            allow_stop,
            fail_handoff: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_handoffs(allow_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            allow_stop,
            fail_handoff: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(PeerId, &'static str)> {
        self.calls.lock().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<PeerId> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, called)| *called == name)
            .map(|(to, _)| *to)
            .collect()
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn call(&self, to: PeerId, request: Request) -> Result<Response> {
        self.calls.lock().push((to, request.name()));

        match request {
            Request::StopPassingRequest(_) => Ok(Response::StopPassing {
                allow_stop: self.allow_stop,
            }),
            Request::GiveToken(_) if self.fail_handoff => Err(Error::Unreachable(to)),
            _ => Ok(Response::Ack),
        }
    }
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never became true");
}

pub fn ids(ports: &[u16]) -> Vec<PeerId> {
    ports.iter().copied().map(PeerId).collect()
}
