use std::net::Ipv4Addr;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::range::Ipv4Range;

mod endpoint;
mod probe;

pub use endpoint::{Endpoint, RawEndpoint};
pub use probe::{IcmpProbe, PROCESS_IDENT};

// Same receive buffer the ping(8) family uses; an echo reply is far smaller.
pub(crate) const RECV_BUF_SZ: usize = 1500;

/// One liveness check against a single address.
pub trait Probe: Send + Sync {
    /// Returns the round-trip time if `target` answered before the deadline,
    /// `None` for every failure mode (timeout, transport error, setup error).
    fn probe(&self, target: Ipv4Addr) -> Option<Duration>;
}

/// A live host as published on the result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResult {
    pub addr: Ipv4Addr,
    pub rtt: Duration,
}

/// Counting semaphore gating probe admission, so a big range cannot spawn
/// an unbounded number of in-flight probes at once.
struct Gate {
    permits: Mutex<usize>,
    freed: Condvar,
}

impl Gate {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            freed: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.freed.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    fn release(&self) {
        *self.permits.lock().unwrap() += 1;
        self.freed.notify_one();
    }
}

pub struct Sweeper<P> {
    probe: Arc<P>,
    concurrency: usize,
}

impl<P: Probe + 'static> Sweeper<P> {
    pub fn new(probe: P, concurrency: usize) -> Self {
        Self {
            probe: Arc::new(probe),
            concurrency: concurrency.max(1),
        }
    }

    /// Launches one probe task per address in the range and hands every
    /// successful result to `report` in arrival order, which is
    /// non-deterministic across runs. Returns only once all probes have
    /// finished and every worker is joined.
    pub fn run(&self, range: Ipv4Range, mut report: impl FnMut(HostResult)) {
        let (result_tx, result_rx) = mpsc::channel::<HostResult>();
        let gate = Arc::new(Gate::new(self.concurrency));
        let probe = Arc::clone(&self.probe);
        let addrs = range.addresses();

        // Admission runs off the consumer thread: when the range exceeds
        // the gate, results must still be reported while later probes are
        // waiting to be admitted.
        let spawner = thread::spawn(move || {
            let mut workers = Vec::new();
            for addr in addrs {
                gate.acquire();

                let probe = Arc::clone(&probe);
                let gate = Arc::clone(&gate);
                let result_tx = result_tx.clone();
                workers.push(thread::spawn(move || {
                    if let Some(rtt) = probe.probe(addr) {
                        // The receiver outlives every worker, so the send
                        // only fails if the consumer side panicked.
                        let _ = result_tx.send(HostResult { addr, rtt });
                    }
                    gate.release();
                }));
            }

            // The workers now hold the only senders: the stream disconnects
            // when the last one finishes, which closes it exactly once and
            // only after every probe has terminated.
            drop(result_tx);

            for worker in workers {
                let _ = worker.join();
            }
        });

        for result in result_rx {
            report(result);
        }

        let _ = spawner.join();
    }
}
