use super::{AccelError, AccelStatus, Acquisition};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// One sensor read cycle, run on the poll thread.
pub trait PollSource: Send + 'static {
    /// Appends any new samples to `out`. Returns a status when the
    /// acquisition cannot continue.
    fn poll(&mut self, out: &mut Vec<[f64; 3]>) -> Option<AccelStatus>;
}

/// Fixed-period poll loop on its own thread. The source is handed back on
/// [`Poller::join`] so a driver can reclaim its bus.
pub struct Poller<S> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<S>,
}

impl<S: PollSource> Poller<S> {
    pub fn spawn(
        source: S,
        shared: Arc<Mutex<Acquisition>>,
        period: Duration,
    ) -> Result<Self, AccelError> {
        let stop = Arc::new(AtomicBool::new(false));
        shared.lock().set_status(AccelStatus::Collecting);

        let flag = Arc::clone(&stop);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("accel-poll".into())
            .spawn(move || run(source, &thread_shared, &flag, period));
        match handle {
            Ok(handle) => Ok(Self { stop, handle }),
            Err(err) => {
                shared.lock().set_status(AccelStatus::ReadFailed);
                Err(AccelError::Spawn(err))
            }
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<S, AccelError> {
        self.request_stop();
        self.handle.join().map_err(|_| AccelError::PollerPanicked)
    }
}

fn run<S: PollSource>(
    mut source: S,
    shared: &Mutex<Acquisition>,
    stop: &AtomicBool,
    period: Duration,
) -> S {
    let mut batch = Vec::with_capacity(64);
    let mut next = Instant::now();
    loop {
        if stop.load(Ordering::Acquire) {
            shared.lock().set_status(AccelStatus::Stopped);
            break;
        }

        batch.clear();
        let terminal = source.poll(&mut batch);
        {
            let mut acquisition = shared.lock();
            for &sample in &batch {
                acquisition.push(sample);
            }
            if let Some(status) = terminal {
                acquisition.set_status(status);
            }
        }
        if let Some(status) = terminal {
            tracing::warn!(%status, "acquisition ended");
            break;
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
    source
}
