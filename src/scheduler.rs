//! Background retraining and hotspot refresh
//!
//! Each job runs on its own thread, woken by a `crossbeam_channel::tick`.
//! Jobs talk to request handling only through the registry's active pointer
//! and the predictor's hotspot snapshot. Dropping the `Scheduler` (or calling
//! `shutdown`) disconnects the stop channel and joins the workers.
//!
//! A retrain tick whose history hashes the same as the last successful run
//! is skipped, so an idle history does not pile up identical versions.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::classifier::HistoryProvider;
use crate::engine::PredictionEngine;
use crate::models::ReportRecord;

/// Which periodic job a worker runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Retrain,
    Hotspots,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Retrain => write!(f, "retrain"),
            Job::Hotspots => write!(f, "hotspots"),
        }
    }
}

pub struct Scheduler {
    stop: Option<Sender<()>>,
    workers: Vec<thread::JoinHandle<usize>>,
}

impl Scheduler {
    /// Start a worker for each job with an interval.
    pub fn start(
        engine: Arc<PredictionEngine>,
        history: Arc<dyn HistoryProvider>,
        retrain_every: Option<Duration>,
        hotspots_every: Option<Duration>,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut workers = Vec::new();

        for (job, every) in [(Job::Retrain, retrain_every), (Job::Hotspots, hotspots_every)] {
            let Some(every) = every.filter(|d| !d.is_zero()) else {
                continue;
            };
            let engine = Arc::clone(&engine);
            let history = Arc::clone(&history);
            let stop = stop_rx.clone();
            info!("Scheduling {} every {:?}", job, every);
            workers.push(thread::spawn(move || {
                run_worker(job, every, &engine, history.as_ref(), &stop)
            }));
        }

        Self {
            stop: Some(stop_tx),
            workers,
        }
    }

    /// Start from the engine's `[schedule]` config section.
    pub fn from_config(engine: Arc<PredictionEngine>, history: Arc<dyn HistoryProvider>) -> Self {
        let schedule = engine.config().schedule.clone();
        Self::start(
            engine,
            history,
            schedule.retrain_interval_secs.map(Duration::from_secs),
            schedule.hotspot_interval_secs.map(Duration::from_secs),
        )
    }

    pub fn is_idle(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop all workers and wait for them. Returns the number of completed
    /// job runs.
    pub fn shutdown(mut self) -> usize {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> usize {
        // Disconnecting the channel wakes every worker's select
        self.stop.take();
        self.workers.drain(..).filter_map(|h| h.join().ok()).sum()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_worker(
    job: Job,
    every: Duration,
    engine: &PredictionEngine,
    history: &dyn HistoryProvider,
    stop: &Receiver<()>,
) -> usize {
    let ticker = tick(every);
    let mut runs = 0;
    let mut last_trained: Option<String> = None;
    loop {
        select! {
            recv(stop) -> _ => {
                debug!("{} worker stopping after {} runs", job, runs);
                return runs;
            }
            recv(ticker) -> _ => {
                run_job(job, engine, history, &mut last_trained);
                runs += 1;
            }
        }
    }
}

fn run_job(
    job: Job,
    engine: &PredictionEngine,
    history: &dyn HistoryProvider,
    last_trained: &mut Option<String>,
) {
    match job {
        Job::Retrain => {
            let reports = match history.reports() {
                Ok(reports) => reports,
                Err(e) => {
                    warn!("Scheduled retrain failed, keeping current model: {}", e);
                    return;
                }
            };
            // Unchanged history would only add an identical version
            let fingerprint = history_fingerprint(&reports);
            if last_trained.as_deref() == Some(fingerprint.as_str()) {
                debug!("History unchanged since last retrain, skipping");
                return;
            }
            match engine.train_from_history(&reports) {
                Ok(version) => {
                    info!("Scheduled retrain produced {}", version);
                    *last_trained = Some(fingerprint);
                }
                Err(e) => warn!("Scheduled retrain failed, keeping current model: {}", e),
            }
        }
        Job::Hotspots => match history.reports() {
            Ok(reports) => {
                engine.hotspots(&reports, Utc::now());
            }
            Err(e) => warn!("Scheduled hotspot refresh failed: {}", e),
        },
    }
}

/// SHA-256 over the serialized history
fn history_fingerprint(reports: &[ReportRecord]) -> String {
    let mut hasher = Sha256::new();
    for report in reports {
        if let Ok(bytes) = serde_json::to_vec(report) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
