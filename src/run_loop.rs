use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::Config;
use crate::delay;
use crate::error::{Result, ScraperError};
use crate::extractor::Extractor;
use crate::normalizer::{Normalizer, ProfileRecord};
use crate::session::SessionManager;
use crate::sink::SinkWriter;
use crate::worklist;

/// Cooperative stop flag, checked at every suspension point (pacing
/// delays, the inter-pass sleep, the top of each identifier). Never
/// honoured mid-fetch.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    AcquiringSession,
    Extracting,
    Writing,
    Sleeping,
    Done,
}

#[derive(Debug, Default, Clone)]
pub struct PassStats {
    pub total: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub appended: usize,
    pub updated: usize,
    pub write_failures: usize,
}

/// Drives the pipeline: session -> extract -> normalize -> sink, with
/// randomized pacing between fetches and an inter-pass sleep in continuous
/// mode.
pub struct RunLoop {
    config: Config,
    sessions: SessionManager,
    extractor: Extractor,
    normalizer: Normalizer,
    sink: SinkWriter,
    stop: StopSignal,
    state: RunState,
}

impl RunLoop {
    pub fn new(config: Config, sink: SinkWriter, stop: StopSignal) -> Result<Self> {
        let sessions = SessionManager::new(&config)?;
        let extractor = Extractor::new(&config.base_url, config.max_retries, config.retry_delay);
        Ok(RunLoop {
            config,
            sessions,
            extractor,
            normalizer: Normalizer::new(),
            sink,
            stop,
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run until the worklist is exhausted (one-shot) or the stop signal
    /// fires (continuous). Failing to obtain a session is fatal in one-shot
    /// mode; continuous mode backs off one loop interval and tries again.
    pub fn run(&mut self) -> Result<()> {
        let mut pass = 0u64;
        loop {
            if self.stop.is_stopped() {
                break;
            }
            pass += 1;

            match self.run_pass() {
                Ok(stats) => info!(
                    "Pass {pass} complete: {} targeted, {} captured, {} skipped, {} dropped, \
                     {} new, {} updated, {} write failures",
                    stats.total,
                    stats.fetched,
                    stats.skipped,
                    stats.dropped,
                    stats.appended,
                    stats.updated,
                    stats.write_failures
                ),
                Err(ScraperError::Auth(reason)) if self.config.continuous => {
                    error!("Session acquisition failed: {reason}; backing off one loop interval");
                    self.sessions.invalidate();
                }
                Err(e) => {
                    self.state = RunState::Done;
                    return Err(e);
                }
            }

            if !self.config.continuous {
                self.state = RunState::Done;
                info!("One-shot run finished.");
                return Ok(());
            }

            self.state = RunState::Sleeping;
            let wait = Duration::from_secs(self.config.loop_wait_minutes * 60);
            info!(
                "Sleeping {} minute(s) before the next pass...",
                self.config.loop_wait_minutes
            );
            if !delay::sleep_with_stop(wait, &self.stop) {
                break;
            }
        }

        self.state = RunState::Done;
        info!("Stop signal honoured, shutting down.");
        Ok(())
    }

    fn run_pass(&mut self) -> Result<PassStats> {
        let mut stats = PassStats::default();

        self.state = RunState::AcquiringSession;
        let session = self.sessions.acquire()?;

        let identifiers = match &self.config.worklist_file {
            Some(path) => worklist::load_identifiers(path),
            None => match self.extractor.discover_online(session) {
                Ok(users) => users,
                Err(e) => {
                    warn!("Online-user discovery failed: {e}");
                    Vec::new()
                }
            },
        };
        stats.total = identifiers.len();
        if identifiers.is_empty() {
            warn!("Worklist is empty, nothing to do this pass.");
            return Ok(stats);
        }

        let tag_book = self.sink.load_tag_book();

        self.state = RunState::Extracting;
        let mut batch: Vec<ProfileRecord> = Vec::new();
        for (i, nickname) in identifiers.iter().enumerate() {
            if self.stop.is_stopped() {
                info!("Stop requested, ending pass early.");
                break;
            }
            if i > 0
                && !delay::pause_between_requests(
                    self.config.min_delay,
                    self.config.max_delay,
                    &self.stop,
                )
            {
                info!("Stop requested, ending pass early.");
                break;
            }

            info!("Processing {} / {}: {nickname}", i + 1, stats.total);
            match self.extractor.fetch(session, nickname) {
                Ok(raw) => match self.normalizer.normalize(&raw) {
                    Ok(mut record) => {
                        record.tags = tag_book.tags_for(nickname);
                        batch.push(record);
                        stats.fetched += 1;
                    }
                    Err(e) => {
                        warn!("Dropping record: {e}");
                        stats.dropped += 1;
                    }
                },
                Err(e) => {
                    warn!("Skipping profile: {e}");
                    stats.skipped += 1;
                }
            }

            if batch.len() >= self.config.batch_size {
                Self::flush(&mut self.sink, &mut self.state, &mut batch, &mut stats)?;
                self.state = RunState::Extracting;
            }
        }

        Self::flush(&mut self.sink, &mut self.state, &mut batch, &mut stats)?;
        Ok(stats)
    }

    // Associated fn so the flush can run while the session borrow is live.
    fn flush(
        sink: &mut SinkWriter,
        state: &mut RunState,
        batch: &mut Vec<ProfileRecord>,
        stats: &mut PassStats,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        *state = RunState::Writing;
        let summary = sink.write(batch)?;
        stats.appended += summary.appended;
        stats.updated += summary.updated;
        stats.write_failures += summary.failed;
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_is_shared_between_clones() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!other.is_stopped());
        stop.trigger();
        assert!(other.is_stopped());
    }
}
