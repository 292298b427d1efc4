//! Endpoint Status Watchdog
//!
//! Per-subsystem state machine aggregating the status of every owned
//! endpoint into one operational state:
//! `Started -> Operational -> {Suspect <-> Operational} -> Failed`.
//!
//! Two phases, each a dedicated daemon:
//! - **Startup**: ticks until either the aggregate is operational and the
//!   minimum viable endpoint set is present (then it cancels itself and
//!   schedules the ongoing phase), or the startup ceiling elapses (terminal
//!   failure, never retried).
//! - **Ongoing**: re-derives the aggregate from scratch on every tick. A
//!   suspect resolution is tolerated for a bounded number of consecutive
//!   ticks; anything else that is not operational fails the aggregate.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::aggregation::aggregate_status;
use super::types::{Endpoint, EndpointStatus};
use crate::config::PetasosConfig;
use crate::metrics::agent::MetricsAgent;
use crate::metrics::notifications::NotificationForwarder;
use crate::naming::EndpointFunction;

/// Told about owned publisher endpoints that have just become visible
/// (reached `Operational` for the first time).
pub trait PublisherEventListener: Send + Sync {
    fn on_publisher_visible(&self, endpoint: &Endpoint);
}

/// Outcome of a single startup watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupCheck {
    /// Startup ceiling elapsed. Terminal.
    TimedOut,
    /// Still warming; carries the aggregate derived this tick.
    Warming(EndpointStatus),
    /// Operational with the minimum viable set present.
    Complete,
}

/// Aggregates owned endpoint health for one subsystem.
pub struct EndpointStatusWatchdog {
    subsystem_name: String,
    owned: DashMap<EndpointFunction, Endpoint>,
    aggregate: Mutex<EndpointStatus>,
    suspect_iterations: AtomicU32,
    announced: Mutex<HashSet<EndpointFunction>>,
    listeners: Mutex<Vec<Arc<dyn PublisherEventListener>>>,

    required_functions: Vec<EndpointFunction>,
    startup_delay: Duration,
    startup_period: Duration,
    max_startup_duration: Duration,
    ongoing_delay: Duration,
    ongoing_period: Duration,
    suspect_threshold: u32,

    started_at: Instant,
    startup_token: CancellationToken,
    ongoing_token: CancellationToken,

    metrics: Arc<MetricsAgent>,
    notifier: Arc<NotificationForwarder>,
}

impl EndpointStatusWatchdog {
    pub fn new(
        config: &PetasosConfig,
        metrics: Arc<MetricsAgent>,
        notifier: Arc<NotificationForwarder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            subsystem_name: config.subsystem_name.clone(),
            owned: DashMap::new(),
            aggregate: Mutex::new(EndpointStatus::Started),
            suspect_iterations: AtomicU32::new(0),
            announced: Mutex::new(HashSet::new()),
            listeners: Mutex::new(Vec::new()),
            required_functions: config.required_functions.clone(),
            startup_delay: config.startup_check_delay,
            startup_period: config.startup_check_period,
            max_startup_duration: config.max_startup_duration,
            ongoing_delay: config.ongoing_check_delay,
            ongoing_period: config.ongoing_check_period,
            suspect_threshold: config.suspect_failure_threshold,
            started_at: Instant::now(),
            startup_token: CancellationToken::new(),
            ongoing_token: CancellationToken::new(),
            metrics,
            notifier,
        })
    }

    pub fn register_listener(&self, listener: Arc<dyn PublisherEventListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    /// Adds (or replaces) an owned endpoint, keyed by function.
    pub fn register_owned_endpoint(&self, endpoint: Endpoint) {
        tracing::info!(
            "Registered owned endpoint {} ({})",
            endpoint.channel_name,
            endpoint.function
        );
        self.owned.insert(endpoint.function, endpoint);
    }

    /// Updates the status an owned endpoint reports. Returns false when no
    /// endpoint with that function is configured.
    pub fn update_owned_status(&self, function: EndpointFunction, status: EndpointStatus) -> bool {
        match self.owned.get_mut(&function) {
            Some(mut endpoint) => {
                endpoint.status = status;
                true
            }
            None => false,
        }
    }

    pub fn owned_endpoint(&self, function: EndpointFunction) -> Option<Endpoint> {
        self.owned.get(&function).map(|entry| entry.value().clone())
    }

    pub fn owned_endpoints(&self) -> Vec<Endpoint> {
        self.owned.iter().map(|entry| entry.value().clone()).collect()
    }

    /// The current subsystem-wide aggregate.
    pub fn aggregate_status(&self) -> EndpointStatus {
        *self.aggregate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn derive_aggregate(&self) -> EndpointStatus {
        aggregate_status(self.owned.iter().map(|entry| entry.value().status))
    }

    /// All configured single-site endpoints must be present and not failed
    /// before startup may complete.
    ///
    /// The launch gate this replaces had several overlapping branches and a
    /// disabled multi-site check.
    // TODO: multi-site deployments currently do not gate startup; confirm
    // with product whether they should.
    pub fn minimum_viable_set_present(&self) -> bool {
        self.required_functions.iter().all(|function| {
            self.owned
                .get(function)
                .map(|endpoint| endpoint.status != EndpointStatus::Failed)
                .unwrap_or(false)
        })
    }

    /// One startup watchdog tick.
    pub fn run_startup_check(&self) -> StartupCheck {
        if self.started_at.elapsed() > self.max_startup_duration {
            tracing::error!(
                "Subsystem {} failed to start within {:?}",
                self.subsystem_name,
                self.max_startup_duration
            );
            self.set_aggregate(EndpointStatus::Failed);
            self.notifier.notify(
                &format!(
                    "startup did not complete within {:?}",
                    self.max_startup_duration
                ),
                &self.subsystem_name,
                &self.subsystem_name,
            );
            return StartupCheck::TimedOut;
        }

        let derived = self.derive_aggregate();
        self.set_aggregate(derived);

        if derived == EndpointStatus::Operational && self.minimum_viable_set_present() {
            StartupCheck::Complete
        } else {
            StartupCheck::Warming(derived)
        }
    }

    /// One ongoing watchdog tick. The aggregate is re-derived from scratch;
    /// suspicion is tolerated for `suspect_threshold` consecutive ticks.
    pub fn run_ongoing_check(&self) -> EndpointStatus {
        let derived = self.derive_aggregate();

        let resolved = match derived {
            EndpointStatus::Operational => {
                self.suspect_iterations.store(0, Ordering::SeqCst);
                EndpointStatus::Operational
            }
            EndpointStatus::Suspect => {
                let iterations = self.suspect_iterations.fetch_add(1, Ordering::SeqCst) + 1;
                if iterations > self.suspect_threshold {
                    tracing::error!(
                        "Subsystem {} suspect for {} consecutive checks; failing",
                        self.subsystem_name,
                        iterations
                    );
                    EndpointStatus::Failed
                } else {
                    tracing::warn!(
                        "Subsystem {} suspect ({}/{})",
                        self.subsystem_name,
                        iterations,
                        self.suspect_threshold
                    );
                    EndpointStatus::Suspect
                }
            }
            // Ambiguous endpoint states are not tolerated in steady state.
            other => {
                tracing::error!(
                    "Subsystem {} resolved {:?} in steady state; failing",
                    self.subsystem_name,
                    other
                );
                EndpointStatus::Failed
            }
        };

        self.set_aggregate(resolved);
        resolved
    }

    fn set_aggregate(&self, status: EndpointStatus) {
        let changed = {
            let mut aggregate = self.aggregate.lock().unwrap_or_else(|e| e.into_inner());
            let changed = *aggregate != status;
            *aggregate = status;
            changed
        };

        if !changed {
            return;
        }

        tracing::info!("Subsystem {} aggregate is now {:?}", self.subsystem_name, status);
        self.metrics.touch_instant(&self.subsystem_name, "aggregate-status-change");
        if status == EndpointStatus::Failed {
            self.metrics.increment(&self.subsystem_name, "aggregate-failures");
            self.notifier.notify(
                "endpoint aggregate entered Failed state",
                &self.subsystem_name,
                &self.subsystem_name,
            );
        }

        self.announce_visible_publishers();
    }

    /// Tells listeners about owned endpoints that have just become visible.
    fn announce_visible_publishers(&self) {
        let newly_visible: Vec<Endpoint> = {
            let mut announced = self.announced.lock().unwrap_or_else(|e| e.into_inner());
            self.owned
                .iter()
                .filter(|entry| entry.value().status == EndpointStatus::Operational)
                .filter(|entry| announced.insert(entry.value().function))
                .map(|entry| entry.value().clone())
                .collect()
        };

        if newly_visible.is_empty() {
            return;
        }

        let listeners: Vec<Arc<dyn PublisherEventListener>> = {
            let guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        for endpoint in &newly_visible {
            tracing::info!("Publisher endpoint {} is now visible", endpoint.channel_name);
            for listener in &listeners {
                listener.on_publisher_visible(endpoint);
            }
        }
    }

    /// Spawns the startup watchdog daemon; the ongoing daemon is scheduled
    /// automatically once startup completes.
    pub fn start(self: &Arc<Self>) {
        let watchdog = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(watchdog.startup_delay).await;
            let mut interval = tokio::time::interval(watchdog.startup_period);

            loop {
                tokio::select! {
                    _ = watchdog.startup_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match watchdog.run_startup_check() {
                    StartupCheck::TimedOut => break,
                    StartupCheck::Complete => {
                        tracing::info!(
                            "Subsystem {} startup complete; switching to ongoing watchdog",
                            watchdog.subsystem_name
                        );
                        watchdog.startup_token.cancel();
                        watchdog.clone().spawn_ongoing();
                        break;
                    }
                    StartupCheck::Warming(status) => {
                        tracing::debug!(
                            "Subsystem {} still warming up ({:?})",
                            watchdog.subsystem_name,
                            status
                        );
                    }
                }
            }
        });
    }

    fn spawn_ongoing(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(self.ongoing_delay).await;
            let mut interval = tokio::time::interval(self.ongoing_period);

            loop {
                tokio::select! {
                    _ = self.ongoing_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                self.run_ongoing_check();
            }
        });
    }

    /// Stops both watchdog daemons.
    pub fn stop(&self) {
        self.startup_token.cancel();
        self.ongoing_token.cancel();
    }
}
