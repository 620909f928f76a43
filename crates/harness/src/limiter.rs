//! Fixed-window rate limiters and the shared registry
//!
//! Each [`RateLimiter`] admits tasks against a replenishing reservoir (fixed
//! 60-second windows, reset not slide) and a concurrency bound, in FIFO
//! order. The [`RateLimiterRegistry`] owns one limiter per traffic class and
//! composes them into chains: an `api-strict` request is admitted by `cdn`,
//! then `edge`, then `api-strict`, and holds a slot in all three for the full
//! flight. The registry is constructed once per process and shared — the
//! backend enforces one global quota no matter how many pages are driven.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, trace};

use crate::classify::TrafficClass;

/// Concurrency bound shared by every tier.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Replenishment window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Per-limiter configuration.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Admissions replenished each window.
    pub reservoir: u32,
    /// First-window allowance when it differs from `reservoir` (burst fill).
    pub initial_reservoir: Option<u32>,
    /// Maximum tasks in flight at any instant.
    pub max_concurrent: usize,
    /// Window length; quota resets at each boundary.
    pub window: Duration,
}

impl LimiterConfig {
    pub fn new(reservoir: u32) -> Self {
        Self {
            reservoir,
            initial_reservoir: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_initial_reservoir(mut self, initial: u32) -> Self {
        self.initial_reservoir = Some(initial);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Reservoir accounting for one limiter.
struct Window {
    opened: Instant,
    length: Duration,
    admitted: u32,
    allowance: u32,
    nominal: u32,
}

impl Window {
    fn new(config: &LimiterConfig) -> Self {
        Self {
            opened: Instant::now(),
            length: config.window,
            admitted: 0,
            allowance: config.initial_reservoir.unwrap_or(config.reservoir),
            nominal: config.reservoir,
        }
    }

    /// Advance past any fully elapsed windows. Windows stay aligned to the
    /// limiter's creation instant even when it idles across several of them.
    fn roll(&mut self, now: Instant) {
        while now >= self.opened + self.length {
            self.opened += self.length;
            self.admitted = 0;
            self.allowance = self.nominal;
        }
    }

    /// Take one admission, or report when the next window opens.
    fn try_admit(&mut self, now: Instant) -> std::result::Result<(), Instant> {
        self.roll(now);
        if self.admitted < self.allowance {
            self.admitted += 1;
            Ok(())
        } else {
            Err(self.opened + self.length)
        }
    }
}

/// Held while a scheduled task is in flight; dropping it releases the
/// concurrency slot. The window admission is consumed, not returned.
pub struct InFlight {
    _permit: OwnedSemaphorePermit,
}

/// One fixed-window, bounded-concurrency limiter.
pub struct RateLimiter {
    name: String,
    window: Mutex<Window>,
    /// FIFO turn-taking for admission; tokio's Mutex queues waiters fairly.
    admission: AsyncMutex<()>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: LimiterConfig) -> Self {
        Self {
            name: name.into(),
            window: Mutex::new(Window::new(&config)),
            admission: AsyncMutex::new(()),
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tasks currently holding a concurrency slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Wait until both quota and a concurrency slot admit one task.
    ///
    /// Never times out and never errors; callers queue indefinitely in
    /// arrival order.
    pub async fn acquire(&self) -> InFlight {
        let _turn = self.admission.lock().await;
        loop {
            let wait_until = {
                let mut window = self.window.lock();
                match window.try_admit(Instant::now()) {
                    Ok(()) => None,
                    Err(at) => Some(at),
                }
            };
            match wait_until {
                None => break,
                Some(at) => {
                    debug!(limiter = %self.name, "reservoir exhausted, waiting for window reset");
                    sleep_until(at).await;
                }
            }
        }
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore closed");
        trace!(limiter = %self.name, in_flight = self.in_flight(), "admitted");
        InFlight { _permit: permit }
    }

    /// Run `task` once quota and concurrency admit it.
    ///
    /// The task's own outcome passes through untouched; the slot is released
    /// on success and failure alike.
    pub async fn schedule<T, F>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _in_flight = self.acquire().await;
        task.await
    }
}

/// Reservoirs per traffic class, in admissions per window.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub cdn: LimiterConfig,
    pub edge: LimiterConfig,
    pub api_normal: LimiterConfig,
    pub api_strict: LimiterConfig,
    pub api_assets: LimiterConfig,
    pub api_post: LimiterConfig,
    pub api_download: LimiterConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cdn: LimiterConfig::new(1000),
            edge: LimiterConfig::new(600),
            api_normal: LimiterConfig::new(120),
            api_strict: LimiterConfig::new(10),
            api_assets: LimiterConfig::new(60),
            api_post: LimiterConfig::new(60),
            // Polling-heavy long downloads: doubled initial fill, nominal
            // replenishment thereafter.
            api_download: LimiterConfig::new(240).with_initial_reservoir(480),
        }
    }
}

/// The process-wide set of tier limiters.
///
/// Construct exactly one per run and pass it by reference; independent
/// instances would each believe they own the backend's global quota.
pub struct RateLimiterRegistry {
    cdn: Arc<RateLimiter>,
    edge: Arc<RateLimiter>,
    api_normal: Arc<RateLimiter>,
    api_strict: Arc<RateLimiter>,
    api_assets: Arc<RateLimiter>,
    api_post: Arc<RateLimiter>,
    api_download: Arc<RateLimiter>,
}

impl RateLimiterRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let tier = |name: &str, cfg: LimiterConfig| Arc::new(RateLimiter::new(name, cfg));
        Self {
            cdn: tier("cdn", config.cdn),
            edge: tier("edge", config.edge),
            api_normal: tier("api-normal", config.api_normal),
            api_strict: tier("api-strict", config.api_strict),
            api_assets: tier("api-assets", config.api_assets),
            api_post: tier("api-post", config.api_post),
            api_download: tier("api-download", config.api_download),
        }
    }

    pub fn limiter(&self, class: TrafficClass) -> &Arc<RateLimiter> {
        match class {
            TrafficClass::Cdn => &self.cdn,
            TrafficClass::Edge => &self.edge,
            TrafficClass::ApiNormal => &self.api_normal,
            TrafficClass::ApiStrict => &self.api_strict,
            TrafficClass::ApiAssets => &self.api_assets,
            TrafficClass::ApiPost => &self.api_post,
            TrafficClass::ApiDownload => &self.api_download,
        }
    }

    /// The limiter chain a class passes through, outermost first.
    pub fn chain(&self, class: TrafficClass) -> Vec<Arc<RateLimiter>> {
        match class {
            TrafficClass::Cdn => vec![self.cdn.clone()],
            TrafficClass::Edge => vec![self.cdn.clone(), self.edge.clone()],
            _ => vec![
                self.cdn.clone(),
                self.edge.clone(),
                self.limiter(class).clone(),
            ],
        }
    }

    /// Run `task` after sequential admission by every tier in the class
    /// chain. Slots in all tiers are held until the task settles.
    pub async fn schedule<T, F>(&self, class: TrafficClass, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let chain = self.chain(class);
        let mut held = Vec::with_capacity(chain.len());
        for tier in &chain {
            held.push(tier.acquire().await);
        }
        let out = task.await;
        drop(held);
        out
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[tokio::test]
    async fn concurrency_never_exceeds_the_bound() {
        let limiter = Arc::new(RateLimiter::new(
            "test",
            LimiterConfig::new(1000).with_max_concurrent(3),
        ));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .schedule(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3, "peak {}", peak.load(Ordering::SeqCst));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn excess_tasks_wait_for_window_replenishment() {
        let limiter = Arc::new(RateLimiter::new("test", LimiterConfig::new(2)));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.schedule(async { Instant::now() }).await
            }));
            tokio::task::yield_now().await;
        }
        let mut completions = Vec::new();
        for handle in handles {
            completions.push(handle.await.unwrap());
        }

        // Two fit the first window; the third only runs after the reset.
        assert!(completions[0] - started < DEFAULT_WINDOW);
        assert!(completions[1] - started < DEFAULT_WINDOW);
        assert!(completions[2] - started >= DEFAULT_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_burst_allowance_then_nominal_refills() {
        let limiter = Arc::new(RateLimiter::new(
            "download",
            LimiterConfig::new(2).with_initial_reservoir(4),
        ));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.schedule(async { Instant::now() }).await
            }));
            tokio::task::yield_now().await;
        }
        let mut completions = Vec::new();
        for handle in handles {
            completions.push(handle.await.unwrap());
        }

        // Four ride the burst fill, the remaining two the first nominal refill.
        for at in &completions[..4] {
            assert!(*at - started < DEFAULT_WINDOW);
        }
        for at in &completions[4..] {
            assert!(*at - started >= DEFAULT_WINDOW);
            assert!(*at - started < DEFAULT_WINDOW * 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_windows_replenish_without_traffic() {
        let limiter = RateLimiter::new("test", LimiterConfig::new(1));
        limiter.schedule(async {}).await;

        // Skip three whole windows; the next admission must be immediate.
        tokio::time::advance(DEFAULT_WINDOW * 3 + Duration::from_secs(1)).await;
        let before = Instant::now();
        limiter.schedule(async {}).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test]
    async fn admission_is_fifo_within_one_limiter() {
        let limiter = Arc::new(RateLimiter::new(
            "test",
            LimiterConfig::new(1000).with_max_concurrent(1),
        ));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .schedule(async {
                        sleep(Duration::from_millis(1)).await;
                        order.lock().push(i);
                    })
                    .await;
            }));
            // Let the task reach the admission queue before spawning the next.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_tasks_release_their_slot() {
        let limiter = RateLimiter::new("test", LimiterConfig::new(10).with_max_concurrent(1));

        let outcome: std::result::Result<(), &str> =
            limiter.schedule(async { Err("task exploded") }).await;
        assert!(outcome.is_err());
        assert_eq!(limiter.in_flight(), 0);

        // The slot freed by the failed task admits the next immediately.
        let ok: std::result::Result<(), &str> = limiter.schedule(async { Ok(()) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn chain_holds_slots_in_every_tier() {
        let registry = Arc::new(RateLimiterRegistry::default());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn({
            let registry = registry.clone();
            async move {
                registry
                    .schedule(TrafficClass::ApiStrict, async move {
                        let _ = entered_tx.send(());
                        let _ = release_rx.await;
                    })
                    .await;
            }
        });
        entered_rx.await.unwrap();

        // One strict flight pins a slot in every tier of its chain.
        assert_eq!(registry.limiter(TrafficClass::Cdn).in_flight(), 1);
        assert_eq!(registry.limiter(TrafficClass::Edge).in_flight(), 1);
        assert_eq!(registry.limiter(TrafficClass::ApiStrict).in_flight(), 1);

        release_tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(registry.limiter(TrafficClass::Cdn).in_flight(), 0);
        assert_eq!(registry.limiter(TrafficClass::Edge).in_flight(), 0);
        assert_eq!(registry.limiter(TrafficClass::ApiStrict).in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_quota_gates_the_chain_not_the_outer_tiers() {
        let registry = Arc::new(RateLimiterRegistry::new(RegistryConfig {
            api_strict: LimiterConfig::new(1),
            ..RegistryConfig::default()
        }));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .schedule(TrafficClass::ApiStrict, async { Instant::now() })
                    .await
            }));
            tokio::task::yield_now().await;
        }
        let first = handles.remove(0).await.unwrap();
        let second = handles.remove(0).await.unwrap();

        assert!(first - started < DEFAULT_WINDOW);
        assert!(second - started >= DEFAULT_WINDOW);

        // The outer tiers were barely touched: a normal-class request passes
        // immediately even while strict is starved.
        let before = Instant::now();
        registry
            .schedule(TrafficClass::ApiNormal, async {})
            .await;
        assert_eq!(Instant::now(), before);
    }
}
