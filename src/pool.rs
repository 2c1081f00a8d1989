use super::{
    barrier::CompletionBarrier,
    errors::{BarrierTimeout, ConfigError, ShutdownError, SpawnError},
    handle::JoinHandle,
    model::{BarrierMetrics, PoolMetrics},
    result::SpawnResult,
};
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    path::Path,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use crossbeam::deque::{Injector, Steal};
use futures::{
    FutureExt,
    stream::{FuturesUnordered, StreamExt}
};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use tokio::{
    sync::{oneshot, Notify},
    time::Duration,
};
use tokio_util::sync::CancellationToken;


pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Конфигурация пула и прогона
///
/// Длительности в JSON задаются целыми миллисекундами (`*_ms`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Потолок одновременно выполняющихся задач (число воркеров)
    pub max_concurrency: usize,
    #[serde(rename = "barrier_timeout_ms", deserialize_with = "option_millis")]
    pub barrier_timeout: Option<Duration>,
    #[serde(rename = "shutdown_grace_ms", deserialize_with = "millis")]
    pub shutdown_grace: Duration,
    #[serde(rename = "request_timeout_ms", deserialize_with = "millis")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
            barrier_timeout: Some(Duration::from_secs(60)),
            shutdown_grace: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("workpool/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            max_concurrency: num_cpus::get() * 2, // воркеры в основном ждут сеть/диск
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "max_concurrency",
                message: "must be at least 1".into(),
            });
        }
        if self.barrier_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                key: "barrier_timeout_ms",
                message: "must be positive or absent".into(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "request_timeout_ms",
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

fn option_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
}


pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}


#[derive(Default)]
struct PoolStats {
    running: AtomicUsize,
    idle_workers: AtomicUsize,
    queued: AtomicUsize,
    outstanding: AtomicUsize,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    peak_running: AtomicUsize,
    all_done: Notify,
}

impl PoolStats {
    fn snapshot(&self, max_concurrency: usize) -> PoolMetrics {
        PoolMetrics {
            max_concurrency,
            running: self.running.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Relaxed),
        }
    }
}

/// Задача отправлена, но ещё не дошла до терминального состояния
struct Outstanding(Arc<PoolStats>);

impl Outstanding {
    fn new(stats: Arc<PoolStats>) -> Self {
        stats.submitted.fetch_add(1, Ordering::Relaxed);
        stats.outstanding.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        if self.0.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.all_done.notify_waiters();
        }
    }
}

struct Running(Arc<PoolStats>);

impl Running {
    fn enter(stats: &Arc<PoolStats>) -> Self {
        let now = stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_running.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}


pub type Executor = Arc<BoundedExecutor>;

/// Пул фиксированного размера: `max_concurrency` воркеров разбирают общую очередь,
/// каждый выполняет одну задачу за раз, так что одновременно работает не больше N задач.
///
/// Создавать только внутри tokio runtime: воркеры запускаются через `tokio::spawn`.
pub struct BoundedExecutor {
    inject: Arc<Injector<Task>>,
    wakeup: Arc<Notify>,
    cancellation_token: CancellationToken,
    accepting: AtomicBool,
    stats: Arc<PoolStats>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    config: Config,
}

impl BoundedExecutor {
    pub fn new(max_concurrency: usize) -> Executor {
        Self::with_config(Config::default().with_concurrency(max_concurrency))
    }

    pub fn with_config(mut config: Config) -> Executor {
        if config.max_concurrency == 0 {
            tracing::warn!("max_concurrency = 0, falling back to a single worker");
            config.max_concurrency = 1;
        }

        let inject = Arc::new(Injector::new());
        let wakeup = Arc::new(Notify::new());
        let cancellation_token = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());

        let workers = (0..config.max_concurrency)
            .map(|_| {
                tokio::spawn(worker_loop(
                    inject.clone(),
                    wakeup.clone(),
                    cancellation_token.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        tracing::debug!(workers = config.max_concurrency, "bounded executor started");

        Arc::new(BoundedExecutor {
            inject,
            wakeup,
            cancellation_token,
            accepting: AtomicBool::new(true),
            stats,
            workers: Mutex::new(workers),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst) && !self.cancellation_token.is_cancelled()
    }

    #[inline(always)]
    fn push_task(&self, task: Task) {
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        self.inject.push(task);
        self.wakeup.notify_one();
    }

    pub fn scope(self: &Arc<Self>) -> Scope {
        Scope::new(Arc::clone(self))
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.stats.snapshot(self.config.max_concurrency)
    }

    /// Ждёт, пока все отправленные в пул задачи не дойдут до терминального состояния
    pub async fn join_all(&self) {
        loop {
            let notified = self.stats.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.stats.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub async fn join_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join_all()).await.is_ok()
    }

    /// Перестаёт принимать задачи, дожидается всех начатых и останавливает воркеры
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.join_all().await;
        self.stop_workers().await;
    }

    /// То же, что `shutdown`, но с льготным периодом. По его истечении незавершённые
    /// задачи снимаются принудительно, и это возвращается как ошибка
    pub async fn shutdown_timeout(&self, grace: Duration) -> Result<(), ShutdownError> {
        self.accepting.store(false, Ordering::SeqCst);
        if self.join_all_timeout(grace).await {
            self.stop_workers().await;
            return Ok(());
        }

        let pending = self.stats.outstanding.load(Ordering::SeqCst);
        tracing::error!(pending, grace = ?grace, "grace period elapsed, forcing executor shutdown");
        self.stop_workers().await;
        Err(ShutdownError::ForcedTermination { pending, grace })
    }

    async fn stop_workers(&self) {
        self.cancellation_token.cancel();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "executor worker exited abnormally");
            }
        }
        // всё, что осталось в очереди, дропается: билеты этих задач отмечаются как отменённые
        loop {
            match self.inject.steal() {
                Steal::Success(task) => {
                    self.stats.queued.fetch_sub(1, Ordering::Relaxed);
                    drop(task);
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }

    /// Мониторинг метрик с callback
    /// ВАЖНО: вызовите token.cancel() для остановки мониторинга
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let stats = Arc::clone(&self.stats);
        let max_concurrency = self.config.max_concurrency;
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(stats.snapshot(max_concurrency));
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        token
    }

    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }
}

impl Drop for BoundedExecutor {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

async fn worker_loop(
    inject: Arc<Injector<Task>>,
    wakeup: Arc<Notify>,
    token: CancellationToken,
    stats: Arc<PoolStats>,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        match inject.steal() {
            Steal::Success(task) => {
                stats.queued.fetch_sub(1, Ordering::Relaxed);
                tokio::select! {
                    biased;
                    // принудительная остановка: незавершённая задача дропается вместе с билетом
                    _ = token.cancelled() => break,
                    _ = task => {}
                }
            }
            Steal::Retry => std::hint::spin_loop(),
            Steal::Empty => {
                let notified = wakeup.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if !inject.is_empty() {
                    continue;
                }

                stats.idle_workers.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    _ = &mut notified => {}
                    _ = token.cancelled() => {
                        stats.idle_workers.fetch_sub(1, Ordering::Relaxed);
                        break;
                    }
                }
                stats.idle_workers.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}


/// Группа задач одного прогона с собственным `CompletionBarrier`
pub struct Scope {
    pool: Executor,
    barrier: Arc<CompletionBarrier>,
}

impl Scope {
    pub fn new(pool: Executor) -> Self {
        Self {
            pool,
            barrier: CompletionBarrier::new(),
        }
    }

    #[inline]
    pub fn pool(&self) -> &Executor {
        &self.pool
    }

    #[inline]
    pub fn barrier(&self) -> &Arc<CompletionBarrier> {
        &self.barrier
    }

    pub fn spawn<T, F>(&self, fut: F) -> JoinHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        self.spawn_tracked(fut, |_| {})
    }

    /// `on_abandon` вызывается, если задача не дошла до нормального завершения:
    /// паника, отмена до старта, отказ пула или принудительная остановка.
    /// Хук отрабатывает до того, как барьер может закрыться
    pub fn spawn_tracked<T, F, A>(&self, fut: F, on_abandon: A) -> JoinHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
        A: FnOnce(SpawnError) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<SpawnResult<T>>();
        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();
        let ticket = self.barrier.register().on_abandon(on_abandon);

        if !self.pool.is_accepting() {
            let _ = tx.send(Err(SpawnError::ShuttingDown));
            ticket.abandon(SpawnError::ShuttingDown);
            return JoinHandle::new(cancel_token, rx);
        }

        let stats = self.pool.stats.clone();
        let outstanding = Outstanding::new(stats.clone());

        let task_fut = async move {
            let _outstanding = outstanding;

            // отмена действует только до старта: начатая задача доводится до конца
            let result: SpawnResult<T> = if cancel_clone.is_cancelled() {
                Err(SpawnError::Cancelled)
            } else {
                let _running = Running::enter(&stats);
                AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .map_err(|panic_info| SpawnError::Panic(panic_message(panic_info.as_ref())))
            };

            match result {
                Ok(value) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(Ok(value));
                    ticket.finish();
                }
                Err(err) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(Err(err.clone()));
                    ticket.abandon(err);
                }
            }
        };

        self.pool.push_task(Box::pin(task_fut));

        JoinHandle::new(cancel_token, rx)
    }

    /// Все задачи отправлены. Без этого барьер не закроется
    pub fn seal(&self) {
        self.barrier.seal();
    }

    pub async fn wait(&self) {
        self.barrier.wait().await;
    }

    pub async fn wait_timeout(&self, dur: Duration) -> Result<(), BarrierTimeout> {
        self.barrier.wait_timeout(dur).await
    }

    pub async fn join_handles<T>(&self, handles: Vec<JoinHandle<T>>) -> Vec<SpawnResult<T>>
    where
        T: Send + 'static,
    {
        if handles.is_empty() {
            return Vec::new();
        }

        let len = handles.len();
        let mut futures = FuturesUnordered::from_iter(handles);
        let mut results = Vec::with_capacity(len);

        while let Some(result) = futures.next().await {
            results.push(result);
        }

        results
    }

    #[inline]
    pub fn metrics(&self) -> BarrierMetrics {
        self.barrier.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_follow_cpu_count() {
        let config = Config::default();
        assert_eq!(config.max_concurrency, num_cpus::get());
        assert_eq!(config.barrier_timeout, Some(Duration::from_secs(60)));
        assert_eq!(Config::io_bound().max_concurrency, num_cpus::get() * 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_json_uses_millis_and_defaults() {
        let config = Config::from_json_str(
            r#"{ "max_concurrency": 5, "barrier_timeout_ms": 1500, "request_timeout_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.barrier_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));

        let no_timeout = Config::from_json_str(r#"{ "barrier_timeout_ms": null }"#).unwrap();
        assert_eq!(no_timeout.barrier_timeout, None);

        let zero = Config::default().with_barrier_timeout(Some(Duration::ZERO));
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::Invalid { key: "barrier_timeout_ms", .. })
        ));
    }

    #[test]
    fn config_rejects_zero_concurrency() {
        match Config::from_json_str(r#"{ "max_concurrency": 0 }"#) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "max_concurrency"),
            other => panic!("expected invalid config, got {other:?}"),
        }
        assert!(matches!(
            Config::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("boom");
        let b: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let c: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(a.as_ref()), "boom");
        assert_eq!(panic_message(b.as_ref()), "bang");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }
}
