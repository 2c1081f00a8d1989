//! Оркестратор: строит юниты прогона, отдаёт их пулу и читает агрегат
//! только после закрытия барьера

use super::{
    aggregate::SharedAggregate,
    barrier::BarrierState,
    errors::{BarrierTimeout, ConfigError, ShutdownError, UnitError},
    failure::{FailureRecord, FailureSink},
    handle::JoinHandle,
    model::RunProgress,
    pool::{BoundedExecutor, Config, Executor, Scope},
    transport::SharedTransport,
    unit::{uppercase, Transform, UnitContext, UnitReport, WorkUnit},
};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::time::Duration;

pub struct Orchestrator {
    pool: Executor,
    transport: Option<SharedTransport>,
    transform: Transform,
}

impl Orchestrator {
    /// Должен вызываться внутри tokio runtime
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_pool(BoundedExecutor::with_config(config)))
    }

    pub fn with_pool(pool: Executor) -> Self {
        Self {
            pool,
            transport: None,
            transform: uppercase(),
        }
    }

    /// Один транспорт на все fetch-юниты всех прогонов
    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transform = Arc::new(transform);
        self
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.pool
    }

    /// Отправляет все юниты и запечатывает барьер. Возвращается сразу:
    /// отправка не означает завершения
    pub fn submit(&self, units: Vec<WorkUnit>) -> Run {
        let scope = self.pool.scope();
        let aggregate = Arc::new(SharedAggregate::new());
        let failures = Arc::new(FailureSink::new());
        let ctx = Arc::new(UnitContext {
            aggregate: Arc::clone(&aggregate),
            failures: Arc::clone(&failures),
            transform: Arc::clone(&self.transform),
            transport: self.transport.clone(),
        });

        let units_total = units.len();
        let handles = units
            .into_iter()
            .map(|unit| {
                let id = unit.id().clone();
                let sink = Arc::clone(&failures);
                scope.spawn_tracked(unit.run(Arc::clone(&ctx)), move |reason| {
                    sink.record(id, UnitError::from(reason));
                })
            })
            .collect();
        scope.seal();

        tracing::info!(units = units_total, max_concurrency = self.pool.config().max_concurrency, "run submitted");

        Run {
            scope,
            aggregate,
            failures,
            handles,
            units: units_total,
            started: Instant::now(),
        }
    }

    /// submit + ожидание с таймаутом из конфигурации
    pub async fn run(&self, units: Vec<WorkUnit>) -> Result<RunReport, Incomplete> {
        self.run_until(units, std::future::pending()).await
    }

    /// То же, что `run`, но с внешним запросом остановки (например, Ctrl-C).
    /// По сигналу пул останавливается с льготным периодом `shutdown_grace`,
    /// и возвращается частичный отчёт с `interrupted = true`
    pub async fn run_until<S>(&self, units: Vec<WorkUnit>, shutdown: S) -> Result<RunReport, Incomplete>
    where
        S: Future<Output = ()>,
    {
        let run = self.submit(units);
        let timeout = self.pool.config().barrier_timeout;
        let deadline = async move {
            match timeout {
                Some(t) => {
                    tokio::time::sleep(t).await;
                    t
                }
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = run.scope.wait() => Outcome::Closed,
            waited = deadline => Outcome::TimedOut(waited),
            _ = shutdown => Outcome::Interrupted,
        };

        match outcome {
            Outcome::Closed => Ok(run.into_report(None).await),
            Outcome::TimedOut(waited) => {
                let pending = run.scope.barrier().pending();
                tracing::warn!(pending, waited = ?waited, "run did not finish in time");
                Err(Incomplete {
                    error: BarrierTimeout { pending, waited },
                    run,
                })
            }
            Outcome::Interrupted => {
                tracing::warn!(pending = run.scope.barrier().pending(), "shutdown requested, stopping run");
                Ok(run.abort(self.pool.config().shutdown_grace).await)
            }
        }
    }

    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.pool.shutdown_timeout(self.pool.config().shutdown_grace).await
    }
}

enum Outcome {
    Closed,
    TimedOut(Duration),
    Interrupted,
}

/// Запущенный прогон. Агрегат и ошибки доступны только через `RunReport`
pub struct Run {
    scope: Scope,
    aggregate: Arc<SharedAggregate<String>>,
    failures: Arc<FailureSink>,
    handles: Vec<JoinHandle<UnitReport>>,
    units: usize,
    started: Instant,
}

impl Run {
    #[inline]
    pub fn state(&self) -> BarrierState {
        self.scope.barrier().state()
    }

    /// Только для мониторинга
    pub fn progress(&self) -> RunProgress {
        RunProgress {
            items: self.aggregate.len(),
            failures: self.failures.len(),
            pending: self.scope.barrier().pending(),
        }
    }

    pub async fn wait(self) -> RunReport {
        self.scope.wait().await;
        self.into_report(None).await
    }

    /// При таймауте прогон не теряется: его можно дождаться дальше через
    /// `Incomplete::into_run` или оборвать через `Incomplete::abort`
    pub async fn wait_timeout(self, timeout: Duration) -> Result<RunReport, Incomplete> {
        match self.scope.wait_timeout(timeout).await {
            Ok(()) => Ok(self.into_report(None).await),
            Err(error) => Err(Incomplete { error, run: self }),
        }
    }

    /// Останавливает весь пул с льготным периодом. Если юниты не уложились,
    /// они записываются как отменённые, а принудительная остановка попадает в `RunReport::forced`
    pub async fn abort(self, grace: Duration) -> RunReport {
        let pool = Arc::clone(self.scope.pool());
        let forced = pool.shutdown_timeout(grace).await.err();
        self.scope.wait().await;
        let mut report = self.into_report(forced).await;
        report.interrupted = true;
        report
    }

    async fn into_report(self, forced: Option<ShutdownError>) -> RunReport {
        debug_assert_eq!(self.state(), BarrierState::Closed);
        let Run { scope, aggregate, failures, handles, units, started } = self;

        let succeeded = scope
            .join_handles(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(report) if !report.failed))
            .count();

        let report = RunReport {
            items: aggregate.take(),
            failures: failures.take(),
            units,
            succeeded,
            elapsed: started.elapsed(),
            forced,
            interrupted: false,
        };
        tracing::info!(
            units = report.units,
            items = report.items.len(),
            failures = report.failures.len(),
            elapsed = ?report.elapsed,
            "run completed"
        );
        report
    }
}

/// Барьер не закрылся вовремя. Решение (ждать дальше или обрывать) за вызывающим
pub struct Incomplete {
    pub error: BarrierTimeout,
    run: Run,
}

impl Incomplete {
    #[inline]
    pub fn pending(&self) -> usize {
        self.error.pending
    }

    pub fn progress(&self) -> RunProgress {
        self.run.progress()
    }

    pub fn into_run(self) -> Run {
        self.run
    }

    /// См. `Run::abort`
    pub async fn abort(self, grace: Duration) -> RunReport {
        self.run.abort(grace).await
    }
}

impl std::fmt::Debug for Incomplete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incomplete")
            .field("error", &self.error)
            .field("progress", &self.run.progress())
            .finish()
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub items: Vec<String>,
    pub failures: Vec<FailureRecord>,
    pub units: usize,
    pub succeeded: usize,
    pub elapsed: Duration,
    /// Заполнено, если пул пришлось останавливать принудительно
    pub forced: Option<ShutdownError>,
    /// Прогон оборван до закрытия барьера (таймаут или сигнал остановки)
    pub interrupted: bool,
}

impl RunReport {
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.forced.is_none() && !self.interrupted
    }
}
