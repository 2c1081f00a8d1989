//! Барьер завершения: Open -> Closed, когда все зарегистрированные задачи
//! дошли до терминального состояния и регистрация запечатана.
//!
//! "Всё отправлено" (`seal`) и "всё завершено" (`Closed`) это разные сигналы.

use super::{
    errors::{BarrierTimeout, SpawnError},
    model::BarrierMetrics,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Open,
    Closed,
}

#[derive(Default)]
pub struct CompletionBarrier {
    pending: AtomicUsize,
    sealed: AtomicBool,
    finished: AtomicUsize,
    abandoned: AtomicUsize,
    notify: Notify,
}

impl CompletionBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Регистрирует одну задачу. Барьер не закроется, пока билет не будет погашен
    pub fn register(self: &Arc<Self>) -> CompletionTicket {
        self.pending.fetch_add(1, Ordering::SeqCst);
        CompletionTicket {
            barrier: Arc::clone(self),
            on_abandon: None,
            settled: false,
        }
    }

    /// Больше задач не будет
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
        if self.pending.load(Ordering::SeqCst) == 0 {
            self.close();
        }
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BarrierState {
        if self.is_sealed() && self.pending() == 0 {
            BarrierState::Closed
        } else {
            BarrierState::Open
        }
    }

    fn close(&self) {
        tracing::debug!(
            finished = self.finished.load(Ordering::Relaxed),
            abandoned = self.abandoned.load(Ordering::Relaxed),
            "completion barrier closed"
        );
        self.notify.notify_waiters();
    }

    fn settle(&self, finished: bool) {
        if finished {
            self.finished.fetch_add(1, Ordering::Relaxed);
        } else {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
        }
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 && self.is_sealed() {
            self.close();
        }
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // подписываемся до проверки, иначе notify_waiters между проверкой и await потеряется
            notified.as_mut().enable();
            if self.state() == BarrierState::Closed {
                return;
            }
            notified.await;
        }
    }

    /// По истечении таймаута возвращает `BarrierTimeout`, а не молча считает барьер закрытым
    pub async fn wait_timeout(&self, dur: Duration) -> Result<(), BarrierTimeout> {
        match tokio::time::timeout(dur, self.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let pending = self.pending();
                tracing::warn!(pending, waited = ?dur, "completion barrier wait timed out");
                Err(BarrierTimeout { pending, waited: dur })
            }
        }
    }

    pub fn metrics(&self) -> BarrierMetrics {
        BarrierMetrics {
            state: self.state(),
            pending: self.pending(),
            finished: self.finished.load(Ordering::Acquire),
            abandoned: self.abandoned.load(Ordering::Acquire),
        }
    }
}


type AbandonHook = Box<dyn FnOnce(SpawnError) + Send>;

/// Билет одной задачи. Если он уничтожен без `finish`/`abandon`
/// (задачу дропнули до завершения), срабатывает хук с `SpawnError::Cancelled`
pub struct CompletionTicket {
    barrier: Arc<CompletionBarrier>,
    on_abandon: Option<AbandonHook>,
    settled: bool,
}

impl CompletionTicket {
    pub fn on_abandon<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(SpawnError) + Send + 'static,
    {
        self.on_abandon = Some(Box::new(hook));
        self
    }

    pub fn finish(mut self) {
        self.settled = true;
        self.barrier.settle(true);
    }

    pub fn abandon(mut self, reason: SpawnError) {
        self.abandon_with(reason);
    }

    fn abandon_with(&mut self, reason: SpawnError) {
        self.settled = true;
        // хук (запись ошибки) обязан отработать до того, как барьер может закрыться
        if let Some(hook) = self.on_abandon.take() {
            hook(reason);
        }
        self.barrier.settle(false);
    }
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        if !self.settled {
            self.abandon_with(SpawnError::Cancelled);
        }
    }
}
