use super::barrier::BarrierState;

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub max_concurrency: usize,
    pub running: usize,
    pub idle_workers: usize,
    pub queued: usize,
    pub outstanding: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Максимум одновременно выполнявшихся задач за всё время жизни пула
    pub peak_running: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.max_concurrency == 0 {
            return 0.0;
        }
        self.running as f64 / self.max_concurrency as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }
}


#[derive(Debug, Clone)]
pub struct BarrierMetrics {
    pub state: BarrierState,
    pub pending: usize,
    pub finished: usize,
    pub abandoned: usize,
}

impl BarrierMetrics {
    pub fn total(&self) -> usize {
        self.pending + self.finished + self.abandoned
    }
}


/// Промежуточное состояние прогона. Только для мониторинга: пока барьер открыт,
/// цифры могут отставать от итоговых
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunProgress {
    pub items: usize,
    pub failures: usize,
    pub pending: usize,
}
