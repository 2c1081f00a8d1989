//! Пул ограниченной конкурентности для конечного набора независимых задач
//!
//! # Features
//! - Фиксированный потолок одновременно выполняемых юнитов
//! - Потокобезопасный агрегат результатов без потерь и дублей
//! - Барьер завершения с таймаутом: результат читается только после закрытия
//! - Изоляция ошибок: сбой юнита (включая панику) не затрагивает соседей
//! - Scoped-освобождение ресурсов и общий HTTP-клиент для fetch-юнитов
//! - Graceful shutdown с льготным периодом

pub mod aggregate;
pub mod barrier;
pub mod errors;
pub mod failure;
pub mod handle;
pub mod model;
pub mod orchestrator;
pub mod pool;
pub mod resource;
pub mod result;
pub mod transport;
pub mod unit;

pub use aggregate::SharedAggregate;
pub use barrier::{BarrierState, CompletionBarrier};
pub use failure::{FailureRecord, FailureSink};
pub use orchestrator::{Incomplete, Orchestrator, Run, RunReport};
pub use pool::{BoundedExecutor, Config, Executor, Scope};
pub use resource::{FileSource, RecordSource, ResourceScope};
pub use transport::{HttpTransport, SharedTransport, Transport};
pub use unit::{UnitId, WorkUnit};
