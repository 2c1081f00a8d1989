//! WorkUnit: одна независимая порция работы
//!
//! Два варианта:
//! - `Read`: открывает свой источник, построчно применяет преобразование и
//!   кладёт каждую строку в агрегат отдельно (при сбое посреди чтения уже
//!   прочитанное остаётся в агрегате);
//! - `Fetch`: один GET через общий транспорт, в агрегат попадает только тело
//!   успешного ответа.
//!
//! Любая ошибка, включая панику, остаётся внутри юнита и уходит в `FailureSink`.

use super::{
    aggregate::SharedAggregate,
    errors::{ReadError, SpawnError, UnitError},
    failure::FailureSink,
    pool::panic_message,
    resource::{open_scoped, RecordSource},
    result::UnitResult,
    transport::{SharedTransport, Transport},
};
use futures::FutureExt;
use std::{fmt, io::{self, BufRead}, panic::AssertUnwindSafe, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitId {
    Index(usize),
    Url(String),
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Index(i) => write!(f, "unit #{i}"),
            UnitId::Url(url) => f.write_str(url),
        }
    }
}

pub enum UnitKind {
    Read { source: Arc<dyn RecordSource> },
    Fetch { url: String },
}

pub struct WorkUnit {
    id: UnitId,
    kind: UnitKind,
}

pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub fn uppercase() -> Transform {
    Arc::new(|line: &str| line.to_uppercase())
}

/// Всё, что юнит получает снаружи. Изменяемые общие объекты здесь только два:
/// агрегат и сборщик ошибок
#[derive(Clone)]
pub struct UnitContext {
    pub aggregate: Arc<SharedAggregate<String>>,
    pub failures: Arc<FailureSink>,
    pub transform: Transform,
    pub transport: Option<SharedTransport>,
}

/// Итог одного юнита
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub id: UnitId,
    pub produced: usize,
    pub failed: bool,
}

impl From<SpawnError> for UnitError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::Panic(msg) => UnitError::Panicked(msg),
            SpawnError::ShuttingDown => UnitError::Rejected,
            SpawnError::Cancelled | SpawnError::Timeout | SpawnError::ChannelClosed => UnitError::Cancelled,
        }
    }
}

impl WorkUnit {
    pub fn read(index: usize, source: Arc<dyn RecordSource>) -> Self {
        Self {
            id: UnitId::Index(index),
            kind: UnitKind::Read { source },
        }
    }

    pub fn fetch(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: UnitId::Url(url.clone()),
            kind: UnitKind::Fetch { url },
        }
    }

    #[inline]
    pub fn id(&self) -> &UnitId {
        &self.id
    }

    /// Выполняет юнит ровно один раз. Никогда не возвращает ошибку наружу:
    /// сбой записывается в `ctx.failures` до того, как future завершится
    pub async fn run(self, ctx: Arc<UnitContext>) -> UnitReport {
        let WorkUnit { id, kind } = self;
        tracing::debug!(unit = %id, "unit started");

        let outcome = match kind {
            UnitKind::Read { source } => run_blocking_read(source, &ctx).await,
            UnitKind::Fetch { url } => match &ctx.transport {
                Some(transport) => {
                    AssertUnwindSafe(fetch_and_store(transport.as_ref(), &url, &ctx.aggregate))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|p| Err(UnitError::Panicked(panic_message(p.as_ref()))))
                }
                None => Err(UnitError::ResourceAcquisition {
                    resource: "http transport".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no shared transport configured"),
                }),
            },
        };

        match outcome {
            Ok(produced) => {
                tracing::debug!(unit = %id, produced, "unit finished");
                UnitReport { id, produced, failed: false }
            }
            Err(err) => {
                let produced = match &err {
                    UnitError::Read(read) => read.records_committed,
                    _ => 0,
                };
                ctx.failures.record(id.clone(), err);
                UnitReport { id, produced, failed: true }
            }
        }
    }
}

/// Синхронное чтение уходит в blocking-пул tokio; воркер пула ждёт его,
/// поэтому потолок конкурентности сохраняется
async fn run_blocking_read(source: Arc<dyn RecordSource>, ctx: &UnitContext) -> UnitResult<usize> {
    let transform = Arc::clone(&ctx.transform);
    let aggregate = Arc::clone(&ctx.aggregate);

    let joined = tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            read_and_transform(&source, transform.as_ref(), &aggregate)
        }))
    })
    .await;

    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(panic_info)) => Err(UnitError::Panicked(panic_message(panic_info.as_ref()))),
        Err(join_err) => Err(UnitError::Panicked(join_err.to_string())),
    }
}

pub fn read_and_transform(
    source: &Arc<dyn RecordSource>,
    transform: &(dyn Fn(&str) -> String + Send + Sync),
    aggregate: &SharedAggregate<String>,
) -> UnitResult<usize> {
    let mut reader = open_scoped(source)?;
    let mut committed = 0;
    let mut buf = Vec::new();

    loop {
        match next_record(&mut **reader, &mut buf) {
            Ok(false) => break,
            Ok(true) => {
                // невалидный UTF-8 не ошибка ввода-вывода: байты заменяются на U+FFFD
                let record = String::from_utf8_lossy(&buf);
                aggregate.add(transform(&record));
                committed += 1;
            }
            Err(source) => {
                return Err(ReadError {
                    records_committed: committed,
                    source,
                }
                .into())
            }
        }
    }

    Ok(committed)
}

/// Читает одну запись в `buf` без разделителя. Разделитель: `\n`, `\r` или `\r\n`.
/// `false` означает конец потока
fn next_record<R: BufRead + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    let mut started = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(started);
        }
        started = true;

        match available.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(pos) => {
                let lone_cr = available[pos] == b'\r';
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                if lone_cr {
                    skip_lf(reader)?;
                }
                return Ok(true);
            }
            None => {
                let len = available.len();
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

/// Дочитывает `\n` из пары `\r\n`, даже если он попал в следующий буфер
fn skip_lf<R: BufRead + ?Sized>(reader: &mut R) -> io::Result<()> {
    let next_is_lf = loop {
        match reader.fill_buf() {
            Ok(available) => break available.first() == Some(&b'\n'),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    };
    if next_is_lf {
        reader.consume(1);
    }
    Ok(())
}

pub async fn fetch_and_store(
    transport: &dyn Transport,
    url: &str,
    aggregate: &SharedAggregate<String>,
) -> UnitResult<usize> {
    let body = transport.get(url).await?;
    aggregate.add(body);
    Ok(1)
}
