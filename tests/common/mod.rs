#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    io::{self, BufReader, Cursor, Read},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use workpool::{errors::FetchError, resource::RecordReader, RecordSource, Transport};

/// Источник в памяти со счётчиками open/release
pub struct MemorySource {
    name: String,
    lines: Vec<String>,
    fail_after: Option<usize>,
    open_delay: Duration,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
}

impl MemorySource {
    pub fn new(name: &str, lines: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            lines,
            fail_after: None,
            open_delay: Duration::ZERO,
            opened: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn numbered(name: &str, count: usize) -> Self {
        Self::new(name, (0..count).map(|i| format!("{name} line {i}")).collect())
    }

    /// Отдаёт первые `n` строк, потом ошибку чтения
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FailAfter {
    data: Cursor<Vec<u8>>,
}

impl Read for FailAfter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated read fault"));
        }
        Ok(n)
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> io::Result<RecordReader> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        match self.fail_after {
            Some(n) => {
                let text: String = self.lines[..n].iter().map(|l| format!("{l}\n")).collect();
                Ok(Box::new(BufReader::new(FailAfter {
                    data: Cursor::new(text.into_bytes()),
                })))
            }
            None => Ok(Box::new(Cursor::new(self.lines.join("\n").into_bytes()))),
        }
    }

    fn release(&self, reader: RecordReader) {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(reader);
    }
}

pub fn as_source(source: &Arc<MemorySource>) -> Arc<dyn RecordSource> {
    source.clone()
}

/// Транспорт, который отвечает после паузы, а на адреса из `failing` отдаёт ошибку
pub struct ScriptedTransport {
    pub delay: Duration,
    pub failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(delay: Duration, failing: Vec<String>) -> Self {
        Self {
            delay,
            failing,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing.iter().any(|f| f == url) {
            return Err(FetchError::Transport {
                url: url.to_string(),
                message: "connection reset by peer".into(),
            });
        }
        Ok(format!("body of {url}"))
    }
}
