//! Потокобезопасный накопитель результатов
//!
//! `add` линеаризуем: каждая запись атомарна относительно всех остальных.
//! Читать `len`/`snapshot` до закрытия барьера можно только для мониторинга.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SharedAggregate<T> {
    items: Mutex<Vec<T>>,
    added: AtomicUsize,
}

impl<T> Default for SharedAggregate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedAggregate<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            added: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn add(&self, item: T) {
        let mut items = self.items.lock();
        items.push(item);
        self.added.fetch_add(1, Ordering::Release);
    }

    /// Количество записей без захвата блокировки
    #[inline]
    pub fn len(&self) -> usize {
        self.added.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Забирает всё накопленное. Вызывать после закрытия барьера
    pub fn take(&self) -> Vec<T> {
        let mut items = self.items.lock();
        self.added.store(0, Ordering::Release);
        std::mem::take(&mut *items)
    }
}

impl<T: Clone> SharedAggregate<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}
