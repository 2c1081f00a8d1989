//! Scoped-захват ресурсов юнита
//!
//! `ResourceScope` освобождает ресурс ровно один раз на любом пути выхода:
//! обычное завершение, ранний `return`, `?` или паника (через `Drop` при раскрутке).

use super::errors::UnitError;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    sync::Arc,
};

type Release<R> = Box<dyn FnOnce(R) + Send>;

pub struct ResourceScope<R> {
    resource: Option<R>,
    release: Option<Release<R>>,
}

impl<R> ResourceScope<R> {
    /// Освобождение = обычный `drop`
    pub fn new(resource: R) -> Self {
        Self {
            resource: Some(resource),
            release: None,
        }
    }

    pub fn with_release<F>(resource: R, release: F) -> Self
    where
        F: FnOnce(R) + Send + 'static,
    {
        Self {
            resource: Some(resource),
            release: Some(Box::new(release)),
        }
    }

    pub fn acquire<E, A>(acquire: A) -> Result<Self, E>
    where
        A: FnOnce() -> Result<R, E>,
    {
        acquire().map(Self::new)
    }

    /// Явное досрочное освобождение; `Drop` после него ничего не делает
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(resource) = self.resource.take() {
            match self.release.take() {
                Some(release) => release(resource),
                None => drop(resource),
            }
        }
    }
}

impl<R> Deref for ResourceScope<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("resource is held until the scope ends")
    }
}

impl<R> DerefMut for ResourceScope<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("resource is held until the scope ends")
    }
}

impl<R> Drop for ResourceScope<R> {
    fn drop(&mut self) {
        self.release_once();
    }
}

pub type RecordReader = Box<dyn BufRead + Send>;

/// Источник текстовых записей: конечная ленивая последовательность строк.
/// Каждый юнит открывает свой экземпляр reader'а, разделять их нельзя
pub trait RecordSource: Send + Sync + 'static {
    fn name(&self) -> String;

    fn open(&self) -> io::Result<RecordReader>;

    fn release(&self, reader: RecordReader) {
        drop(reader);
    }
}

/// Открывает источник внутри `ResourceScope`, освобождение идёт через `RecordSource::release`
pub fn open_scoped(source: &Arc<dyn RecordSource>) -> Result<ResourceScope<RecordReader>, UnitError> {
    let reader = source
        .open()
        .map_err(|source_err| UnitError::ResourceAcquisition {
            resource: source.name(),
            source: source_err,
        })?;
    let owner = Arc::clone(source);
    Ok(ResourceScope::with_release(reader, move |r| owner.release(r)))
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> io::Result<RecordReader> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}
