// packages/pipeline/src/logger.rs
//! Logger façade
//!
//! Owns the page context and the writer collection for one request. The
//! instrumentation layer only ever calls `page()` and `write()`; nothing it
//! does can make a backend failure propagate back to it.
//!
//! With `closeOnPanic`, writers are closed whenever a panic starts. The
//! panic may still be caught, so the façade stays live: the next `write`
//! rebuilds the writers from configuration before delivering.

use crate::model::{Event, PageContext};
use crate::utils::config::{LoggerConfig, WriterEntry};
use crate::utils::errors::Result;
use crate::writers::{WriteSummary, WriterCollection};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Façades that want their writers closed when a panic starts
static PANIC_REGISTRY: OnceCell<Mutex<Vec<Weak<Shared>>>> = OnceCell::new();

/// State reachable from both the façade and the panic hook
struct Shared {
    collection: Mutex<WriterCollection>,

    /// Entries the collection was built from, kept for reopening
    entries: Vec<WriterEntry>,

    /// Set by `stop`; never cleared
    stopped: AtomicBool,

    /// Set when a panic closed the writers; cleared by the next reopen
    interrupted: AtomicBool,
}

impl Shared {
    /// Close the collection once. Never panics and never fails.
    fn shutdown(&self, collection: &mut WriterCollection) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        close_quietly(collection);
    }

    /// Close writers for a panic without ending the façade
    fn interrupt(&self, collection: &mut WriterCollection) {
        if self.stopped.load(Ordering::SeqCst) || self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }

        close_quietly(collection);
    }

    /// Replace a collection closed by a panic with a freshly opened one
    fn reopen(&self, collection: &mut WriterCollection) {
        if !self.interrupted.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut fresh = WriterCollection::new();
        match fresh.init(&self.entries).and_then(|_| fresh.open()) {
            Ok(()) => {
                info!("Reopened {} writers after panic", fresh.len());
                *collection = fresh;
            }
            Err(e) => {
                error!("Failed to reopen writers after panic: {}", e);
                self.interrupted.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn close_quietly(collection: &mut WriterCollection) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| collection.close()));
    if outcome.is_err() {
        error!("Writer shutdown panicked; remaining writers abandoned");
    }
}

/// Entry point for the instrumentation layer
pub struct AspectLogger {
    page: Arc<PageContext>,
    shared: Arc<Shared>,
}

impl AspectLogger {
    /// Build the writer collection from `config` and open it.
    ///
    /// Fails only when no configured writer survives `init` and `open`.
    pub fn init(config: &LoggerConfig, page: PageContext) -> Result<Self> {
        let mut collection = WriterCollection::new();
        collection.init(&config.writers)?;
        collection.open()?;

        info!("Aspect logger started for {} with {} writers", page.uri, collection.len());

        let shared = Arc::new(Shared {
            collection: Mutex::new(collection),
            entries: config.writers.clone(),
            stopped: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        });

        if config.close_on_panic {
            register_for_panics(Arc::downgrade(&shared));
        }

        Ok(Self {
            page: Arc::new(page),
            shared,
        })
    }

    /// Page context events should reference
    pub fn page(&self) -> Arc<PageContext> {
        Arc::clone(&self.page)
    }

    /// Deliver an event to every live writer. Ignored once stopped.
    pub fn write(&self, event: &Event) -> WriteSummary {
        if self.is_stopped() {
            warn!("Dropping {}::{} after stop", event.class, event.action);
            return WriteSummary::default();
        }

        let mut collection = self.shared.collection.lock();
        self.shared.reopen(&mut collection);
        collection.write(event)
    }

    /// Close every writer. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.is_stopped() {
            return;
        }

        let mut collection = self.shared.collection.lock();
        self.shared.shutdown(&mut collection);

        info!("Aspect logger stopped for {}", self.page.uri);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Number of live writers
    pub fn writer_count(&self) -> usize {
        self.shared.collection.lock().len()
    }
}

impl Drop for AspectLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Add a façade to the panic registry, installing the hook on first use
fn register_for_panics(shared: Weak<Shared>) {
    let registry = PANIC_REGISTRY.get_or_init(|| {
        install_panic_hook();
        Mutex::new(Vec::new())
    });

    let mut registered = registry.lock();
    registered.retain(|entry| entry.strong_count() > 0);
    registered.push(shared);
}

/// Chain a hook that closes registered writers before the previous hook runs
fn install_panic_hook() {
    let previous = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let live: Vec<Arc<Shared>> = match PANIC_REGISTRY.get().and_then(|registry| registry.try_lock()) {
            Some(registered) => registered.iter().filter_map(Weak::upgrade).collect(),
            None => Vec::new(),
        };

        for shared in live {
            // The panicking thread may hold the lock mid-write
            match shared.collection.try_lock() {
                Some(mut collection) => shared.interrupt(&mut collection),
                None => debug!("Writers busy during panic; skipping close"),
            }
        }

        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamMap;
    use crate::utils::errors::LoggerError;
    use chrono::Utc;
    use tempfile::tempdir;

    fn config(entries: Vec<WriterEntry>, close_on_panic: bool) -> LoggerConfig {
        LoggerConfig {
            writers: entries,
            close_on_panic,
            ..LoggerConfig::default()
        }
    }

    fn file_entry(path: &std::path::Path) -> WriterEntry {
        WriterEntry::new("file").with("path", path.to_string_lossy().to_string())
    }

    #[test]
    fn test_write_reaches_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let logger = AspectLogger::init(
            &config(vec![file_entry(&path)], false),
            PageContext::new("/checkout", Utc::now()),
        )
        .unwrap();

        let event = Event::new(logger.page(), "Foo", "bar").with_params(ParamMap::new().with("x", 1i64));
        let summary = logger.write(&event);
        assert_eq!(summary, WriteSummary { delivered: 1, failed: 0 });

        logger.stop();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\t class\tFoo\n"));
        assert!(contents.contains("\t action\tbar\n"));
        assert!(contents.contains("{\"x\":1}"));
    }

    #[test]
    fn test_page_is_shared() {
        let dir = tempdir().unwrap();
        let logger = AspectLogger::init(
            &config(vec![file_entry(&dir.path().join("log.txt"))], false),
            PageContext::new("/a", Utc::now()),
        )
        .unwrap();

        assert!(Arc::ptr_eq(&logger.page(), &logger.page()));
        assert_eq!(logger.page().uri, "/a");
    }

    #[test]
    fn test_init_without_usable_writers() {
        let result = AspectLogger::init(
            &config(vec![WriterEntry::new("teletype")], false),
            PageContext::new("/", Utc::now()),
        );
        assert!(matches!(result, Err(LoggerError::NoWriters(_))));
    }

    #[test]
    fn test_init_with_all_writers_failing_open() {
        let dir = tempdir().unwrap();
        let result = AspectLogger::init(
            &config(vec![file_entry(&dir.path().join("missing").join("log.txt"))], false),
            PageContext::new("/", Utc::now()),
        );
        assert!(matches!(result, Err(LoggerError::NoWriters(_))));
    }

    #[test]
    fn test_stop_is_idempotent_and_ends_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let logger = AspectLogger::init(
            &config(vec![file_entry(&path)], false),
            PageContext::new("/", Utc::now()),
        )
        .unwrap();

        logger.stop();
        logger.stop();
        assert!(logger.is_stopped());

        let summary = logger.write(&Event::new(logger.page(), "Foo", "bar"));
        assert_eq!(summary, WriteSummary::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_drop_stops() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");

        {
            let logger = AspectLogger::init(
                &config(vec![file_entry(&path)], false),
                PageContext::new("/", Utc::now()),
            )
            .unwrap();
            logger.write(&Event::new(logger.page(), "Foo", "bar"));
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("Action captured:").count(), 1);
    }

    #[test]
    fn test_recovered_panic_keeps_logging() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let logger = AspectLogger::init(
            &config(vec![file_entry(&path)], true),
            PageContext::new("/", Utc::now()),
        )
        .unwrap();

        logger.write(&Event::new(logger.page(), "Foo", "before"));

        let worker = std::thread::spawn(|| panic!("worker aborted"));
        assert!(worker.join().is_err());
        assert!(!logger.is_stopped());

        let summary = logger.write(&Event::new(logger.page(), "Foo", "after"));
        assert_eq!(summary, WriteSummary { delivered: 1, failed: 0 });

        let caught = panic::catch_unwind(|| panic!("request aborted"));
        assert!(caught.is_err());

        let summary = logger.write(&Event::new(logger.page(), "Foo", "again"));
        assert_eq!(summary.delivered, 1);

        logger.stop();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("Action captured:").count(), 3);
        assert!(contents.contains("\t action\tafter\n"));
    }

    #[test]
    fn test_panic_registry_drops_dead_loggers() {
        let dir = tempdir().unwrap();
        let entries = || config(vec![file_entry(&dir.path().join("log.txt"))], true);

        let dropped: Vec<Weak<Shared>> = (0..3)
            .map(|_| {
                let logger = AspectLogger::init(&entries(), PageContext::new("/", Utc::now())).unwrap();
                Arc::downgrade(&logger.shared)
            })
            .collect();

        let logger = AspectLogger::init(&entries(), PageContext::new("/", Utc::now())).unwrap();

        let registered = PANIC_REGISTRY.get().unwrap().lock();
        assert!(registered.iter().any(|entry| entry.as_ptr() == Arc::as_ptr(&logger.shared)));
        for dead in &dropped {
            assert!(!registered.iter().any(|entry| entry.ptr_eq(dead)));
        }
    }
}
