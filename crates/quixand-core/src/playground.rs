//! A pool of prewarmed sandboxes built from one [`crate::sandbox::SandboxConfig`],
//! plus a process-wide registry of live playgrounds consulted by a single
//! signal/exit handler. Grounded in `quixand/core/playground.py::Playground`,
//! generalized from Python's `atexit`+`signal` chaining to Rust's `ctrlc`
//! plus `libc::atexit`, following the teacher's once-installed-singleton
//! pattern for process-wide state (`Lazy` caches in `docker.rs`).

use std::sync::{Arc, Mutex, OnceLock, Weak};

use once_cell::sync::Lazy;

use crate::error::{QuixandError, Result};
use crate::sandbox::{Sandbox, SandboxConfig};

static ACTIVE_PLAYGROUNDS: Lazy<Mutex<Vec<Weak<PlaygroundInner>>>> =
    Lazy::new(|| Mutex::new(Vec::new()));
static HANDLERS_INSTALLED: OnceLock<()> = OnceLock::new();

fn global_cleanup() {
    let registry = ACTIVE_PLAYGROUNDS.lock().unwrap_or_else(|e| e.into_inner());
    for weak in registry.iter() {
        if let Some(inner) = weak.upgrade() {
            inner.cleanup_blocking();
        }
    }
}

/// Installs a `ctrlc` handler and a `libc::atexit` hook exactly once per
/// process, matching `_install_handlers_once`. `ctrlc` itself chains any
/// previously-installed handler, satisfying the "chain prior handlers
/// instead of replacing them" design note.
fn install_handlers_once() {
    HANDLERS_INSTALLED.get_or_init(|| {
        let _ = ctrlc::set_handler(|| {
            global_cleanup();
            std::process::exit(130);
        });

        extern "C" fn at_exit() {
            global_cleanup();
        }
        unsafe {
            libc::atexit(at_exit);
        }
    });
}

struct PlaygroundInner {
    config: SandboxConfig,
    capacity: usize,
    pool: Mutex<Vec<Arc<Sandbox>>>,
    /// Every sandbox this playground has ever created, checked out or not -
    /// mirrors `playground.py`'s `self._all: list[Sandbox]`, consulted by
    /// `close()`/`cleanup_blocking()` so a sandbox handed out via `create()`
    /// and never `release()`d still gets torn down.
    all: Mutex<Vec<Arc<Sandbox>>>,
    prewarmed: std::sync::atomic::AtomicBool,
    closed: std::sync::atomic::AtomicBool,
    rt: tokio::runtime::Handle,
}

impl PlaygroundInner {
    /// Blocking, best-effort teardown used from the signal handler /
    /// `atexit` hook, where there is no `.await` context available.
    fn cleanup_blocking(&self) {
        if self.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.pool.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let sandboxes = std::mem::take(&mut *self.all.lock().unwrap_or_else(|e| e.into_inner()));
        self.rt.block_on(async {
            for sbx in sandboxes {
                let _ = sbx.shutdown().await;
            }
        });
    }
}

pub struct Playground {
    inner: Arc<PlaygroundInner>,
}

impl Playground {
    pub fn new(n: usize, config: SandboxConfig) -> Result<Self> {
        if n == 0 {
            return Err(QuixandError::Unknown("n must be > 0".to_string()));
        }
        install_handlers_once();
        let inner = Arc::new(PlaygroundInner {
            config,
            capacity: n,
            pool: Mutex::new(Vec::new()),
            all: Mutex::new(Vec::new()),
            prewarmed: std::sync::atomic::AtomicBool::new(false),
            closed: std::sync::atomic::AtomicBool::new(false),
            rt: tokio::runtime::Handle::current(),
        });
        ACTIVE_PLAYGROUNDS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&inner));
        Ok(Playground { inner })
    }

    /// Synchronously creates `n` sandboxes and pushes them onto the pool.
    /// Idempotent: a second call is a no-op once prewarming has happened.
    pub async fn prewarm(&self) -> Result<()> {
        if self
            .inner
            .prewarmed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Ok(());
        }
        let needed = self.inner.capacity;
        for _ in 0..needed {
            let sbx = Arc::new(Sandbox::create(self.inner.config.clone()).await?);
            self.inner.all.lock().unwrap_or_else(|e| e.into_inner()).push(sbx.clone());
            self.inner.pool.lock().unwrap_or_else(|e| e.into_inner()).push(sbx);
        }
        Ok(())
    }

    /// Pops a sandbox from the pool, lazily prewarming on first call, and
    /// creating a fresh one on demand if the pool is empty - matches
    /// `Playground.create`'s "fall back to on-demand creation" path.
    pub async fn create(&self) -> Result<Arc<Sandbox>> {
        self.prewarm().await?;

        let popped = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner()).pop();
        if let Some(sbx) = popped {
            return Ok(sbx);
        }

        let sbx = Arc::new(Sandbox::create(self.inner.config.clone()).await?);
        self.inner.all.lock().unwrap_or_else(|e| e.into_inner()).push(sbx.clone());
        Ok(sbx)
    }

    /// Re-pushes `sbx` onto the pool if it still belongs to this
    /// playground and the pool is not full; otherwise the sandbox is
    /// dropped from tracking and the caller may continue to use it.
    pub fn release(&self, sbx: Arc<Sandbox>) {
        let known = self
            .inner
            .all
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|tracked| tracked.id() == sbx.id());
        if !known {
            return;
        }
        let mut pool = self.inner.pool.lock().unwrap_or_else(|e| e.into_inner());
        if pool.len() < self.inner.capacity {
            pool.push(sbx);
        }
    }

    /// Pops a sandbox and runs `f` with it, releasing it back to the pool
    /// on both the success and error paths - the scoped-acquire helper
    /// matching `Playground.acquire`'s context manager.
    pub async fn acquire<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Sandbox>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let sbx = self.create().await?;
        let result = f(sbx.clone()).await;
        self.release(sbx);
        result
    }

    /// Idempotent: shuts down every tracked sandbox (whether sitting in the
    /// pool or still checked out), drains both lists, and de-registers this
    /// playground from the global registry.
    pub async fn close(&self) {
        if self
            .inner
            .closed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        self.inner.pool.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let sandboxes = std::mem::take(&mut *self.inner.all.lock().unwrap_or_else(|e| e.into_inner()));
        for sbx in sandboxes {
            let _ = sbx.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.pool.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
