//! Test doubles shared by unit tests, integration tests and the demo binary.

use crate::calls::media::{CaptureDevice, MediaDevices};
use async_trait::async_trait;
use callcore::{CallSnapshot, CallStateKind, DeviceError, TrackKind};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct DeviceCounters {
    open: AtomicUsize,
    opened_total: AtomicUsize,
    released: AtomicUsize,
    denied: Mutex<HashSet<TrackKind>>,
    enabled: Mutex<HashMap<TrackKind, bool>>,
}

/// In-memory microphone and camera with counters.
///
/// Clones share state, so a test can keep one clone while a controller owns
/// another.
#[derive(Clone, Default)]
pub struct FakeMediaDevices {
    counters: Arc<DeviceCounters>,
}

impl FakeMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opening `kind` fail with a permission error.
    pub fn deny(&self, kind: TrackKind) {
        self.lock_denied().insert(kind);
    }

    /// Devices currently open.
    pub fn open_count(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.counters.opened_total.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// Whether the last opened device of `kind` is producing.
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.lock_enabled().get(&kind).copied().unwrap_or(false)
    }

    fn lock_denied(&self) -> std::sync::MutexGuard<'_, HashSet<TrackKind>> {
        self.counters
            .denied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_enabled(&self) -> std::sync::MutexGuard<'_, HashMap<TrackKind, bool>> {
        self.counters
            .enabled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if self.lock_denied().contains(&kind) {
            return Err(DeviceError::PermissionDenied(kind));
        }
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        self.counters.opened_total.fetch_add(1, Ordering::SeqCst);
        self.lock_enabled().insert(kind, true);
        Ok(Box::new(FakeCaptureDevice {
            kind,
            owner: self.clone(),
            released: AtomicBool::new(false),
        }))
    }
}

pub struct FakeCaptureDevice {
    kind: TrackKind,
    owner: FakeMediaDevices,
    released: AtomicBool,
}

impl CaptureDevice for FakeCaptureDevice {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        if !self.released.load(Ordering::SeqCst) {
            self.owner.lock_enabled().insert(self.kind, enabled);
        }
    }

    fn release(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.owner.counters.open.fetch_sub(1, Ordering::SeqCst);
        self.owner.counters.released.fetch_add(1, Ordering::SeqCst);
        self.owner.lock_enabled().insert(self.kind, false);
    }
}

/// Wait until the watched snapshot satisfies `pred`, or give up after
/// `timeout`.
pub async fn wait_for(
    rx: &mut watch::Receiver<CallSnapshot>,
    timeout: Duration,
    pred: impl Fn(&CallSnapshot) -> bool,
) -> Option<CallSnapshot> {
    let waited = tokio::time::timeout(timeout, rx.wait_for(|s| pred(s))).await;
    match waited {
        Ok(Ok(snapshot)) => Some(snapshot.clone()),
        _ => None,
    }
}

/// Wait until the watched snapshot reaches `state`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<CallSnapshot>,
    state: CallStateKind,
    timeout: Duration,
) -> Option<CallSnapshot> {
    wait_for(rx, timeout, |s| s.state == state).await
}
