//! Local media capture.
//!
//! Capture backends plug in through [`MediaDevices`]. [`LocalMedia`] owns the
//! opened devices for one call and releases them on every exit path: explicit
//! [`LocalMedia::release`], drop after a failed or cancelled operation, or
//! teardown of the call.

use async_trait::async_trait;
use callcore::{DeviceError, MediaConstraints, TrackKind};
use log::{debug, info};

/// A source of capture devices (microphone, camera).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the device for `kind`.
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, DeviceError>;
}

/// An opened capture device producing one track.
pub trait CaptureDevice: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Start or stop producing frames without releasing the device.
    fn set_enabled(&self, enabled: bool);

    /// Release the underlying device. Called at most once.
    fn release(&mut self);
}

/// Tracks captured for one call.
pub struct LocalMedia {
    devices: Vec<Box<dyn CaptureDevice>>,
    released: bool,
}

impl LocalMedia {
    /// Open every device the constraints ask for.
    ///
    /// All-or-nothing: if one device fails, those already opened are released
    /// before the error is returned.
    pub async fn acquire(
        devices: &dyn MediaDevices,
        constraints: MediaConstraints,
    ) -> Result<Self, DeviceError> {
        if constraints.is_empty() {
            return Err(DeviceError::NothingRequested);
        }

        let mut media = LocalMedia {
            devices: Vec::new(),
            released: false,
        };
        for kind in constraints.kinds() {
            // On error `media` drops here and releases what was opened.
            let device = devices.open(kind).await?;
            debug!("Opened local {kind} device");
            media.devices.push(device);
        }
        Ok(media)
    }

    pub fn kinds(&self) -> Vec<TrackKind> {
        self.devices.iter().map(|d| d.kind()).collect()
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.devices.iter().any(|d| d.kind() == kind)
    }

    /// Returns false if no track of that kind was captured.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        match self.devices.iter().find(|d| d.kind() == kind) {
            Some(device) => {
                device.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release all devices. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for device in &mut self.devices {
            device.release();
        }
        if !self.devices.is_empty() {
            info!("Released {} local media device(s)", self.devices.len());
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("kinds", &self.kinds())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMediaDevices;

    #[tokio::test]
    async fn test_acquire_opens_requested_kinds() {
        let devices = FakeMediaDevices::new();
        let media = LocalMedia::acquire(&devices, MediaConstraints::video())
            .await
            .unwrap();
        assert_eq!(media.kinds(), vec![TrackKind::Audio, TrackKind::Video]);
        assert_eq!(devices.open_count(), 2);

        drop(media);
        assert_eq!(devices.open_count(), 0);
        assert_eq!(devices.released_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_releases_opened_devices() {
        let devices = FakeMediaDevices::new();
        devices.deny(TrackKind::Video);

        let err = LocalMedia::acquire(&devices, MediaConstraints::video())
            .await
            .unwrap_err();
        assert_eq!(err, DeviceError::PermissionDenied(TrackKind::Video));
        assert_eq!(devices.opened_total(), 1);
        assert_eq!(devices.open_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_requested() {
        let devices = FakeMediaDevices::new();
        let none = MediaConstraints {
            audio: false,
            video: false,
        };
        assert_eq!(
            LocalMedia::acquire(&devices, none).await.unwrap_err(),
            DeviceError::NothingRequested
        );
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_toggles_reach_device() {
        let devices = FakeMediaDevices::new();
        let mut media = LocalMedia::acquire(&devices, MediaConstraints::audio())
            .await
            .unwrap();

        assert!(media.set_enabled(TrackKind::Audio, false));
        assert!(!devices.is_enabled(TrackKind::Audio));
        assert!(!media.set_enabled(TrackKind::Video, false));

        media.release();
        media.release();
        drop(media);
        assert_eq!(devices.released_count(), 1);
    }
}
