// src/session.rs
//! GPS session coordination
//!
//! Owns the session state machine and the two cooperating workers: an
//! ingestion worker that multiplexes the device byte stream with a
//! control channel, and a delivery worker that periodically drains the
//! accumulated fix/satellite state to the consumer callbacks. Both
//! workers share the [`NmeaReader`] accumulator through a single mutex.

use crate::{
    error::{GpsError, Result},
    gps::{
        data::{FixFlags, GpsFix, SvStatus},
        nmea::NmeaReader,
    },
};
use log::{debug, error, warn};
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

/// Callback surface exposed to the consumer of a session.
///
/// `on_location` and `on_sv_status` receive snapshots whose validity is
/// described by their flags; the accumulator's own flags are cleared at
/// the moment the snapshot is taken.
pub trait GpsCallbacks: Send + Sync + 'static {
    fn on_location(&self, fix: &GpsFix);
    fn on_sv_status(&self, status: &SvStatus);
    fn on_session_begin(&self) {}
    fn on_session_end(&self) {}
}

/// Positioning mode accepted by [`GpsSession::set_position_mode`].
/// Only standalone positioning is implemented; the others are accepted
/// for interface compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Standalone,
    MsBased,
    MsAssisted,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Ready = 1,
    Running = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Ready,
            2 => SessionState::Running,
            _ => SessionState::Uninitialized,
        }
    }
}

/// Commands consumed by the ingestion worker's event loop. All run-state
/// transitions go through these so the worker never has its started
/// flag mutated from outside its own task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Quit,
}

/// Sentinel for "no periodic delivery configured".
const INTERVAL_UNSET: i64 = -1;

/// State shared between the session handle and its workers.
struct Shared {
    reader: Mutex<NmeaReader>,
    callbacks: Arc<dyn GpsCallbacks>,
    state: AtomicU8,
    first_fix: AtomicBool,
    /// Delivery interval in seconds; `INTERVAL_UNSET` until configured.
    fix_interval: AtomicI64,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// A GPS session: device stream in, location/satellite callbacks out.
///
/// Lifecycle: `init_*` opens the device and spawns the ingestion worker
/// (`Ready`), `start` begins periodic delivery (`Running`), `stop`
/// suspends it (`Ready`), `cleanup` tears everything down
/// (`Uninitialized`). Dropping the session without `cleanup` also winds
/// the workers down, via the closed control channel.
pub struct GpsSession {
    shared: Option<Arc<Shared>>,
    control: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl GpsSession {
    pub fn new() -> Self {
        Self {
            shared: None,
            control: None,
            worker: None,
        }
    }

    /// Opens a serial GPS device and initializes the session around it.
    pub fn init_serial(
        &mut self,
        port: &str,
        baudrate: u32,
        callbacks: Arc<dyn GpsCallbacks>,
    ) -> Result<()> {
        let device = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| {
                GpsError::Connection(format!("failed to open serial port {}: {}", port, e))
            })?;
        self.init_with_device(device, callbacks)
    }

    /// Initializes the session over an arbitrary byte stream.
    ///
    /// Must be called from within a tokio runtime; the ingestion worker
    /// is spawned here and owns the device for its lifetime.
    pub fn init_with_device<R>(&mut self, device: R, callbacks: Arc<dyn GpsCallbacks>) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if self.shared.is_some() {
            return Err(GpsError::State("session already initialized".to_string()));
        }
        let shared = Arc::new(Shared {
            reader: Mutex::new(NmeaReader::new()),
            callbacks,
            state: AtomicU8::new(SessionState::Ready as u8),
            first_fix: AtomicBool::new(false),
            fix_interval: AtomicI64::new(INTERVAL_UNSET),
        });
        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(ingestion_worker(device, rx, Arc::clone(&shared)));
        self.shared = Some(shared);
        self.control = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    /// Requests periodic delivery. No-op if already running.
    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    /// Suspends periodic delivery. No-op if not running.
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Tears the session down: the ingestion worker is asked to quit and
    /// joined, the device handle is released, and the session returns to
    /// `Uninitialized`. No-op on an uninitialized session.
    pub async fn cleanup(&mut self) -> Result<()> {
        let Some(tx) = self.control.take() else {
            return Ok(());
        };
        if tx.send(Command::Quit).await.is_err() {
            warn!("ingestion worker already gone during cleanup");
        }
        drop(tx);
        if let Some(worker) = self.worker.take() {
            if worker.await.is_err() {
                error!("ingestion worker panicked");
            }
        }
        if let Some(shared) = self.shared.take() {
            shared.set_state(SessionState::Uninitialized);
        }
        debug!("gps session cleaned up");
        Ok(())
    }

    /// Sets the periodic fix interval in seconds. Non-positive values
    /// are coerced to 1.
    pub fn set_fix_interval(&self, seconds: i64) -> Result<()> {
        let shared = self.shared()?;
        let seconds = if seconds <= 0 { 1 } else { seconds };
        shared.fix_interval.store(seconds, Ordering::Relaxed);
        debug!("gps fix interval set to {} secs", seconds);
        Ok(())
    }

    /// Sets the positioning mode and fix interval. Negative intervals
    /// are rejected; 0 requests a single delivery then idles.
    pub fn set_position_mode(&self, _mode: PositionMode, interval: i64) -> Result<()> {
        let shared = self.shared()?;
        if interval < 0 {
            return Err(GpsError::InvalidArgument(format!(
                "negative fix interval {}",
                interval
            )));
        }
        shared.fix_interval.store(interval, Ordering::Relaxed);
        debug!("gps fix interval set to {} secs", interval);
        Ok(())
    }

    /// Assistance hook; accepted but not implemented.
    pub fn inject_time(&self, _utc_ms: i64, _reference_ms: i64, _uncertainty_ms: i64) -> Result<()> {
        Ok(())
    }

    /// Assistance hook; accepted but not implemented.
    pub fn inject_location(&self, _latitude: f64, _longitude: f64, _accuracy: f64) -> Result<()> {
        Ok(())
    }

    /// Assistance hook; accepted but not implemented.
    pub fn delete_aiding_data(&self) {}

    pub fn state(&self) -> SessionState {
        self.shared
            .as_ref()
            .map_or(SessionState::Uninitialized, |s| s.state())
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| GpsError::State("session not initialized".to_string()))
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        let tx = self
            .control
            .as_ref()
            .ok_or_else(|| GpsError::State("session not initialized".to_string()))?;
        tx.send(cmd).await.map_err(|_| {
            warn!("could not send {:?}: control channel closed", cmd);
            GpsError::Channel(format!("control channel closed while sending {:?}", cmd))
        })
    }
}

impl Default for GpsSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Ingestion worker: multiplexes the control channel with the device
/// byte stream, feeding bytes to the accumulator and managing the
/// delivery worker across start/stop transitions. Device EOF or a read
/// error is fatal for the session.
async fn ingestion_worker<R>(
    mut device: R,
    mut control: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
) where
    R: AsyncRead + Send + Unpin,
{
    debug!("gps ingestion worker running");
    let mut buf = [0u8; 512];
    let mut delivery: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            cmd = control.recv() => match cmd {
                Some(Command::Start) => {
                    if delivery.is_none() {
                        debug!("gps session starting");
                        shared.callbacks.on_session_begin();
                        shared.set_state(SessionState::Running);
                        delivery = Some(tokio::spawn(delivery_worker(Arc::clone(&shared))));
                    }
                }
                Some(Command::Stop) => {
                    if let Some(task) = delivery.take() {
                        debug!("gps session stopping");
                        shared.set_state(SessionState::Ready);
                        if task.await.is_err() {
                            error!("delivery worker panicked");
                        }
                        shared.callbacks.on_session_end();
                    }
                }
                Some(Command::Quit) | None => {
                    debug!("gps ingestion worker quitting on demand");
                    break;
                }
            },
            read = device.read(&mut buf) => match read {
                Ok(0) => {
                    error!("gps device stream closed");
                    break;
                }
                Ok(n) => ingest_bytes(&shared, &buf[..n]),
                Err(e) => {
                    error!("gps device read failed: {}", e);
                    break;
                }
            },
        }
    }

    // fatal exit or quit with delivery still active: wind it down so the
    // consumer observes a session end
    if let Some(task) = delivery.take() {
        shared.set_state(SessionState::Ready);
        let _ = task.await;
        shared.callbacks.on_session_end();
    }
    debug!("gps ingestion worker exited");
}

/// Feeds a chunk of device bytes through the line assembler under the
/// accumulator lock, then performs the one-time event-driven first-fix
/// delivery outside it.
fn ingest_bytes(shared: &Shared, bytes: &[u8]) {
    let mut first_fix: Option<GpsFix> = None;
    {
        let mut reader = shared.reader.lock().unwrap();
        for &b in bytes {
            let parsed = reader.put_byte(b);
            if parsed
                && !shared.first_fix.load(Ordering::Relaxed)
                && shared.state() == SessionState::Ready
                && reader.fix.flags.contains(FixFlags::LAT_LONG)
            {
                first_fix = Some(reader.fix.clone());
                reader.fix.flags.clear();
                shared.first_fix.store(true, Ordering::Relaxed);
            }
        }
    }
    if let Some(fix) = first_fix {
        debug!("first gps fix, delivered immediately");
        shared.callbacks.on_location(&fix);
    }
}

/// Delivery worker: periodically drains accumulated fix and satellite
/// state to the consumer while the session is running.
///
/// Holds the accumulator lock only for the snapshot-and-clear step;
/// callbacks are invoked after the lock is released. With no interval
/// configured it polls its loop condition once per second without
/// delivering, which keeps stop latency bounded.
async fn delivery_worker(shared: Arc<Shared>) {
    debug!("gps delivery worker running");
    while shared.state() == SessionState::Running {
        let interval = shared.fix_interval.load(Ordering::Relaxed);
        if interval == INTERVAL_UNSET {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }

        let mut fix = None;
        let mut sv_status = None;
        {
            let mut reader = shared.reader.lock().unwrap();
            if !reader.fix.flags.is_empty() {
                fix = Some(reader.fix.clone());
                reader.fix.flags.clear();
            }
            if reader.sv_status.changed {
                sv_status = Some(reader.sv_status.clone());
                reader.sv_status.changed = false;
            }
        }

        if let Some(fix) = fix {
            shared.callbacks.on_location(&fix);
            shared.first_fix.store(true, Ordering::Relaxed);
            if interval == 0 {
                // one-shot mode: deliver once, then go idle
                let _ = shared.fix_interval.compare_exchange(
                    0,
                    INTERVAL_UNSET,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
        }
        if let Some(status) = sv_status {
            shared.callbacks.on_sv_status(&status);
        }

        tokio::time::sleep(Duration::from_secs(interval.max(1) as u64)).await;
    }
    debug!("gps delivery worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::AsyncWriteExt;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n";
    const GSV: &str = "$GPGSV,1,1,04,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74\n";

    #[derive(Default)]
    struct Recorder {
        fixes: Mutex<Vec<GpsFix>>,
        statuses: Mutex<Vec<SvStatus>>,
        begins: AtomicUsize,
        ends: AtomicUsize,
    }

    impl Recorder {
        fn fix_count(&self) -> usize {
            self.fixes.lock().unwrap().len()
        }

        fn status_count(&self) -> usize {
            self.statuses.lock().unwrap().len()
        }
    }

    impl GpsCallbacks for Recorder {
        fn on_location(&self, fix: &GpsFix) {
            self.fixes.lock().unwrap().push(fix.clone());
        }

        fn on_sv_status(&self, status: &SvStatus) {
            self.statuses.lock().unwrap().push(status.clone());
        }

        fn on_session_begin(&self) {
            self.begins.fetch_add(1, Ordering::Relaxed);
        }

        fn on_session_end(&self) {
            self.ends.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 3s");
    }

    #[tokio::test]
    async fn test_first_fix_delivered_while_ready() {
        let (mut tx, device) = tokio::io::duplex(1024);
        let recorder = Arc::new(Recorder::default());
        let mut session = GpsSession::new();
        session
            .init_with_device(device, recorder.clone())
            .unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        tx.write_all(GGA.as_bytes()).await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.fix_count() == 1).await;

        let fix = recorder.fixes.lock().unwrap()[0].clone();
        assert!(fix.flags.contains(FixFlags::LAT_LONG));
        assert!((fix.latitude - 48.1173).abs() < 1e-4);

        // a second sentence must not trigger another event-driven delivery
        tx.write_all(GGA.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.fix_count(), 1);

        session.cleanup().await.unwrap();
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_periodic_delivery_and_idempotence() {
        let (mut tx, device) = tokio::io::duplex(1024);
        let recorder = Arc::new(Recorder::default());
        let mut session = GpsSession::new();
        session
            .init_with_device(device, recorder.clone())
            .unwrap();
        session.set_fix_interval(1).unwrap();
        session.start().await.unwrap();

        let rec = recorder.clone();
        wait_until(move || rec.begins.load(Ordering::Relaxed) == 1).await;
        assert_eq!(session.state(), SessionState::Running);

        tx.write_all(GGA.as_bytes()).await.unwrap();
        tx.write_all(GSV.as_bytes()).await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.fix_count() >= 1 && rec.status_count() >= 1).await;

        let status = recorder.statuses.lock().unwrap()[0].clone();
        assert_eq!(status.num_svs(), 4);

        // flags were cleared on delivery; with no new data there must be
        // no further callbacks
        let fixes_before = recorder.fix_count();
        let statuses_before = recorder.status_count();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(recorder.fix_count(), fixes_before);
        assert_eq!(recorder.status_count(), statuses_before);

        session.stop().await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.ends.load(Ordering::Relaxed) == 1).await;
        assert_eq!(recorder.begins.load(Ordering::Relaxed), 1);

        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_single_session() {
        let (_tx, device) = tokio::io::duplex(64);
        let recorder = Arc::new(Recorder::default());
        let mut session = GpsSession::new();
        session
            .init_with_device(device, recorder.clone())
            .unwrap();

        session.start().await.unwrap();
        session.start().await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.begins.load(Ordering::Relaxed) >= 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.begins.load(Ordering::Relaxed), 1);

        // stop while running, then stop again as a no-op
        session.stop().await.unwrap();
        session.stop().await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.ends.load(Ordering::Relaxed) >= 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.ends.load(Ordering::Relaxed), 1);

        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_shot_interval_delivers_once_then_idles() {
        let (mut tx, device) = tokio::io::duplex(1024);
        let recorder = Arc::new(Recorder::default());
        let mut session = GpsSession::new();
        session
            .init_with_device(device, recorder.clone())
            .unwrap();
        session
            .set_position_mode(PositionMode::Standalone, 0)
            .unwrap();
        session.start().await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.begins.load(Ordering::Relaxed) == 1).await;

        tx.write_all(GGA.as_bytes()).await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.fix_count() == 1).await;

        // interval 0 is one-shot: after the delivery it reverts to unset
        assert_eq!(
            session.shared().unwrap().fix_interval.load(Ordering::Relaxed),
            INTERVAL_UNSET
        );

        // new data sets flags again, but nothing is scheduled any more
        tx.write_all(GGA.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(recorder.fix_count(), 1);

        session.stop().await.unwrap();
        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_eof_ends_session() {
        let (tx, device) = tokio::io::duplex(64);
        let recorder = Arc::new(Recorder::default());
        let mut session = GpsSession::new();
        session
            .init_with_device(device, recorder.clone())
            .unwrap();
        session.start().await.unwrap();
        let rec = recorder.clone();
        wait_until(move || rec.begins.load(Ordering::Relaxed) == 1).await;

        // hanging up the device is fatal; the consumer sees session end
        drop(tx);
        let rec = recorder.clone();
        wait_until(move || rec.ends.load(Ordering::Relaxed) == 1).await;

        // the worker is gone, so control commands now fail recoverably
        assert!(matches!(session.start().await, Err(GpsError::Channel(_))));
        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_coercion_and_mode_validation() {
        let (_tx, device) = tokio::io::duplex(64);
        let recorder = Arc::new(Recorder::default());
        let mut session = GpsSession::new();
        session
            .init_with_device(device, recorder.clone())
            .unwrap();

        session.set_fix_interval(-5).unwrap();
        assert_eq!(
            session.shared().unwrap().fix_interval.load(Ordering::Relaxed),
            1
        );

        assert!(matches!(
            session.set_position_mode(PositionMode::Standalone, -1),
            Err(GpsError::InvalidArgument(_))
        ));
        session
            .set_position_mode(PositionMode::Standalone, 5)
            .unwrap();
        assert_eq!(
            session.shared().unwrap().fix_interval.load(Ordering::Relaxed),
            5
        );

        // assistance hooks are accepted no-ops
        session.inject_time(0, 0, 0).unwrap();
        session.inject_location(48.0, 11.0, 10.0).unwrap();
        session.delete_aiding_data();

        session.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_uninitialized_session_rejects_control() {
        let session = GpsSession::new();
        assert!(matches!(session.start().await, Err(GpsError::State(_))));
        assert!(matches!(session.set_fix_interval(1), Err(GpsError::State(_))));
    }
}
