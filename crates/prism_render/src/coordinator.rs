//! Background asset loads and their handoff to the render thread.
//!
//! One load runs at a time on a named worker thread. The worker parses the
//! asset, builds every geometry index and the new scene index, then sends the
//! prepared result through a single-slot channel. Nothing the worker builds is
//! visible to the render thread until [`AssetSwapCoordinator::poll`] picks the
//! result up, quiesces the device and hands it to the caller's swap.
//!
//! ```text
//! Idle -> Running -> Swapping -> Done
//!            \           \
//!             +-> Error   +-> Error
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use prism_accel::{
    GeometryId, GeometryIndexBuilder, InstanceRecord, Primitive, SceneIndex, SceneIndexError,
};
use prism_core::{AssetKind, AssetLoader, EnvironmentMap, LoadError, LoadedAsset, SceneDescription};
use prism_gpu::{Device, DeviceError};
use prism_math::Mat4Ext;
use thiserror::Error;

use crate::renderer::RenderError;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("a load is already in progress")]
    Busy,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Index(#[from] SceneIndexError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("load cancelled")]
    Cancelled,

    #[error("load worker exited without a result")]
    WorkerLost,
}

impl SwapError {
    pub fn is_device_lost(&self) -> bool {
        match self {
            SwapError::Index(e) => e.is_device_lost(),
            SwapError::Device(e) => *e == DeviceError::Lost,
            SwapError::Render(e) => e.is_device_lost(),
            _ => false,
        }
    }
}

/// Session-wide flag that suppresses render dispatch while a load is in flight.
#[derive(Debug, Clone, Default)]
pub struct BusyGate(Arc<AtomicBool>);

impl BusyGate {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, busy: bool) {
        self.0.store(busy, Ordering::Release);
    }
}

/// Cooperative cancellation flag checked by the worker between stages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<(), SwapError> {
        if self.is_cancelled() {
            Err(SwapError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Running,
    Swapping,
    Done,
    Error(String),
}

impl LoadState {
    pub fn is_finished(&self) -> bool {
        matches!(self, LoadState::Done | LoadState::Error(_))
    }
}

/// Caller's view of one accepted load.
#[derive(Debug, Clone)]
pub struct LoadTaskHandle {
    path: PathBuf,
    kind: AssetKind,
    state: Arc<Mutex<LoadState>>,
    cancel: CancellationToken,
}

impl LoadTaskHandle {
    fn new(path: PathBuf, kind: AssetKind) -> Self {
        Self {
            path,
            kind,
            state: Arc::new(Mutex::new(LoadState::Running)),
            cancel: CancellationToken::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn state(&self) -> LoadState {
        self.state.lock().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: LoadState) {
        *self.state.lock() = state;
    }
}

/// A fully built asset waiting for the render thread.
pub enum PreparedAsset {
    Scene {
        scene: SceneDescription,
        index: SceneIndex,
        /// Primitives dropped because their geometry index failed to build
        skipped: usize,
    },
    Environment(EnvironmentMap),
}

impl PreparedAsset {
    pub fn kind(&self) -> AssetKind {
        match self {
            PreparedAsset::Scene { .. } => AssetKind::Scene,
            PreparedAsset::Environment(_) => AssetKind::Environment,
        }
    }
}

type LoadOutcome = Result<PreparedAsset, SwapError>;

struct PendingLoad {
    handle: LoadTaskHandle,
    receiver: Receiver<LoadOutcome>,
    ready: Option<LoadOutcome>,
    thread: Option<JoinHandle<()>>,
}

impl PendingLoad {
    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Load worker for {} panicked", self.handle.path.display());
            }
        }
    }
}

pub struct AssetSwapCoordinator {
    device: Device,
    loader: Arc<dyn AssetLoader>,
    gate: BusyGate,
    pending: Option<PendingLoad>,
    last: Option<LoadTaskHandle>,
}

impl AssetSwapCoordinator {
    pub fn new(device: &Device, loader: Arc<dyn AssetLoader>) -> Self {
        Self {
            device: device.clone(),
            loader,
            gate: BusyGate::default(),
            pending: None,
            last: None,
        }
    }

    pub fn gate(&self) -> &BusyGate {
        &self.gate
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// The load in flight, or else the most recent one.
    pub fn current(&self) -> Option<&LoadTaskHandle> {
        self.pending
            .as_ref()
            .map(|p| &p.handle)
            .or(self.last.as_ref())
    }

    /// State of the load in flight. `Idle` once the last one has been reconciled.
    pub fn state(&self) -> LoadState {
        self.pending
            .as_ref()
            .map(|p| p.handle.state())
            .unwrap_or(LoadState::Idle)
    }

    /// Terminal state of the most recently reconciled load.
    pub fn last_state(&self) -> Option<LoadState> {
        self.last.as_ref().map(|h| h.state())
    }

    /// Start loading `path` on the worker.
    ///
    /// Refused with [`SwapError::Busy`] while another load is in flight, and
    /// with [`SwapError::Load`] when the loader does not recognise the path.
    /// Neither refusal touches the gate.
    pub fn request_load(&mut self, path: &Path) -> Result<LoadTaskHandle, SwapError> {
        if self.gate.is_busy() {
            log::warn!("Load of {} refused: another load is in progress", path.display());
            return Err(SwapError::Busy);
        }
        let kind = self.loader.classify(path)?;

        let handle = LoadTaskHandle::new(path.to_path_buf(), kind);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.gate.set(true);

        let worker = LoadWorker {
            device: self.device.clone(),
            loader: self.loader.clone(),
            path: handle.path.clone(),
            kind,
            cancel: handle.cancel.clone(),
        };
        let spawned = thread::Builder::new()
            .name("prism-asset-load".to_string())
            .spawn(move || worker.run(sender));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.gate.set(false);
                return Err(LoadError::Io(e).into());
            }
        };

        log::info!("Loading {:?} from {}", kind, path.display());
        self.pending = Some(PendingLoad {
            handle: handle.clone(),
            receiver,
            ready: None,
            thread: Some(thread),
        });
        Ok(handle)
    }

    /// Ask the in-flight load to stop at its next checkpoint.
    ///
    /// A result that is already waiting is discarded by the next [`poll`](Self::poll).
    pub fn cancel(&self) -> bool {
        match &self.pending {
            Some(pending) => {
                log::info!("Cancelling load of {}", pending.handle.path.display());
                pending.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Block up to `timeout` for the worker to finish. Returns true if a result is waiting.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        if pending.ready.is_some() {
            return true;
        }
        match pending.receiver.recv_timeout(timeout) {
            Ok(outcome) => {
                pending.ready = Some(outcome);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                pending.ready = Some(Err(SwapError::WorkerLost));
                true
            }
        }
    }

    /// The device idle barrier taken before any destructive swap.
    pub fn quiesce(&self) -> Result<(), DeviceError> {
        log::debug!("Quiescing device before swap");
        self.device.wait_idle()
    }

    /// Reconcile a finished load with the render thread. Never blocks on the worker.
    ///
    /// On a prepared result the device is quiesced and `apply` performs the
    /// swap. Either way the gate is cleared and the task reaches a terminal
    /// state. Returns `None` when nothing finished since the last call.
    pub fn poll<F>(&mut self, apply: F) -> Option<Result<AssetKind, SwapError>>
    where
        F: FnOnce(PreparedAsset) -> Result<(), SwapError>,
    {
        let pending = self.pending.as_mut()?;
        let outcome = match pending.ready.take() {
            Some(outcome) => outcome,
            None => match pending.receiver.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => Err(SwapError::WorkerLost),
            },
        };

        let mut pending = self.pending.take()?;
        pending.join();
        let handle = pending.handle;

        let result = outcome.and_then(|prepared| {
            // Cancelled after the worker finished; the prepared asset is discarded
            handle.cancel.check()?;
            handle.set_state(LoadState::Swapping);
            let kind = prepared.kind();
            self.quiesce()?;
            apply(prepared)?;
            Ok(kind)
        });

        match &result {
            Ok(kind) => {
                log::info!("Swapped in {:?} from {}", kind, handle.path.display());
                handle.set_state(LoadState::Done);
            }
            Err(e) => {
                log::error!("Load of {} failed: {}", handle.path.display(), e);
                handle.set_state(LoadState::Error(e.to_string()));
            }
        }
        self.gate.set(false);
        self.last = Some(handle);
        Some(result)
    }
}

impl Drop for AssetSwapCoordinator {
    fn drop(&mut self) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        pending.handle.cancel();
        // A loader stuck in I/O would block the join; let it finish on its own
        match pending.thread.as_ref().map(|t| t.is_finished()) {
            Some(true) => pending.join(),
            Some(false) => log::debug!(
                "Detaching load worker for {}",
                pending.handle.path.display()
            ),
            None => {}
        }
    }
}

struct LoadWorker {
    device: Device,
    loader: Arc<dyn AssetLoader>,
    path: PathBuf,
    kind: AssetKind,
    cancel: CancellationToken,
}

impl LoadWorker {
    fn run(self, sender: Sender<LoadOutcome>) {
        let outcome = self.load();
        if sender.send(outcome).is_err() {
            log::debug!("Load of {} finished after the session went away", self.path.display());
        }
    }

    fn load(&self) -> LoadOutcome {
        self.cancel.check()?;
        let asset = self.loader.load(&self.path, self.kind)?;
        self.cancel.check()?;

        match asset {
            LoadedAsset::Environment(map) => Ok(PreparedAsset::Environment(map)),
            LoadedAsset::Scene(scene) => {
                let (index, skipped) = build_scene_index(&self.device, &scene, &self.cancel)?;
                Ok(PreparedAsset::Scene {
                    scene,
                    index,
                    skipped,
                })
            }
        }
    }
}

/// Build the geometry indices and the scene index for `scene`.
///
/// A primitive whose geometry fails to upload or build is dropped along with
/// the instances that place it, as is an instance with a singular transform;
/// device loss aborts. Returns the index and the
/// number of primitives dropped.
pub fn build_scene_index(
    device: &Device,
    scene: &SceneDescription,
    cancel: &CancellationToken,
) -> Result<(SceneIndex, usize), SwapError> {
    let mut uploaded = Vec::with_capacity(scene.primitives.len());
    let mut sources = Vec::with_capacity(scene.primitives.len());
    for (i, primitive) in scene.primitives.iter().enumerate() {
        match Primitive::from_scene(device, primitive) {
            Ok(p) => {
                uploaded.push(p);
                sources.push(i);
            }
            Err(DeviceError::Lost) => return Err(DeviceError::Lost.into()),
            Err(e) => log::warn!("Skipping primitive '{}': {}", primitive.name, e),
        }
    }
    cancel.check()?;

    let builder = GeometryIndexBuilder::new(device);
    let mut remap: Vec<Option<usize>> = vec![None; scene.primitives.len()];
    let mut handles = Vec::with_capacity(uploaded.len());
    for (result, source) in builder.build_all(&uploaded).into_iter().zip(sources) {
        match result {
            Ok(handle) => {
                remap[source] = Some(handles.len());
                handles.push(handle);
            }
            Err(e) if e.is_device_lost() => return Err(DeviceError::Lost.into()),
            Err(e) => log::warn!("Skipping primitive: {}", e),
        }
    }
    let skipped = scene.primitives.len() - handles.len();
    cancel.check()?;

    let mut instances = Vec::with_capacity(scene.instances.len());
    for (i, instance) in scene.instances.iter().enumerate() {
        match remap.get(instance.primitive).copied().flatten() {
            Some(geometry)
                if !(instance.transform * handles[geometry].transform()).is_invertible() =>
            {
                log::warn!("Dropping instance {}: transform is not invertible", i)
            }
            Some(geometry) => instances.push(InstanceRecord {
                geometry: GeometryId(geometry),
                transform: instance.transform,
                instance_id: i as u32,
            }),
            None => log::warn!(
                "Dropping instance {}: primitive {} has no geometry",
                i,
                instance.primitive
            ),
        }
    }

    let index = SceneIndex::build(device, handles, &instances)?;
    Ok((index, skipped))
}
