//! Key-value store

use std::any::type_name;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes};
use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock};

use super::file::FileImage;
use super::registry::{Persistent, StoreRegistry};
use crate::codec::{Lookup, Object, ObjectCodec, Persist, Storable};
use crate::config::StoreConfig;
use crate::error::{EmberError, Result};
use crate::key::Key;
use crate::scheduler::{BackgroundError, Decision, ErrorSink, Flush, WriteScheduler, WriteState};

/// A stored value
#[derive(Clone)]
enum Slot {
    /// Live value and the name of its runtime type
    Value {
        value: Object,
        type_name: &'static str,
    },
    /// Frame read from disk whose type this process has not registered yet
    ///
    /// Decoded on first typed access; written back unchanged until then.
    Frame(Bytes),
}

impl Slot {
    fn new<T: Storable>(value: T) -> Self {
        Self::Value {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    fn is_frame(&self) -> bool {
        matches!(self, Slot::Frame(_))
    }

    /// Replace a pending frame with its decoded value, if its type is
    /// registered by now
    fn materialize(&mut self, codec: &ObjectCodec) -> Result<()> {
        if let Slot::Frame(frame) = self {
            if let Some(slot) = read_frame(codec, frame)? {
                *self = slot;
            }
        }
        Ok(())
    }

    fn downcast<T: Storable>(&self) -> Result<T> {
        match self {
            Slot::Value { value, type_name: found } => value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(EmberError::TypeMismatch {
                    expected: type_name::<T>(),
                    found: *found,
                }),
            Slot::Frame(_) => Err(EmberError::Serialization(format!(
                "Stored value has a type this codec does not know (requested {})",
                type_name::<T>()
            ))),
        }
    }
}

/// Everything a disk-backed store needs beyond the map
struct DiskState {
    path: PathBuf,
    sync_on_flush: bool,

    /// Bumped after every applied mutation
    mutation_seq: AtomicU64,
    /// Highest `mutation_seq` known to be on disk
    flushed_seq: AtomicU64,

    /// Serializes flushes; held for the whole snapshot + write
    flush_lock: Mutex<()>,
    flush_count: AtomicU64,

    scheduler: WriteScheduler,
    errors: Arc<ErrorSink>,

    registry: Arc<StoreRegistry>,
    registry_id: AtomicU64,
}

impl DiskState {
    fn is_dirty(&self) -> bool {
        self.mutation_seq.load(Ordering::SeqCst) > self.flushed_seq.load(Ordering::SeqCst)
    }
}

pub(crate) struct StoreInner {
    map: RwLock<HashMap<Key, Slot>>,
    version: Mutex<i32>,
    save_delay_ms: AtomicU64,
    codec: Arc<ObjectCodec>,
    /// `None` for memory-only stores
    disk: Option<DiskState>,
}

/// Typed key-value store, optionally backed by a file
///
/// All operations take `&self` and are safe to call from many threads; share
/// a store through an `Arc`. Reads always see the latest in-memory mutation.
/// The save delay only decides when mutations reach the file.
///
/// ## Durability
/// - `save_delay == 0`: every mutation is on disk before the call returns.
/// - `save_delay > 0`: the first unflushed mutation arms a timer; everything
///   mutated before it fires goes out in one rewrite.
/// - [`save`](Store::save) flushes immediately on the calling thread.
/// - [`StoreRegistry::shutdown`] and dropping the store flush what is pending.
///
/// Memory-only stores treat every persistence call as a no-op.
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Open a store as described by `config`
    ///
    /// A configured path is created (with its parent directory) if missing;
    /// an existing non-empty file is decoded into the store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let path = match config.path.clone() {
            Some(path) => path,
            None => return Ok(Self::with_codec(config.codec, config.save_delay)),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (version, map) = match FileImage::read(&path)? {
            Some(image) => decode_image(&config.codec, image)?,
            None => {
                OpenOptions::new().create(true).append(true).open(&path)?;
                (0, HashMap::new())
            }
        };

        let entries = map.len();
        let registry = Arc::clone(&config.registry);
        let errors = Arc::new(ErrorSink::new(
            path.clone(),
            config.background_error_capacity,
        ));

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let target: Weak<dyn Flush> = weak.clone();
            StoreInner {
                map: RwLock::new(map),
                version: Mutex::new(version),
                save_delay_ms: AtomicU64::new(duration_ms(config.save_delay)),
                codec: Arc::clone(&config.codec),
                disk: Some(DiskState {
                    path: path.clone(),
                    sync_on_flush: config.sync_on_flush,
                    mutation_seq: AtomicU64::new(0),
                    flushed_seq: AtomicU64::new(0),
                    flush_lock: Mutex::new(()),
                    flush_count: AtomicU64::new(0),
                    scheduler: WriteScheduler::new(target, Arc::clone(&errors)),
                    errors,
                    registry: Arc::clone(&registry),
                    registry_id: AtomicU64::new(0),
                }),
            }
        });

        let weak: Weak<StoreInner> = Arc::downgrade(&inner);
        let persistent: Weak<dyn Persistent> = weak;
        let id = registry.register(persistent);
        if let Some(disk) = &inner.disk {
            disk.registry_id.store(id, Ordering::SeqCst);
        }

        tracing::info!(
            "Opened store {} ({} entries, version {})",
            path.display(),
            entries,
            version
        );

        Ok(Self { inner })
    }

    /// Create a memory-only store
    pub fn memory() -> Self {
        Self::with_codec(ObjectCodec::shared(), crate::config::DEFAULT_SAVE_DELAY)
    }

    fn with_codec(codec: Arc<ObjectCodec>, save_delay: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                map: RwLock::new(HashMap::new()),
                version: Mutex::new(0),
                save_delay_ms: AtomicU64::new(duration_ms(save_delay)),
                codec,
                disk: None,
            }),
        }
    }

    /// Open `path` and populate `template` from its default-key value
    ///
    /// If the file holds no default value, `template` is left as is and
    /// stored as the default value. `None` is rejected before the file
    /// is touched.
    pub fn load<T: Persist>(path: impl AsRef<Path>, template: Option<&mut T>) -> Result<Self> {
        let config = StoreConfig::builder().path(path.as_ref()).build();
        Self::load_with_config(config, template)
    }

    /// [`load`](Store::load) with an explicit configuration
    pub fn load_with_config<T: Persist>(
        config: StoreConfig,
        template: Option<&mut T>,
    ) -> Result<Self> {
        let template = template.ok_or_else(missing_template)?;
        config.codec.ensure_registered::<T>()?;

        let store = Self::open(config)?;
        store.load_into(Some(template))?;
        Ok(store)
    }

    /// Copy the default-key value into `template`, or store `template` as
    /// the default value if there is none
    pub fn load_into<T: Persist>(&self, template: Option<&mut T>) -> Result<()> {
        let template = template.ok_or_else(missing_template)?;
        *template = self.get_and_put_default(template.clone())?;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Number of entries
    pub fn size(&self) -> usize {
        self.inner.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.read().is_empty()
    }

    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.inner.map.read().contains_key(key.as_ref())
    }

    /// Snapshot of the present keys, in no particular order
    pub fn keys(&self) -> Vec<Key> {
        self.inner.map.read().keys().cloned().collect()
    }

    /// Value stored under `key`
    ///
    /// Fails with `TypeMismatch` if the stored value is not a `T`. A value
    /// loaded from disk under a type name this process has not seen yet is
    /// decoded once `T` is registered with the codec, or after a
    /// [`get_and_put`](Store::get_and_put) of that type.
    pub fn get<T: Storable>(&self, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        let key = key.as_ref();
        {
            let map = self.inner.map.read();
            match map.get(key) {
                None => return Ok(None),
                Some(slot) if !slot.is_frame() => return slot.downcast::<T>().map(Some),
                Some(_) => {}
            }
        }

        let mut map = self.inner.map.write();
        match map.get_mut(key) {
            Some(slot) => {
                slot.materialize(&self.inner.codec)?;
                slot.downcast::<T>().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Value stored under the default key
    pub fn get_default<T: Storable>(&self) -> Result<Option<T>> {
        self.get(Key::default_key())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Return the value under `key`, storing `default` first if it is absent
    ///
    /// Atomic: of several concurrent callers racing on an absent key, exactly
    /// one stores its default and all of them get that value back.
    pub fn get_and_put<T: Persist>(&self, key: impl Into<Key>, default: T) -> Result<T> {
        self.inner.prepare::<T>()?;

        let value = {
            let mut map = self.inner.map.write();
            match map.entry(key.into()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().materialize(&self.inner.codec)?;
                    return entry.get().downcast::<T>();
                }
                Entry::Vacant(entry) => {
                    entry.insert(Slot::new(default.clone()));
                    default
                }
            }
        };

        self.inner.after_mutation()?;
        Ok(value)
    }

    /// [`get_and_put`](Store::get_and_put) on the default key
    pub fn get_and_put_default<T: Persist>(&self, default: T) -> Result<T> {
        self.get_and_put(Key::default_key(), default)
    }

    /// Insert or replace the value under `key`
    pub fn put<T: Persist>(&self, key: impl Into<Key>, value: T) -> Result<()> {
        self.inner.prepare::<T>()?;
        self.inner.insert(key.into(), Slot::new(value));
        self.inner.after_mutation()
    }

    /// Insert or replace the value under the default key
    pub fn put_default<T: Persist>(&self, value: T) -> Result<()> {
        self.put(Key::default_key(), value)
    }

    /// Insert a value whose type was registered with a custom serializer
    ///
    /// Disk-backed stores reject types the codec does not know.
    pub fn put_registered<T: Storable>(&self, key: impl Into<Key>, value: T) -> Result<()> {
        if self.inner.disk.is_some() && !self.inner.codec.is_registered::<T>() {
            return Err(EmberError::InvalidArgument(format!(
                "{} is not registered with the codec",
                type_name::<T>()
            )));
        }
        self.inner.insert(key.into(), Slot::new(value));
        self.inner.after_mutation()
    }

    /// Insert or replace, then [`save`](Store::save)
    pub fn put_and_save<T: Persist>(&self, key: impl Into<Key>, value: T) -> Result<()> {
        self.inner.prepare::<T>()?;
        self.inner.insert(key.into(), Slot::new(value));
        self.inner.touch();
        self.save()
    }

    /// Remove `key`
    ///
    /// Always returns `true`, whether or not the key was present.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let removed = self.inner.map.write().remove(key.as_ref()).is_some();
        if removed {
            self.inner.after_mutation()?;
        }
        Ok(true)
    }

    /// Store version scalar
    pub fn version(&self) -> i32 {
        *self.inner.version.lock()
    }

    pub fn set_version(&self, version: i32) -> Result<()> {
        *self.inner.version.lock() = version;
        self.inner.after_mutation()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the current state to disk now, cancelling any armed timer
    ///
    /// Blocks until the file has been replaced or the write failed. If a
    /// flush already in progress covers every mutation, the file is not
    /// written a second time.
    pub fn save(&self) -> Result<()> {
        let Some(disk) = &self.inner.disk else {
            return Ok(());
        };
        let seen = disk.flush_count.load(Ordering::SeqCst);
        disk.scheduler.cancel();
        self.inner.flush_to_disk(FlushMode::Save { seen })
    }

    /// Flush pending writes, stop the timer and leave the registry
    pub fn close(self) -> Result<()> {
        let result = self.inner.shutdown();
        self.inner.deregister();
        result
    }

    /// Backing file, `None` for memory-only stores
    pub fn file(&self) -> Option<&Path> {
        self.inner.disk.as_ref().map(|d| d.path.as_path())
    }

    /// Size of the backing file in bytes (0 if there is none)
    pub fn file_size(&self) -> u64 {
        self.file()
            .and_then(|path| fs::metadata(path).ok())
            .map_or(0, |m| m.len())
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.disk.is_some()
    }

    /// Whether mutations are waiting to be written
    pub fn has_write_waiting(&self) -> bool {
        self.inner.disk.as_ref().map_or(false, DiskState::is_dirty)
    }

    pub fn writer_state(&self) -> WriteState {
        match &self.inner.disk {
            Some(disk) if disk.flush_lock.is_locked() => WriteState::Flushing,
            Some(disk) if disk.is_dirty() => WriteState::DirtyPending,
            _ => WriteState::Clean,
        }
    }

    /// Debounce window, always zero for memory-only stores
    pub fn save_delay(&self) -> Duration {
        if self.inner.disk.is_none() {
            return Duration::ZERO;
        }
        Duration::from_millis(self.inner.save_delay_ms.load(Ordering::SeqCst))
    }

    /// Change the debounce window
    ///
    /// An already armed timer keeps its deadline. Zero makes every later
    /// mutation write through; negative values are rejected. Memory-only
    /// stores ignore the new value.
    pub fn set_save_delay(&self, ms: i64) -> Result<()> {
        let ms = u64::try_from(ms).map_err(|_| {
            EmberError::InvalidArgument(format!("save delay must not be negative: {}", ms))
        })?;
        if self.inner.disk.is_some() {
            self.inner.save_delay_ms.store(ms, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Number of successful flushes since open
    pub fn flush_count(&self) -> u64 {
        self.inner
            .disk
            .as_ref()
            .map_or(0, |d| d.flush_count.load(Ordering::SeqCst))
    }

    /// Failures of timer-triggered flushes
    pub fn background_errors(&self) -> Option<Receiver<BackgroundError>> {
        self.inner.disk.as_ref().map(|d| d.errors.subscribe())
    }

    /// Codec used for this store's values
    pub fn codec(&self) -> &Arc<ObjectCodec> {
        &self.inner.codec
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("file", &self.file())
            .field("entries", &self.size())
            .field("version", &self.version())
            .field("state", &self.writer_state())
            .finish()
    }
}

// =============================================================================
// Inner
// =============================================================================

impl StoreInner {
    /// Make sure a disk-backed store can encode `T`
    fn prepare<T: Persist>(&self) -> Result<()> {
        if self.disk.is_some() {
            self.codec.ensure_registered::<T>()?;
        }
        Ok(())
    }

    fn insert(&self, key: Key, slot: Slot) {
        self.map.write().insert(key, slot);
    }

    /// Count a mutation that has already been applied
    fn touch(&self) {
        if let Some(disk) = &self.disk {
            disk.mutation_seq.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn after_mutation(&self) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        self.touch();

        let delay = Duration::from_millis(self.save_delay_ms.load(Ordering::SeqCst));
        match disk.scheduler.on_mutation(delay) {
            Decision::FlushNow => self.flush_to_disk(FlushMode::IfDirty),
            Decision::Armed | Decision::AlreadyArmed => Ok(()),
        }
    }

    /// Rewrite the file with the current state
    fn flush_to_disk(&self, mode: FlushMode) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        let _guard = disk.flush_lock.lock();

        // Everything counted here was applied to the map before the snapshot
        let seq = disk.mutation_seq.load(Ordering::SeqCst);
        let clean = seq <= disk.flushed_seq.load(Ordering::SeqCst);
        let skip = match mode {
            FlushMode::IfDirty => clean,
            FlushMode::Save { seen } => clean && disk.flush_count.load(Ordering::SeqCst) > seen,
        };
        if skip {
            return Ok(());
        }

        let image = self.snapshot()?;
        let written = image.write_atomic(&disk.path, disk.sync_on_flush)?;

        disk.flushed_seq.fetch_max(seq, Ordering::SeqCst);
        disk.flush_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "Flushed {} entries ({} bytes) to {}",
            image.records.len(),
            written,
            disk.path.display()
        );
        Ok(())
    }

    /// Encode the current state, keys in sorted order
    fn snapshot(&self) -> Result<FileImage> {
        let version = *self.version.lock();
        let mut slots: Vec<(Key, Slot)> = self
            .map
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let bytes = match slot {
                Slot::Value { value, .. } => self.codec.write_object(Some(&*value))?,
                Slot::Frame(frame) => frame,
            };
            records.push((key, bytes));
        }
        Ok(FileImage::new(version, records))
    }

    fn deregister(&self) {
        if let Some(disk) = &self.disk {
            let id = disk.registry_id.swap(0, Ordering::SeqCst);
            if id != 0 {
                disk.registry.deregister(id);
            }
        }
    }
}

impl Flush for StoreInner {
    fn flush(&self) -> Result<()> {
        self.flush_to_disk(FlushMode::IfDirty)
    }
}

impl Persistent for StoreInner {
    fn shutdown(&self) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        disk.scheduler.stop();
        self.flush_to_disk(FlushMode::IfDirty)
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let Some(disk) = &self.disk else {
            return;
        };
        disk.scheduler.stop();
        if disk.is_dirty() {
            if let Err(e) = self.flush_to_disk(FlushMode::IfDirty) {
                tracing::warn!(
                    "Dropping store {} with unsaved changes: {}",
                    disk.path.display(),
                    e
                );
            }
        }
        self.deregister();
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// When `flush_to_disk` writes
#[derive(Debug, Clone, Copy)]
enum FlushMode {
    /// Only if there are unflushed mutations
    IfDirty,
    /// Always, unless a flush completed after `flush_count` was `seen`
    /// and nothing changed since
    Save { seen: u64 },
}

fn decode_image(codec: &ObjectCodec, image: FileImage) -> Result<(i32, HashMap<Key, Slot>)> {
    let mut map = HashMap::with_capacity(image.records.len());
    let mut pending = 0;

    for (key, frame) in image.records {
        let slot = read_frame(codec, &frame).map_err(|e| {
            EmberError::Serialization(format!("Cannot decode value of key {:?}: {}", key, e))
        })?;
        match slot {
            Some(slot) => {
                if slot.is_frame() {
                    pending += 1;
                }
                map.insert(key, slot);
            }
            None => tracing::debug!("Skipping null value for key {:?}", key),
        }
    }

    if pending > 0 {
        tracing::debug!("{} values wait for their types to be registered", pending);
    }
    Ok((image.version, map))
}

/// Decode one stored frame, keeping it raw if its type is unknown here
///
/// `Ok(None)` for null.
fn read_frame(codec: &ObjectCodec, frame: &Bytes) -> Result<Option<Slot>> {
    let mut input: &[u8] = frame;
    let slot = match codec.read_known(&mut input)? {
        Lookup::Null => return Ok(None),
        Lookup::Unknown => return Ok(Some(Slot::Frame(frame.clone()))),
        Lookup::Decoded(decoded) => Slot::Value {
            value: decoded.value,
            type_name: decoded.type_name,
        },
    };

    if input.has_remaining() {
        return Err(EmberError::Serialization(format!(
            "{} trailing bytes after value",
            input.remaining()
        )));
    }
    Ok(Some(slot))
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn missing_template() -> EmberError {
    EmberError::InvalidArgument("root template must not be None".to_string())
}
