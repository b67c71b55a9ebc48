use super::alloc::{Allocation, Allocator, DeviceBuffer, Readback};
use super::event::{Clock, Event};
use super::model::{DeviceKind, Properties};
use super::Error;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

type Body = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

struct Command {
    event: Event,
    body: Body,
}

/// Handle to a device.
///
/// Owns exactly one in-order command queue, one memory allocator and the
/// device properties. Every allocation, copy and kernel launch enqueues
/// work without implicit synchronization; callers order work by waiting
/// on the returned events.
///
/// Construct once and share the `Arc`. All methods take `&self` and are
/// safe to call from multiple threads.
pub struct Device {
    properties: Properties,
    clock: Clock,
    allocator: Mutex<Allocator>,
    queue: Option<flume::Sender<Command>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "parallel")]
fn build_pool(properties: &Properties) -> Result<rayon::ThreadPool, Error> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(properties.compute_units)
        .thread_name(|idx| format!("compute-unit-{idx}"))
        .build()
        .map_err(|err| Error::Setup(err.to_string()))
}

fn execute(body: Body, #[cfg(feature = "parallel")] pool: &rayon::ThreadPool) -> Result<(), String> {
    let run = std::panic::AssertUnwindSafe(body);
    #[cfg(feature = "parallel")]
    let result = pool.install(|| std::panic::catch_unwind(run));
    #[cfg(not(feature = "parallel"))]
    let result = std::panic::catch_unwind(run);

    match result {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("command panicked: {message}"))
        }
    }
}

impl Device {
    /// Create a device with the given properties.
    pub fn new(properties: Properties) -> Result<Arc<Self>, Error> {
        if properties.compute_units == 0 {
            return Err(Error::Setup("device needs at least one compute unit".into()));
        }
        let clock = Clock::new();
        let (sender, receiver) = flume::unbounded::<Command>();

        #[cfg(feature = "parallel")]
        let pool = build_pool(&properties)?;

        let worker = std::thread::Builder::new()
            .name(format!("{}-queue", properties.name))
            .spawn(move || {
                for Command { event, body } in receiver.iter() {
                    log::trace!("running {event}");
                    event.mark_running(clock.now());
                    #[cfg(feature = "parallel")]
                    let result = execute(body, &pool);
                    #[cfg(not(feature = "parallel"))]
                    let result = execute(body);
                    if let Err(ref message) = result {
                        log::debug!("{event} faulted: {message}");
                    }
                    event.complete(clock.now(), result);
                }
            })
            .map_err(|err| Error::Setup(err.to_string()))?;

        log::debug!(
            "created {} device {:?} with {} compute units and {} global memory",
            properties.kind,
            properties.name,
            properties.compute_units,
            human_bytes::human_bytes(properties.global_memory_bytes as f64),
        );

        Ok(Arc::new(Self {
            allocator: Mutex::new(Allocator::new(properties.global_memory_bytes)),
            properties,
            clock,
            queue: Some(sender),
            worker: Some(worker),
        }))
    }

    /// Host-emulated device with default properties.
    pub fn host() -> Result<Arc<Self>, Error> {
        Self::new(Properties::host())
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.properties.name
    }

    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.properties.kind
    }

    #[must_use]
    pub fn work_group_size(&self) -> usize {
        self.properties.work_group_size
    }

    #[must_use]
    pub fn compute_units(&self) -> usize {
        self.properties.compute_units
    }

    #[must_use]
    pub fn has_local_memory(&self) -> bool {
        self.properties.local_memory
    }

    #[must_use]
    pub fn local_memory_bytes(&self) -> usize {
        if self.properties.local_memory {
            self.properties.local_memory_bytes
        } else {
            0
        }
    }

    #[must_use]
    pub fn global_memory_bytes(&self) -> u64 {
        self.properties.global_memory_bytes
    }

    /// Bytes currently reserved by live allocations.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocator.lock().reserved_bytes()
    }

    /// Snapshot of the live allocations.
    #[must_use]
    pub fn allocations(&self) -> Vec<Allocation> {
        let allocator = self.allocator.lock();
        allocator
            .allocations()
            .iter()
            .map(|(_, allocation)| allocation.clone())
            .collect()
    }

    /// Current device clock in nanoseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Enqueue a command and return its completion handle immediately.
    fn enqueue(&self, name: impl Into<String>, body: Body) -> Result<Event, Error> {
        let queue = self.queue.as_ref().ok_or(Error::QueueClosed)?;
        let event = Event::new(name, self.clock.now());
        queue
            .send(Command {
                event: event.clone(),
                body,
            })
            .map_err(|_| Error::QueueClosed)?;
        Ok(event)
    }

    /// Reserve device memory for `count` zero-initialized elements.
    pub fn allocate<T>(&self, count: usize) -> Result<DeviceBuffer<T>, Error>
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        self.allocate_named(count, None::<String>)
    }

    pub fn allocate_named<T>(
        &self,
        count: usize,
        name: Option<impl Into<String>>,
    ) -> Result<DeviceBuffer<T>, Error>
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        let num_bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .map_or(u64::MAX, |bytes| bytes as u64);
        let allocation = self
            .allocator
            .lock()
            .allocate(num_bytes, name.map(Into::into))?;

        let mut storage: Vec<T> = Vec::new();
        if storage.try_reserve_exact(count).is_err() {
            self.allocator
                .lock()
                .deallocate(allocation.id, allocation.start_addr)?;
            return Err(Error::Allocation {
                requested: num_bytes,
                available: self
                    .global_memory_bytes()
                    .saturating_sub(self.allocated_bytes()),
            });
        }
        storage.resize(count, T::default());

        log::debug!("allocated {allocation}");
        Ok(DeviceBuffer {
            allocation: Arc::new(allocation),
            storage: Arc::new(RwLock::new(storage)),
            offset: 0,
            len: count,
        })
    }

    /// Release the memory of a buffer.
    ///
    /// Operations referencing the buffer must have been waited on.
    /// Releasing the same allocation twice yields [`Error::InvalidBuffer`].
    pub fn deallocate<T>(&self, buffer: DeviceBuffer<T>) -> Result<(), Error> {
        let allocation = self
            .allocator
            .lock()
            .deallocate(buffer.allocation.id, buffer.allocation.start_addr)?;
        log::debug!("freed {allocation}");
        Ok(())
    }

    /// Byte offset of a buffer view relative to its backing allocation.
    #[must_use]
    pub fn offset<T>(&self, buffer: &DeviceBuffer<T>) -> isize {
        buffer.byte_offset()
    }

    /// Enqueue a host to device copy of `count` elements.
    ///
    /// The host data is staged before returning, so `src` may be reused
    /// right away. The device write completes asynchronously.
    pub fn copy_to_device<T>(
        &self,
        src: &[T],
        dst: &DeviceBuffer<T>,
        count: usize,
    ) -> Result<Event, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        if count > src.len() || count > dst.len() {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: count,
                capacity: src.len().min(dst.len()),
            });
        }
        let staged = src[..count].to_vec();
        let dst = dst.clone();
        self.enqueue(
            format!("copy_to_device({count})"),
            Box::new(move || {
                dst.write()[..count].clone_from_slice(&staged);
                Ok(())
            }),
        )
    }

    /// Enqueue a device to host copy of the first `count` elements.
    pub fn copy_to_host<T>(&self, src: &DeviceBuffer<T>, count: usize) -> Result<Readback<T>, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        if count > src.len() {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: count,
                capacity: src.len(),
            });
        }
        let data = Arc::new(Mutex::new(None));
        let (src, dst) = (src.clone(), Arc::clone(&data));
        let event = self.enqueue(
            format!("copy_to_host({count})"),
            Box::new(move || {
                *dst.lock() = Some(src.read()[..count].to_vec());
                Ok(())
            }),
        )?;
        Ok(Readback { event, data })
    }

    /// Enqueue a kernel.
    ///
    /// An `Err` returned by `body` (or a panic) faults the returned event.
    pub fn launch<F>(&self, name: impl Into<String>, body: F) -> Result<Event, Error>
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        self.enqueue(name, Box::new(body))
    }

    /// Block until all given events completed.
    ///
    /// Returns the first device fault among them, after waiting for all.
    pub fn wait<'a, I>(&self, events: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut fault = None;
        for event in events {
            event.wait();
            if fault.is_none() {
                fault = event.result().err();
            }
        }
        fault.map_or(Ok(()), Err)
    }

    /// Block until every command enqueued so far has completed.
    pub fn wait_idle(&self) -> Result<(), Error> {
        let marker = self.enqueue("barrier", Box::new(|| Ok(())))?;
        marker.wait();
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // closing the channel lets the worker drain the queue and exit
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("device queue worker of {:?} panicked", self.properties.name);
            }
        }
        let live = self.allocator.lock().allocations().len();
        if live > 0 {
            log::warn!(
                "device {:?} dropped with {live} live allocations",
                self.properties.name,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Device;
    use crate::model::Properties;
    use crate::Error;
    use color_eyre::eyre;
    use std::sync::Arc;

    fn small_device(global_memory_bytes: u64) -> eyre::Result<Arc<Device>> {
        crate::tests::init_test();
        let properties = Properties {
            name: "test".to_string(),
            compute_units: 2,
            global_memory_bytes,
            ..Properties::host()
        };
        Ok(Device::new(properties)?)
    }

    #[test]
    fn copy_round_trip() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let buffer = device.allocate::<f32>(8)?;
        assert_eq!(buffer.size_bytes(), 32);

        let host: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let upload = device.copy_to_device(&host, &buffer, host.len())?;
        device.wait([&upload])?;

        let readback = device.copy_to_host(&buffer, 8)?;
        assert_eq!(readback.wait()?, host);
        device.deallocate(buffer)?;
        assert_eq!(device.allocated_bytes(), 0);
        Ok(())
    }

    #[test]
    fn view_offsets_are_consistent() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let buffer = device.allocate::<f64>(16)?;
        let view = buffer.view(4, 8)?;
        assert_eq!(device.offset(&buffer), 0);
        assert_eq!(device.offset(&view), 32);
        assert_eq!(view.addr(), buffer.addr() + 32);
        assert_eq!(view.size_bytes(), 64);
        assert!(view.same_allocation(&buffer));

        let nested = view.view(2, 2)?;
        assert_eq!(device.offset(&nested), 48);
        assert!(matches!(view.view(4, 5), Err(Error::OutOfBounds { .. })));

        let upload = device.copy_to_device(&[1.0, 2.0], &nested, 2)?;
        device.wait([&upload])?;
        let all = device.copy_to_host(&buffer, 16)?.wait()?;
        assert_eq!(&all[6..8], &[1.0, 2.0]);
        device.deallocate(buffer)?;
        Ok(())
    }

    #[test]
    fn oversized_allocation_fails_cleanly() -> eyre::Result<()> {
        let device = small_device(1024)?;
        let err = device.allocate::<f64>(1024).unwrap_err();
        assert!(matches!(err, Error::Allocation { requested: 8192, .. }));
        // device stays usable
        let buffer = device.allocate::<f64>(16)?;
        device.deallocate(buffer)?;
        Ok(())
    }

    #[test]
    fn overflowing_allocation_size_fails_cleanly() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let err = device.allocate::<f32>(usize::MAX / 4).unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }));
        let err = device.allocate::<f64>(usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            Error::Allocation {
                requested: u64::MAX,
                ..
            }
        ));
        assert_eq!(device.allocated_bytes(), 0);
        let buffer = device.allocate::<f32>(4)?;
        device.deallocate(buffer)?;
        Ok(())
    }

    #[test]
    fn double_deallocate_is_an_error() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let buffer = device.allocate::<u8>(4)?;
        let alias = buffer.clone();
        device.deallocate(buffer)?;
        assert!(matches!(
            device.deallocate(alias),
            Err(Error::InvalidBuffer { .. })
        ));
        Ok(())
    }

    #[test]
    fn faulted_launch_is_reported_by_wait() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let ok = device.launch("ok", || Ok(()))?;
        let bad = device.launch("bad", || Err("invalid kernel arguments".to_string()))?;
        let panics = device.launch("panics", || panic!("boom"))?;
        let err = device.wait([&ok, &bad, &panics]).unwrap_err();
        assert_eq!(
            err,
            Error::DeviceFault {
                command: "bad".to_string(),
                message: "invalid kernel arguments".to_string()
            }
        );
        assert!(ok.is_complete() && panics.is_complete());
        assert!(panics.result().is_err());
        Ok(())
    }

    #[test]
    fn wait_idle_drains_queue() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let events: Vec<_> = (0..4)
            .map(|_| {
                device.launch("sleep", || {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    Ok(())
                })
            })
            .collect::<Result<_, _>>()?;
        device.wait_idle()?;
        assert!(events.iter().all(crate::Event::is_complete));
        Ok(())
    }

    #[test]
    fn profiling_timestamps_are_ordered() -> eyre::Result<()> {
        let device = small_device(1 << 20)?;
        let event = device.launch("sleep", || {
            std::thread::sleep(std::time::Duration::from_millis(2));
            Ok(())
        })?;
        device.wait([&event])?;
        let profiling = event.profiling().unwrap();
        assert!(profiling.queued <= profiling.start);
        assert!(profiling.start <= profiling.end);
        assert!(profiling.elapsed_nanos() >= 2_000_000);
        Ok(())
    }

    #[test]
    fn concurrent_allocations_are_tracked() -> eyre::Result<()> {
        let device = small_device(1 << 24)?;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let device = Arc::clone(&device);
                std::thread::spawn(move || -> Result<(), Error> {
                    for _ in 0..16 {
                        let buffer = device.allocate::<f32>(64)?;
                        device.deallocate(buffer)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join")?;
        }
        assert_eq!(device.allocated_bytes(), 0);
        assert!(device.allocations().is_empty());
        Ok(())
    }
}
