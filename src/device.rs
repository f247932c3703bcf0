//! Worker pool standing in for the device that runs the pipeline kernels.
//!
//! A kernel is a closure over an item index. A launch splits `0..len` into
//! contiguous work groups, runs one pool job per group and blocks until every
//! group has finished, so consecutive launches are separated by a full
//! barrier. Kernels must be `'static`: whatever they read is shared through
//! `Arc` and only written by the host between launches.

use std::ops::Range;
use std::sync::{mpsc, Arc};

use threadpool::ThreadPool;

use crate::error::DeviceError;

/// Work groups queued per worker, small enough to keep stragglers short.
const GROUPS_PER_WORKER: usize = 4;

pub struct Device {
    pool: ThreadPool,
}

impl Device {
    /// Spawns `workers` threads, 0 picks the available parallelism.
    pub fn new(workers: usize) -> Self {
        let workers = match workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };
        let pool = threadpool::Builder::new()
            .num_threads(workers)
            .thread_name(String::from("raster-worker"))
            .build();
        log::debug!("device started with {} workers", workers);
        return Self { pool };
    }

    pub fn workers(&self) -> usize {
        return self.pool.max_count();
    }

    /// Contiguous item ranges, one per work group.
    fn work_groups(&self, len: usize) -> Vec<Range<usize>> {
        if len == 0 {
            return Vec::new();
        }
        let groups = self.workers() * GROUPS_PER_WORKER;
        let group_size = (len + groups - 1) / groups;
        return (0..len)
            .step_by(group_size)
            .map(|start| start..(start + group_size).min(len))
            .collect();
    }

    /// Runs `kernel` for every slot of `dst` and stores each result in its slot.
    pub fn map_into<T, F>(&self, name: &'static str, dst: &mut [T], kernel: F) -> Result<(), DeviceError>
    where
        T: Send + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        return self.map_with(name, dst.len(), kernel, |i, value| dst[i] = value);
    }

    /// Runs `kernel` for every item in `0..len` and hands each result to
    /// `store` on the host, which may write it anywhere it owns.
    pub fn map_with<T, F, S>(&self, name: &'static str, len: usize, kernel: F, mut store: S) -> Result<(), DeviceError>
    where
        T: Send + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
        S: FnMut(usize, T),
    {
        let groups = self.work_groups(len);
        let launched = groups.len();
        let kernel = Arc::new(kernel);
        let (sender, receiver) = mpsc::channel();
        for group in groups {
            let sender = sender.clone();
            let kernel = Arc::clone(&kernel);
            self.pool.execute(move || {
                let start = group.start;
                let results: Vec<T> = group.map(|i| kernel(i)).collect();
                // The host keeps the receiver alive until every group reported.
                let _ = sender.send((start, results));
            });
        }
        drop(sender);

        // Ends once every job dropped its sender, i.e. finished or panicked.
        let mut completed = 0;
        for (start, results) in receiver.iter() {
            for (offset, value) in results.into_iter().enumerate() {
                store(start + offset, value);
            }
            completed += 1;
        }
        return self.finish(name, completed, launched);
    }

    /// Runs `kernel` for every item in `0..len` for its side effects.
    pub fn launch<F>(&self, name: &'static str, len: usize, kernel: F) -> Result<(), DeviceError>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let groups = self.work_groups(len);
        let launched = groups.len();
        let kernel = Arc::new(kernel);
        let (sender, receiver) = mpsc::channel();
        for group in groups {
            let sender = sender.clone();
            let kernel = Arc::clone(&kernel);
            self.pool.execute(move || {
                for i in group {
                    kernel(i);
                }
                let _ = sender.send(());
            });
        }
        drop(sender);

        let completed = receiver.iter().count();
        return self.finish(name, completed, launched);
    }

    /// Barrier closing a launch, turns missing groups into an error.
    fn finish(&self, name: &'static str, completed: usize, launched: usize) -> Result<(), DeviceError> {
        self.pool.join();
        if completed != launched {
            log::error!("kernel `{}` lost {} of {} work groups", name, launched - completed, launched);
            return Err(DeviceError::KernelFailed {
                kernel: name,
                completed,
                launched,
            });
        }
        log::trace!("kernel `{}` finished {} work groups", name, launched);
        return Ok(());
    }
}

/// Host-side write access to a buffer kernels read through `Arc`.
///
/// Fails when a kernel still holds the buffer, which means a launch was not
/// followed by its barrier.
pub fn host_mut<'a, T>(buffer: &'a mut Arc<T>, name: &'static str) -> Result<&'a mut T, DeviceError> {
    return Arc::get_mut(buffer).ok_or(DeviceError::BufferBusy(name));
}
