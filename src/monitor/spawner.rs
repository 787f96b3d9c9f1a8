use std::io;
use std::thread::{self, JoinHandle};

pub type WatcherBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts the watcher's background thread.
pub trait WatcherSpawner: Send + Sync {
    fn spawn(&self, name: String, body: WatcherBody) -> io::Result<JoinHandle<()>>;
}

/// Spawns a named OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl WatcherSpawner for ThreadSpawner {
    fn spawn(&self, name: String, body: WatcherBody) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(body)
    }
}
