// xtrabackup-assistant/src/transfer/memory.rs
// In-memory remote backend with fault injection.
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Connector, RemoteEntry, RemoteSession, REMOTE_DIR_MODE};

#[derive(Default)]
struct State {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeMap<PathBuf, i32>,
    fail_write_after: Option<usize>,
    fail_read_after: Option<usize>,
    fail_list: HashSet<PathBuf>,
    refuse: bool,
    connects: usize,
}

impl State {
    fn is_dir(&self, path: &Path) -> bool {
        path == Path::new("/") || self.dirs.contains_key(path)
    }

    fn add_dir_all(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor != Path::new("/") && !ancestor.as_os_str().is_empty() {
                self.dirs.entry(ancestor.to_path_buf()).or_insert(REMOTE_DIR_MODE);
            }
        }
    }
}

/// Shared handle to the fake filesystem; clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<State>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        MemoryFs::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_dir(&self, path: &str) {
        self.lock().add_dir_all(Path::new(path));
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let path = PathBuf::from(path);
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            state.add_dir_all(parent);
        }
        state.files.insert(path, content.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(Path::new(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().is_dir(Path::new(path))
    }

    pub fn dir_mode(&self, path: &str) -> Option<i32> {
        self.lock().dirs.get(Path::new(path)).copied()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Next upload writes `bytes` and then loses the connection.
    pub fn fail_write_after(&self, bytes: usize) {
        self.lock().fail_write_after = Some(bytes);
    }

    /// Next download reads `bytes` and then loses the connection.
    pub fn fail_read_after(&self, bytes: usize) {
        self.lock().fail_read_after = Some(bytes);
    }

    pub fn fail_list(&self, path: &str) {
        self.lock().fail_list.insert(PathBuf::from(path));
    }

    pub fn refuse_connections(&self) {
        self.lock().refuse = true;
    }
}

pub struct MemoryConnector {
    fs: MemoryFs,
}

impl MemoryConnector {
    pub fn new(fs: MemoryFs) -> Self {
        MemoryConnector { fs }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> io::Result<Box<dyn RemoteSession>> {
        let mut state = self.fs.lock();
        if state.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        state.connects += 1;
        Ok(Box::new(MemorySession {
            fs: self.fs.clone(),
            dead: false,
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemorySession {
    fs: MemoryFs,
    dead: bool,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

impl MemorySession {
    fn check(&self) -> io::Result<()> {
        if self.dead {
            Err(io::Error::new(io::ErrorKind::NotConnected, "session is dead"))
        } else {
            Ok(())
        }
    }
}

impl RemoteSession for MemorySession {
    fn read_dir(&mut self, path: &Path) -> io::Result<Vec<RemoteEntry>> {
        self.check()?;
        let state = self.fs.lock();
        if state.fail_list.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "listing denied"));
        }
        if !state.is_dir(path) {
            return Err(not_found(path));
        }

        let dirs = state
            .dirs
            .keys()
            .filter(|d| d.parent() == Some(path))
            .map(|d| RemoteEntry { path: d.clone(), size: 0, is_dir: true });
        let files = state
            .files
            .iter()
            .filter(|(f, _)| f.parent() == Some(path))
            .map(|(f, data)| RemoteEntry { path: f.clone(), size: data.len() as u64, is_dir: false });
        Ok(dirs.chain(files).collect())
    }

    fn stat(&mut self, path: &Path) -> io::Result<RemoteEntry> {
        self.check()?;
        let state = self.fs.lock();
        if let Some(data) = state.files.get(path) {
            return Ok(RemoteEntry { path: path.to_path_buf(), size: data.len() as u64, is_dir: false });
        }
        if state.is_dir(path) {
            return Ok(RemoteEntry { path: path.to_path_buf(), size: 0, is_dir: true });
        }
        Err(not_found(path))
    }

    fn mkdir(&mut self, path: &Path, mode: i32) -> io::Result<()> {
        self.check()?;
        let mut state = self.fs.lock();
        if !path.parent().is_some_and(|p| state.is_dir(p)) {
            return Err(not_found(path));
        }
        if state.is_dir(path) || state.files.contains_key(path) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "exists"));
        }
        state.dirs.insert(path.to_path_buf(), mode);
        Ok(())
    }

    fn create(&mut self, path: &Path) -> io::Result<Box<dyn Write + '_>> {
        self.check()?;
        let fail_after = {
            let mut state = self.fs.lock();
            if !path.parent().is_some_and(|p| state.is_dir(p)) {
                return Err(not_found(path));
            }
            state.files.insert(path.to_path_buf(), Vec::new());
            state.fail_write_after.take()
        };
        Ok(Box::new(MemoryWriter {
            fs: self.fs.clone(),
            path: path.to_path_buf(),
            written: 0,
            fail_after,
            dead: &mut self.dead,
        }))
    }

    fn open(&mut self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        self.check()?;
        let mut state = self.fs.lock();
        let data = state.files.get(path).cloned().ok_or_else(|| not_found(path))?;
        let fail_after = state.fail_read_after.take();
        drop(state);
        Ok(Box::new(MemoryReader {
            data,
            pos: 0,
            fail_after,
            dead: &mut self.dead,
        }))
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        self.check()?;
        self.fs.lock().files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    fn remove_dir(&mut self, path: &Path) -> io::Result<()> {
        self.check()?;
        let mut state = self.fs.lock();
        if !state.dirs.contains_key(path) {
            return Err(not_found(path));
        }
        let occupied = state.dirs.keys().any(|d| d.parent() == Some(path))
            || state.files.keys().any(|f| f.parent() == Some(path));
        if occupied {
            return Err(io::Error::other("directory not empty"));
        }
        state.dirs.remove(path);
        Ok(())
    }

    fn close(&mut self) {
        self.dead = true;
    }
}

struct MemoryWriter<'a> {
    fs: MemoryFs,
    path: PathBuf,
    written: usize,
    fail_after: Option<usize>,
    dead: &'a mut bool,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if *self.dead {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session is dead"));
        }
        let mut take = buf.len();
        if let Some(limit) = self.fail_after {
            if self.written + take > limit {
                take = limit.saturating_sub(self.written);
                *self.dead = true;
            }
        }
        if let Some(file) = self.fs.lock().files.get_mut(&self.path) {
            file.extend_from_slice(&buf[..take]);
        }
        self.written += take;
        if *self.dead {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"));
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MemoryReader<'a> {
    data: Vec<u8>,
    pos: usize,
    fail_after: Option<usize>,
    dead: &'a mut bool,
}

impl Read for MemoryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                *self.dead = true;
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"));
            }
        }
        let end = self.data.len().min(self.pos + buf.len());
        let end = self.fail_after.map_or(end, |limit| end.min(limit));
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}
