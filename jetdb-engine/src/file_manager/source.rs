//! Byte sources that pages are read from
//!
//! A source only knows how to fill a buffer from an absolute offset. Three
//! strategies are provided, chosen by the caller when the database is opened:
//!
//! - [`FileSource`] opens a fresh handle per read, so concurrent readers never
//!   share a cursor. One extra handle holds a shared OS lock (`flock` on Unix,
//!   `LockFileEx` on Windows) for the lifetime of the source, so writers that
//!   take an exclusive lock are kept out.
//! - [`SharedStream`] wraps one caller-supplied stream behind a mutex held for
//!   each seek+read pair. [`UnlockedStream`] is the same without the lock; it
//!   is `!Sync`, so the compiler enforces that it is not shared across threads.
//! - [`FactorySource`] calls a caller-supplied function to get a fresh stream
//!   for each read.

use std::any::Any;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;

/// Random-access byte source
pub trait PageSource {
    /// Fill `buf` with the bytes starting at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Total length of the source in bytes
    fn byte_len(&self) -> io::Result<u64>;
}

fn seek_and_read<R: Read + Seek>(stream: &mut R, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(buf)
}

fn stream_len<R: Seek>(stream: &mut R) -> io::Result<u64> {
    stream.seek(SeekFrom::End(0))
}

/// Open a file for reading while allowing other readers only
fn open_read_shared(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x0000_0001;
        options.share_mode(FILE_SHARE_READ);
    }
    options.open(path)
}

/// File-backed source: one handle per read
pub struct FileSource {
    path: PathBuf,
    /// Holds the shared lock; released when dropped
    _guard: File,
}

impl FileSource {
    /// Open `path` and take a shared lock on it
    ///
    /// Fails with [`io::ErrorKind::WouldBlock`] when another handle holds an
    /// exclusive lock.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let guard = open_read_shared(&path)?;
        FileExt::try_lock_shared(&guard).map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("{} is locked for writing: {}", path.display(), e),
            )
        })?;
        Ok(FileSource {
            path,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = open_read_shared(&self.path)?;
        seek_and_read(&mut file, offset, buf)
    }

    fn byte_len(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource").field("path", &self.path).finish()
    }
}

/// One stream shared between readers, locked around each read
pub struct SharedStream<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek> SharedStream<R> {
    pub fn new(stream: R) -> Self {
        SharedStream {
            inner: Mutex::new(stream),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> PageSource for SharedStream<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut stream = self.inner.lock();
        seek_and_read(&mut *stream, offset, buf)
    }

    fn byte_len(&self) -> io::Result<u64> {
        let mut stream = self.inner.lock();
        stream_len(&mut *stream)
    }
}

/// One stream used without locking; confined to a single thread
pub struct UnlockedStream<R> {
    inner: RefCell<R>,
}

impl<R: Read + Seek> UnlockedStream<R> {
    pub fn new(stream: R) -> Self {
        UnlockedStream {
            inner: RefCell::new(stream),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> PageSource for UnlockedStream<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        seek_and_read(&mut *self.inner.borrow_mut(), offset, buf)
    }

    fn byte_len(&self) -> io::Result<u64> {
        stream_len(&mut *self.inner.borrow_mut())
    }
}

/// Fresh stream per read from a caller-supplied factory
pub struct FactorySource<F> {
    factory: F,
    /// Optional resource the streams depend on, dropped with the source
    _parent: Option<Box<dyn Any + Send + Sync>>,
}

impl<F, R> FactorySource<F>
where
    F: Fn() -> io::Result<R>,
    R: Read + Seek,
{
    pub fn new(factory: F) -> Self {
        FactorySource {
            factory,
            _parent: None,
        }
    }

    /// Keep `parent` alive for as long as the source is
    pub fn with_parent<P: Any + Send + Sync>(factory: F, parent: P) -> Self {
        FactorySource {
            factory,
            _parent: Some(Box::new(parent)),
        }
    }
}

impl<F, R> PageSource for FactorySource<F>
where
    F: Fn() -> io::Result<R>,
    R: Read + Seek,
{
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut stream = (self.factory)()?;
        seek_and_read(&mut stream, offset, buf)
    }

    fn byte_len(&self) -> io::Result<u64> {
        let mut stream = (self.factory)()?;
        stream_len(&mut stream)
    }
}
