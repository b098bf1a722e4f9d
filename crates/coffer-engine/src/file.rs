use std::io::SeekFrom;
use std::sync::Arc;

use coffer_types::{Metadata, Version};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::memory::Session;
use crate::traits::{NativeFile, NativeVersionReader};
use crate::volume::NodeId;

/// A length or position as an in-memory index, if it is within `max`.
fn bounded(len: u64, max: u64) -> EngineResult<usize> {
    if len > max {
        return Err(EngineError::InvalidArgument(format!(
            "{len} exceeds the {max} byte file limit"
        )));
    }
    usize::try_from(len).map_err(|_| EngineError::InvalidArgument(format!("{len} is out of range")))
}

/// Resolve a seek against a cursor and content length. Targets past `max`
/// are rejected.
fn seek_to(pos: u64, len: u64, target: SeekFrom, max: u64) -> EngineResult<u64> {
    let next = match target {
        SeekFrom::Start(n) => Some(n),
        SeekFrom::End(n) => len.checked_add_signed(n),
        SeekFrom::Current(n) => pos.checked_add_signed(n),
    };
    let next = next.ok_or_else(|| EngineError::InvalidArgument(format!("seek {target:?} is out of range")))?;
    bounded(next, max)?;
    Ok(next)
}

/// Copy `content[pos..]` into `buf`. Returns the number of bytes copied.
fn copy_out(content: &[u8], pos: u64, buf: &mut [u8]) -> usize {
    let start = usize::try_from(pos).unwrap_or(usize::MAX).min(content.len());
    let n = buf.len().min(content.len() - start);
    buf[..n].copy_from_slice(&content[start..start + n]);
    n
}

/// An open file of the in-memory engine.
///
/// Reads see the latest committed version. Writes go to a staged copy of
/// that content and become a version on `finish`.
pub struct MemFile {
    session: Arc<Session>,
    node: NodeId,
    path: String,
    readable: bool,
    writable: bool,
    append: bool,
    pos: u64,
    staged: Option<Vec<u8>>,
}

impl MemFile {
    pub(crate) fn new(
        session: Arc<Session>,
        node: NodeId,
        path: String,
        readable: bool,
        writable: bool,
        append: bool,
        pos: u64,
    ) -> Self {
        Self {
            session,
            node,
            path,
            readable,
            writable,
            append,
            pos,
            staged: None,
        }
    }

    fn current(&self) -> EngineResult<Vec<u8>> {
        let vol = self.session.lock()?;
        vol.current_content(self.node, self.session.cache())
    }

    fn check_write(&self) -> EngineResult<()> {
        if self.session.is_read_only() {
            return Err(EngineError::ReadOnly);
        }
        if !self.writable {
            return Err(EngineError::CannotWrite);
        }
        Ok(())
    }

    /// Length of the staged content, or of the latest version.
    fn len(&self) -> EngineResult<u64> {
        match &self.staged {
            Some(staged) => Ok(staged.len() as u64),
            None => Ok(self.session.lock()?.current_version(self.node)?.len),
        }
    }

    fn commit(&mut self, content: Vec<u8>) -> EngineResult<u64> {
        let mut vol = self.session.lock_mut()?;
        vol.commit(self.node, content, self.session.cache())
    }
}

impl NativeFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        if !self.readable {
            return Err(EngineError::CannotRead);
        }
        let content = self.current()?;
        let n = copy_out(&content, self.pos, buf);
        self.pos += n as u64;
        Ok(n)
    }

    fn read_all(&mut self) -> EngineResult<Vec<u8>> {
        if !self.readable {
            return Err(EngineError::CannotRead);
        }
        let content = self.current()?;
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(content.len());
        self.pos = self.pos.max(content.len() as u64);
        Ok(content[start..].to_vec())
    }

    fn write(&mut self, data: &[u8]) -> EngineResult<usize> {
        self.check_write()?;
        if self.append {
            self.pos = self.len()?;
        }
        let max = self.session.max_file_len();
        let start = bounded(self.pos, max)?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| EngineError::InvalidArgument("write end is out of range".into()))?;
        bounded(end as u64, max)?;

        let mut staged = match self.staged.take() {
            Some(staged) => staged,
            None => self.current()?,
        };
        if staged.len() < end {
            staged.resize(end, 0);
        }
        staged[start..end].copy_from_slice(data);
        self.pos = end as u64;
        self.staged = Some(staged);
        Ok(data.len())
    }

    fn finish(&mut self) -> EngineResult<()> {
        self.check_write()?;
        if let Some(staged) = self.staged.take() {
            let num = self.commit(staged)?;
            debug!(path = %self.path, num, "file finished");
        }
        Ok(())
    }

    fn write_once(&mut self, data: &[u8]) -> EngineResult<()> {
        self.write(data)?;
        self.finish()
    }

    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64> {
        let len = self.len()?;
        self.pos = seek_to(self.pos, len, pos, self.session.max_file_len())?;
        Ok(self.pos)
    }

    fn set_len(&mut self, len: u64) -> EngineResult<()> {
        self.check_write()?;
        let len = bounded(len, self.session.max_file_len())?;
        let mut content = match self.staged.take() {
            Some(staged) => staged,
            None => self.current()?,
        };
        content.resize(len, 0);
        self.commit(content)?;
        Ok(())
    }

    fn curr_version(&self) -> EngineResult<u64> {
        Ok(self.session.lock()?.current_version(self.node)?.num)
    }

    fn metadata(&self) -> EngineResult<Metadata> {
        self.session.lock()?.metadata_of(self.node)
    }

    fn history(&self) -> EngineResult<Vec<Version>> {
        self.session.lock()?.history_of(self.node)
    }

    fn version_reader(&self, num: u64) -> EngineResult<Box<dyn NativeVersionReader>> {
        let vol = self.session.lock()?;
        let stored = vol.find_version(self.node, num)?;
        let content = vol.read_blob(&stored.digest, self.session.cache())?;
        Ok(Box::new(MemVersionReader {
            session: Arc::clone(&self.session),
            version: stored.to_version(),
            content,
            pos: 0,
        }))
    }

    fn close(&mut self) -> EngineResult<()> {
        if let Some(staged) = self.staged.take() {
            debug!(path = %self.path, discarded = staged.len(), "unfinished write discarded");
        }
        Ok(())
    }
}

/// Cursor over one version's content, captured when the reader was opened.
pub struct MemVersionReader {
    session: Arc<Session>,
    version: Version,
    content: Vec<u8>,
    pos: u64,
}

impl MemVersionReader {
    fn check_open(&self) -> EngineResult<()> {
        self.session.lock().map(drop)
    }
}

impl NativeVersionReader for MemVersionReader {
    fn version(&self) -> EngineResult<Version> {
        self.check_open()?;
        Ok(self.version.clone())
    }

    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        self.check_open()?;
        let n = copy_out(&self.content, self.pos, buf);
        self.pos += n as u64;
        Ok(n)
    }

    fn read_all(&mut self) -> EngineResult<Vec<u8>> {
        self.check_open()?;
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(self.content.len());
        self.pos = self.pos.max(self.content.len() as u64);
        Ok(self.content[start..].to_vec())
    }

    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64> {
        self.check_open()?;
        self.pos = seek_to(self.pos, self.content.len() as u64, pos, self.session.max_file_len())?;
        Ok(self.pos)
    }

    fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEngine;
    use crate::traits::{Engine, NativeRepo};
    use coffer_cache::{BlockCache, CacheBackend};
    use coffer_types::{FileOptions, RepoOptions, RepoUri};

    async fn repo() -> Box<dyn NativeRepo> {
        repo_on(InMemoryEngine::new()).await
    }

    async fn repo_on(engine: InMemoryEngine) -> Box<dyn NativeRepo> {
        let backend = CacheBackend::ephemeral();
        backend.open("files").await.unwrap();
        let cache: Arc<dyn BlockCache> = Arc::new(backend.view());
        engine
            .open_repo(
                &RepoUri::parse("mem://k@files").unwrap(),
                "pwd",
                &RepoOptions::new().create(true),
                cache,
            )
            .unwrap()
    }

    async fn file_with(content: &[u8]) -> (Box<dyn NativeRepo>, Box<dyn NativeFile>) {
        let mut repo = repo().await;
        let mut file = repo.create_file("/f").unwrap();
        file.write_once(content).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        (repo, file)
    }

    #[test]
    fn seek_math() {
        assert_eq!(seek_to(0, 3, SeekFrom::Start(1), 16).unwrap(), 1);
        assert_eq!(seek_to(0, 3, SeekFrom::End(-2), 16).unwrap(), 1);
        assert_eq!(seek_to(1, 3, SeekFrom::Current(1), 16).unwrap(), 2);
        assert!(seek_to(0, 3, SeekFrom::End(-4), 16).is_err());
        assert_eq!(seek_to(0, 3, SeekFrom::End(5), 16).unwrap(), 8);
    }

    #[test]
    fn seek_past_limit_rejected() {
        assert_eq!(seek_to(0, 3, SeekFrom::End(13), 16).unwrap(), 16);
        assert!(matches!(
            seek_to(0, 3, SeekFrom::End(14), 16),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(seek_to(0, 3, SeekFrom::End(i64::MAX), u64::MAX).is_ok());
        assert!(seek_to(u64::MAX, 0, SeekFrom::Current(1), u64::MAX).is_err());
        assert!(seek_to(0, 0, SeekFrom::Start(u64::MAX), 16).is_err());
    }

    #[tokio::test]
    async fn oversized_writes_and_lengths_rejected() {
        let mut repo = repo_on(InMemoryEngine::new().with_max_file_len(8)).await;
        let mut file = repo.create_file("/big").unwrap();
        file.write_once(&[1, 2, 3]).unwrap();

        assert!(matches!(file.set_len(9), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(file.set_len(u64::MAX), Err(EngineError::InvalidArgument(_))));
        assert!(file.seek(SeekFrom::End(6)).is_err());
        file.seek(SeekFrom::End(4)).unwrap();
        assert!(matches!(file.write(&[9, 9]), Err(EngineError::InvalidArgument(_))));

        // The file is untouched and still usable.
        file.set_len(8).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(file.read_all().unwrap(), vec![1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(file.curr_version().unwrap(), 3);
    }

    #[tokio::test]
    async fn partial_reads() {
        let (_repo, mut file) = file_with(&[1, 2, 3]).await;
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(file.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[tokio::test]
    async fn write_at_offset_extends() {
        let (_repo, mut file) = file_with(&[4, 5, 6]).await;
        file.seek(SeekFrom::Start(1)).unwrap();
        file.write_once(&[1, 2, 3]).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(file.read_all().unwrap(), vec![4, 1, 2, 3]);
    }

    #[tokio::test]
    async fn set_len_truncates_and_extends() {
        let (_repo, mut file) = file_with(&[4, 1, 2, 3]).await;
        file.set_len(2).unwrap();
        assert_eq!(file.read_all().unwrap(), vec![4, 1]);
        file.set_len(4).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(file.read_all().unwrap(), vec![4, 1, 0, 0]);
    }

    #[tokio::test]
    async fn reads_follow_latest_version() {
        let (_repo, mut file) = file_with(&[1, 2, 3, 4, 5, 6]).await;
        let mut dst = [0u8; 2];
        file.read(&mut dst).unwrap();
        assert_eq!(dst, [1, 2]);
        file.write_once(&[7, 8]).unwrap();
        file.seek(SeekFrom::Current(-2)).unwrap();
        file.read(&mut dst).unwrap();
        assert_eq!(dst, [7, 8]);
    }

    #[tokio::test]
    async fn successive_write_once_accumulates() {
        let mut repo = repo().await;
        let mut file = repo.create_file("/s").unwrap();
        file.write_once(b"foo").unwrap();
        file.write_once(b"bar").unwrap();
        let curr = file.curr_version().unwrap();
        assert_eq!(file.version_reader(curr).unwrap().read_all().unwrap(), b"foobar");
        assert_eq!(file.version_reader(curr - 1).unwrap().read_all().unwrap(), b"foo");
    }

    #[tokio::test]
    async fn unfinished_write_discarded_on_close() {
        let mut repo = repo().await;
        let mut file = repo.create_file("/u").unwrap();
        file.write(&[1, 2]).unwrap();
        file.close().unwrap();
        assert_eq!(repo.metadata("/u").unwrap().content_len, 0);
        assert_eq!(repo.history("/u").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_only_file_cannot_read() {
        let mut repo = repo().await;
        repo.create_file("/w").unwrap().close().unwrap();
        let mut file = repo
            .open_file("/w", &FileOptions::new().read(false).write(true))
            .unwrap();
        assert!(matches!(file.read_all(), Err(EngineError::CannotRead)));
    }

    #[tokio::test]
    async fn version_reader_outlives_file_but_not_repo() {
        let (mut repo, mut file) = file_with(&[9]).await;
        let mut reader = file.version_reader(2).unwrap();
        file.close().unwrap();
        assert_eq!(reader.version().unwrap().num, 2);
        assert_eq!(reader.read_all().unwrap(), vec![9]);
        repo.close().unwrap();
        assert!(matches!(reader.read_all(), Err(EngineError::Closed)));
    }
}
