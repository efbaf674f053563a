// SPDX-License-Identifier: Apache-2.0

//! Follows a single path the way `tail -F` does.
//!
//! The follower hands out complete lines only. Its offset always points just
//! past the newline of the last line returned, so a partial trailing line is
//! re-read after a restart instead of being skipped. When the path is
//! truncated the follower restarts at 0; when it is replaced by a new file the
//! old handle is drained to EOF first and the new file is read from the start.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

use crate::receivers::file::input::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    End,
    Offset(u64),
}

pub struct FileFollower {
    path: PathBuf,
    start: Option<StartPosition>,
    reader: Option<BufReader<File>>,
    file_id: Option<FileId>,
    offset: u64,
    read_pos: u64,
    pending: Vec<u8>,
    poll_interval: Duration,
    max_line_len: usize,
}

impl FileFollower {
    pub fn new(
        path: impl Into<PathBuf>,
        start: StartPosition,
        poll_interval: Duration,
        max_line_len: usize,
    ) -> Self {
        Self {
            path: path.into(),
            start: Some(start),
            reader: None,
            file_id: None,
            offset: 0,
            read_pos: 0,
            pending: Vec::new(),
            poll_interval,
            max_line_len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset just past the last line returned by [`Self::next_line`].
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Wait for the next complete line, without its line terminator.
    ///
    /// This is cancel safe: bytes of an unfinished line stay buffered and the
    /// offset does not move until the whole line has been read.
    pub async fn next_line(&mut self) -> io::Result<String> {
        loop {
            if self.reader.is_none() && !self.open().await? {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            let n = reader.read_until(b'\n', &mut self.pending).await?;
            if n > 0 {
                self.read_pos += n as u64;
                if self.pending.last() == Some(&b'\n') {
                    self.offset = self.read_pos;
                    return Ok(self.take_line());
                }
                continue;
            }

            self.check_rotation().await?;
            if self.reader.is_some() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn open(&mut self) -> io::Result<bool> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Unable to open file, will retry.");
                return Ok(false);
            }
        };

        let metadata = file.metadata().await?;
        let len = metadata.len();
        let pos = match self.start.take() {
            Some(StartPosition::End) => len,
            Some(StartPosition::Offset(offset)) if offset <= len => offset,
            Some(StartPosition::Offset(offset)) => {
                warn!(path = ?self.path, offset, len, "Recorded offset is past end of file, reading from start.");
                0
            }
            Some(StartPosition::Beginning) | None => 0,
        };
        if pos > 0 {
            file.seek(SeekFrom::Start(pos)).await?;
        }

        let file_id = FileId::from_metadata(&metadata);
        debug!(path = ?self.path, file_id = %file_id, offset = pos, "Opened file.");

        self.file_id = Some(file_id);
        self.reader = Some(BufReader::new(file));
        self.offset = pos;
        self.read_pos = pos;
        self.pending.clear();
        Ok(true)
    }

    async fn check_rotation(&mut self) -> io::Result<()> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "File removed, waiting for it to reappear.");
                self.close();
                return Ok(());
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Unable to stat followed file.");
                return Ok(());
            }
        };

        let file_id = FileId::from_metadata(&metadata);
        if self.file_id != Some(file_id) {
            info!(path = ?self.path, file_id = %file_id, "File rotated, reopening.");
            self.close();
            return Ok(());
        }

        if metadata.len() < self.read_pos {
            info!(path = ?self.path, len = metadata.len(), offset = self.read_pos, "File truncated, reading from start.");
            if let Some(reader) = self.reader.as_mut() {
                reader.seek(SeekFrom::Start(0)).await?;
            }
            self.offset = 0;
            self.read_pos = 0;
            self.pending.clear();
        }
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
        self.file_id = None;
        self.start = Some(StartPosition::Beginning);
        self.pending.clear();
    }

    fn take_line(&mut self) -> String {
        let mut end = self.pending.len();
        while end > 0 && matches!(self.pending[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let end = end.min(self.max_line_len);
        let line = String::from_utf8_lossy(&self.pending[..end]).into_owned();
        self.pending.clear();
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn follower(path: &Path, start: StartPosition) -> FileFollower {
        FileFollower::new(path, start, Duration::from_millis(10), 1024)
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new().append(true).create(true).open(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    async fn next(f: &mut FileFollower) -> String {
        timeout(WAIT, f.next_line()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn partial_line_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "first\nsec").unwrap();

        let mut f = follower(&path, StartPosition::Beginning);
        assert_eq!("first", next(&mut f).await);
        assert_eq!(6, f.offset());

        assert!(
            timeout(Duration::from_millis(100), f.next_line())
                .await
                .is_err()
        );
        assert_eq!(6, f.offset());

        append(&path, "ond\r\n");
        assert_eq!("second", next(&mut f).await);
        assert_eq!(14, f.offset());
    }

    #[tokio::test]
    async fn resumes_at_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "skip me\nread me\n").unwrap();

        let mut f = follower(&path, StartPosition::Offset(8));
        assert_eq!("read me", next(&mut f).await);
        assert_eq!(16, f.offset());
    }

    #[tokio::test]
    async fn start_at_end_skips_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old\n").unwrap();

        let mut f = follower(&path, StartPosition::End);
        let read = tokio::spawn(async move {
            let line = f.next_line().await.unwrap();
            (line, f.offset())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "new\n");

        let (line, offset) = timeout(WAIT, read).await.unwrap().unwrap();
        assert_eq!("new", line);
        assert_eq!(8, offset);
    }

    #[tokio::test]
    async fn offset_past_end_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "short\n").unwrap();

        let mut f = follower(&path, StartPosition::Offset(4096));
        assert_eq!("short", next(&mut f).await);
    }

    #[tokio::test]
    async fn truncation_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one long line here\n").unwrap();

        let mut f = follower(&path, StartPosition::Beginning);
        assert_eq!("one long line here", next(&mut f).await);

        fs::write(&path, "two\n").unwrap();
        assert_eq!("two", next(&mut f).await);
        assert_eq!(4, f.offset());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_drains_then_follows_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\n").unwrap();

        let mut f = follower(&path, StartPosition::Beginning);
        assert_eq!("a", next(&mut f).await);

        append(&path, "b\n");
        fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        fs::write(&path, "c\n").unwrap();

        assert_eq!("b", next(&mut f).await);
        assert_eq!("c", next(&mut f).await);
        assert_eq!(2, f.offset());
    }

    #[tokio::test]
    async fn waits_for_missing_file_and_truncates_long_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.log");

        let mut f = FileFollower::new(&path, StartPosition::Beginning, Duration::from_millis(10), 4);
        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                append(&path, "abcdefgh\n");
            })
        };

        assert_eq!("abcd", next(&mut f).await);
        assert_eq!(9, f.offset());
        writer.await.unwrap();
    }
}
