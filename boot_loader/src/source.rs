// Copyright (c) 2024 Huawei Technologies Co.,Ltd. All rights reserved.
//
// KexecLintel is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::error::BootLoaderError;

/// Path argument selecting standard input instead of a file.
pub const STDIN_MARKER: &str = "-";

const STREAM_CHUNK_SIZE: usize = 4096;

/// A navigable image source. Random-access files and the caching stdin
/// stream both satisfy it; the loader never needs to know which one it got.
pub trait ImageSource: Read + Seek {}

impl<T: Read + Seek> ImageSource for T {}

/// One-pass reader wrapped into a seekable session.
///
/// Bytes are pulled from the inner reader only when the cursor first moves
/// past the cached frontier; `SeekFrom::Start` and `SeekFrom::Current` are
/// plain cursor moves. `SeekFrom::End` has to drain the inner reader to
/// learn the total length, which costs one pass over the remaining input.
/// Dropping the stream discards the cache, so a later session starts clean.
pub struct StreamSource<R: Read> {
    inner: R,
    cache: Vec<u8>,
    pos: u64,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        StreamSource {
            inner,
            cache: Vec::new(),
            pos: 0,
        }
    }

    /// Extend the cache until it holds `end` bytes or the inner reader is
    /// exhausted.
    fn fill_to(&mut self, end: u64) -> io::Result<()> {
        let mut chunk = [0_u8; STREAM_CHUNK_SIZE];
        while (self.cache.len() as u64) < end {
            let count = self.inner.read(&mut chunk)?;
            if count == 0 {
                break;
            }
            self.cache.extend_from_slice(&chunk[..count]);
        }
        Ok(())
    }

    fn drain(&mut self) -> io::Result<u64> {
        self.inner.read_to_end(&mut self.cache)?;
        Ok(self.cache.len() as u64)
    }
}

impl<R: Read> Read for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill_to(self.pos.saturating_add(buf.len() as u64))?;

        let start = self.pos.min(self.cache.len() as u64) as usize;
        let count = (self.cache.len() - start).min(buf.len());
        buf[..count].copy_from_slice(&self.cache[start..start + count]);
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read> Seek for StreamSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(offset) => self.pos = offset,
            SeekFrom::Current(delta) => {
                self.pos = self
                    .pos
                    .checked_add_signed(delta)
                    .ok_or(io::ErrorKind::InvalidInput)?;
            }
            SeekFrom::End(delta) => {
                let total = self.drain()?;
                self.pos = total
                    .checked_add_signed(delta)
                    .ok_or(io::ErrorKind::InvalidInput)?;
            }
        }
        Ok(self.pos)
    }
}

/// Resolve the image argument and open it as a seekable byte source.
///
/// A fresh source is returned for every call; no state survives from an
/// earlier session.
pub fn open_source(image: &str, expand_glob: bool) -> Result<Box<dyn ImageSource>> {
    if image == STDIN_MARKER {
        info!("Piping lintel image from standard input");
        return Ok(Box::new(StreamSource::new(io::stdin())));
    }

    let path = if expand_glob {
        info!("Requested lintel path: {}", image);
        resolve_pattern(image)?
    } else {
        PathBuf::from(image)
    };

    info!("Loading lintel image from {}", path.display());
    let file =
        File::open(&path).with_context(|| format!("Can't open {}", path.display()))?;
    Ok(Box::new(file))
}

/// Expand a shell glob pattern to exactly one path. Zero and multiple
/// matches are distinct, terminal errors; ambiguity is never resolved
/// silently.
fn resolve_pattern(pattern: &str) -> Result<PathBuf> {
    let paths = glob::glob(pattern).map_err(|e| {
        anyhow!(BootLoaderError::MalformedPattern(
            pattern.to_string(),
            e.to_string()
        ))
    })?;

    let mut matched = Vec::new();
    for entry in paths {
        matched.push(entry.with_context(|| format!("Read error while globbing {}", pattern))?);
    }

    match matched.len() {
        0 => Err(anyhow!(BootLoaderError::NoSourceMatch(pattern.to_string()))),
        1 => Ok(matched.remove(0)),
        count => Err(anyhow!(BootLoaderError::AmbiguousSource(
            pattern.to_string(),
            count
        ))),
    }
}

#[cfg(test)]
mod test {
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use vmm_sys_util::tempdir::TempDir;

    use super::*;

    /// Serves fixed bytes in small pieces while counting data-bearing
    /// reads, so tests can prove the cache answered without pulling more
    /// bytes from the inner source.
    struct CountingReader {
        data: Vec<u8>,
        offset: usize,
        reads: Arc<AtomicUsize>,
    }

    impl CountingReader {
        fn new(data: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
            let reads = Arc::new(AtomicUsize::new(0));
            (
                CountingReader {
                    data,
                    offset: 0,
                    reads: reads.clone(),
                },
                reads,
            )
        }
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let count = (self.data.len() - self.offset).min(buf.len()).min(7);
            if count > 0 {
                self.reads.fetch_add(1, Ordering::Relaxed);
            }
            buf[..count].copy_from_slice(&self.data[self.offset..self.offset + count]);
            self.offset += count;
            Ok(count)
        }
    }

    #[test]
    fn test_stream_tell_after_read() {
        let (reader, _) = CountingReader::new((0..100).collect());
        let mut stream = StreamSource::new(reader);

        let mut buf = [0_u8; 33];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(stream.stream_position().unwrap(), 33);
        assert_eq!(buf[32], 32);
    }

    #[test]
    fn test_stream_seek_end_and_reread() {
        let data: Vec<u8> = (0..200).map(|v| (v % 251) as u8).collect();
        let (reader, reads) = CountingReader::new(data.clone());
        let mut stream = StreamSource::new(reader);

        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 200);
        assert_eq!(stream.stream_position().unwrap(), 200);

        let drained_reads = reads.load(Ordering::Relaxed);
        stream.rewind().unwrap();
        let mut replay = Vec::new();
        stream.read_to_end(&mut replay).unwrap();
        assert_eq!(replay, data);
        // The replay must come from the cache; the exhausted inner reader
        // hands out no further bytes.
        assert_eq!(reads.load(Ordering::Relaxed), drained_reads);
    }

    #[test]
    fn test_stream_sparse_seek_then_read() {
        let (reader, _) = CountingReader::new((0..64).collect());
        let mut stream = StreamSource::new(reader);

        stream.seek(SeekFrom::Start(60)).unwrap();
        let mut buf = [0_u8; 16];
        let count = stream.read(&mut buf).unwrap();
        assert_eq!(count, 4);
        assert_eq!(&buf[..4], &[60, 61, 62, 63]);

        // Reading past the end keeps answering zero bytes.
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stream_negative_seek_rejected() {
        let (reader, _) = CountingReader::new(vec![0; 8]);
        let mut stream = StreamSource::new(reader);
        assert!(stream.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_resolve_pattern_single_and_ambiguous() {
        let dir = TempDir::new().unwrap();
        let base = dir.as_path().to_str().unwrap().to_string();
        File::create(format!("{}/lintel_1.disk", base))
            .unwrap()
            .write_all(b"x")
            .unwrap();

        let resolved = resolve_pattern(&format!("{}/lintel_*.disk", base)).unwrap();
        assert!(resolved.ends_with("lintel_1.disk"));

        File::create(format!("{}/lintel_2.disk", base)).unwrap();
        let err = resolve_pattern(&format!("{}/lintel_*.disk", base)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::AmbiguousSource(_, 2))
        ));

        let err = resolve_pattern(&format!("{}/nothing_*.disk", base)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::NoSourceMatch(_))
        ));
    }
}
