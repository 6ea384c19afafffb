//! FASTX reader — batched reading of FASTA/FASTQ inputs.
//!
//! Provides types for reading single-end and paired-end sequence files
//! in chunks suitable for the worker pipeline. Wraps `needletail`,
//! which auto-detects format and compression per file.

use anyhow::{bail, Context, Result};
use needletail::parser::FastxReader;

// ---------------------------------------------------------------------------
// SeqRead / ReadPair
// ---------------------------------------------------------------------------

/// A single read with owned byte buffers.
#[derive(Debug, Clone)]
pub struct SeqRead {
    pub name: Vec<u8>,
    pub seq: Vec<u8>,
    /// Present only for FASTQ input with `copy_quality` set.
    pub qual: Option<Vec<u8>>,
}

/// A read pair (or single read). For single-end input `r2` is `None`.
#[derive(Debug, Clone)]
pub struct ReadPair {
    pub r1: SeqRead,
    pub r2: Option<SeqRead>,
}

/// A chunk of reads for batch processing.
pub type ReadChunk = Vec<ReadPair>;

// ---------------------------------------------------------------------------
// FastxConfig
// ---------------------------------------------------------------------------

/// Configuration for FASTX input sources.
#[derive(Debug, Clone)]
pub struct FastxConfig {
    pub read1_paths: Vec<String>,
    pub read2_paths: Vec<String>,
    pub chunk_size: usize,
    /// Whether to copy quality strings into `SeqRead`. Graph and link
    /// building ignore qualities; the read filter needs them.
    pub copy_quality: bool,
}

impl Default for FastxConfig {
    fn default() -> Self {
        Self {
            read1_paths: Vec::new(),
            read2_paths: Vec::new(),
            chunk_size: 1000,
            copy_quality: false,
        }
    }
}

impl FastxConfig {
    /// Whether this is a paired-end configuration.
    pub fn is_paired(&self) -> bool {
        !self.read2_paths.is_empty()
    }

    /// A single-end config over one list of files.
    pub fn single(paths: Vec<String>) -> Self {
        Self {
            read1_paths: paths,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// FastxSource
// ---------------------------------------------------------------------------

/// Sequential multi-file reader producing chunks of `ReadPair`.
///
/// Files in each list are read back to back; for paired-end input the
/// two lists advance in lockstep and must stay in sync record for
/// record.
pub struct FastxSource {
    config: FastxConfig,
    stream1: FileStream,
    stream2: Option<FileStream>,
}

struct FileStream {
    paths: Vec<String>,
    current: usize,
    reader: Option<Box<dyn FastxReader>>,
}

impl FileStream {
    fn new(paths: Vec<String>) -> Result<Self> {
        if paths.is_empty() {
            bail!("no input files specified");
        }
        let mut stream = Self {
            paths,
            current: 0,
            reader: None,
        };
        stream.open_current()?;
        Ok(stream)
    }

    fn open_current(&mut self) -> Result<()> {
        let path = &self.paths[self.current];
        let reader = needletail::parse_fastx_file(path)
            .with_context(|| format!("failed to open {path}"))?;
        self.reader = Some(reader);
        Ok(())
    }

    /// Next record across the file list, or `None` at the end of all.
    fn next_read(&mut self, copy_quality: bool) -> Result<Option<SeqRead>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            match reader.next() {
                Some(record) => {
                    let record = record
                        .with_context(|| format!("failed to parse {}", self.paths[self.current]))?;
                    return Ok(Some(SeqRead {
                        name: record.id().to_vec(),
                        seq: record.seq().into_owned(),
                        qual: if copy_quality {
                            record.qual().map(|q| q.to_vec())
                        } else {
                            None
                        },
                    }));
                }
                None => {
                    self.current += 1;
                    if self.current < self.paths.len() {
                        self.open_current()?;
                    } else {
                        self.reader = None;
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl FastxSource {
    /// Open FASTX files from the configuration.
    pub fn new(config: FastxConfig) -> Result<Self> {
        let stream1 = FileStream::new(config.read1_paths.clone())?;
        let stream2 = if config.is_paired() {
            Some(FileStream::new(config.read2_paths.clone())?)
        } else {
            None
        };
        Ok(Self {
            config,
            stream1,
            stream2,
        })
    }

    /// Whether this source provides paired-end reads.
    pub fn is_paired(&self) -> bool {
        self.stream2.is_some()
    }

    /// Read the next chunk of reads into the provided buffer.
    ///
    /// Returns `Ok(true)` if reads were produced, `Ok(false)` at EOF.
    pub fn next_chunk(&mut self, chunk: &mut ReadChunk) -> Result<bool> {
        chunk.clear();
        let copy_qual = self.config.copy_quality;
        while chunk.len() < self.config.chunk_size {
            let Some(r1) = self.stream1.next_read(copy_qual)? else {
                break;
            };
            let r2 = match self.stream2.as_mut() {
                Some(stream2) => match stream2.next_read(copy_qual)? {
                    Some(r2) => Some(r2),
                    None => bail!("paired-end inputs are out of sync (read 2 ended early)"),
                },
                None => None,
            };
            chunk.push(ReadPair { r1, r2 });
        }
        Ok(!chunk.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastx_config_defaults() {
        let config = FastxConfig::default();
        assert!(!config.is_paired());
        assert_eq!(config.chunk_size, 1000);
    }

    #[test]
    fn test_read_fasta_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fa");
        std::fs::write(&path, ">r1\nACGTACGT\n>r2\nTTTTGGGG\n").unwrap();

        let config = FastxConfig {
            read1_paths: vec![path.to_string_lossy().to_string()],
            chunk_size: 10,
            ..Default::default()
        };
        let mut source = FastxSource::new(config).unwrap();
        let mut chunk = ReadChunk::new();
        assert!(source.next_chunk(&mut chunk).unwrap());
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk[0].r1.seq, b"ACGTACGT");
        assert!(chunk[0].r2.is_none());
        assert!(!source.next_chunk(&mut chunk).unwrap());
    }

    #[test]
    fn test_paired_reads_stay_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("r1.fq");
        let p2 = dir.path().join("r2.fq");
        std::fs::write(&p1, "@a/1\nACGT\n+\nIIII\n@b/1\nGGGG\n+\nIIII\n").unwrap();
        std::fs::write(&p2, "@a/2\nTTTT\n+\nIIII\n@b/2\nCCCC\n+\nIIII\n").unwrap();

        let config = FastxConfig {
            read1_paths: vec![p1.to_string_lossy().to_string()],
            read2_paths: vec![p2.to_string_lossy().to_string()],
            chunk_size: 10,
            copy_quality: true,
        };
        let mut source = FastxSource::new(config).unwrap();
        assert!(source.is_paired());
        let mut chunk = ReadChunk::new();
        assert!(source.next_chunk(&mut chunk).unwrap());
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk[0].r1.seq, b"ACGT");
        assert_eq!(chunk[0].r2.as_ref().unwrap().seq, b"TTTT");
        assert_eq!(chunk[0].r1.qual.as_deref(), Some(&b"IIII"[..]));
    }

    #[test]
    fn test_multiple_files_concatenate() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.fa");
        let p2 = dir.path().join("b.fa");
        std::fs::write(&p1, ">x\nAAAA\n").unwrap();
        std::fs::write(&p2, ">y\nCCCC\n").unwrap();
        let config = FastxConfig::single(vec![
            p1.to_string_lossy().to_string(),
            p2.to_string_lossy().to_string(),
        ]);
        let mut source = FastxSource::new(config).unwrap();
        let mut chunk = ReadChunk::new();
        assert!(source.next_chunk(&mut chunk).unwrap());
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk[1].r1.seq, b"CCCC");
    }
}
