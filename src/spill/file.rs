/// Spill run files: Arrow IPC streams, optionally inside an LZ4 frame
///
/// One file holds one sorted run. The IPC stream format is used (rather
/// than the seekable file format) because runs are always consumed front to
/// back and the LZ4 reader cannot seek.
use crate::config::SpillCompression;
use crate::error::{EngineError, EngineResult};
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

enum RunWriter {
    Plain(StreamWriter<BufWriter<File>>),
    Lz4(StreamWriter<lz4::Encoder<BufWriter<File>>>),
}

pub struct SpillRunWriter {
    inner: RunWriter,
    path: PathBuf,
    batches: usize,
    rows: usize,
}

impl SpillRunWriter {
    pub fn create(
        path: &Path,
        schema: SchemaRef,
        compression: SpillCompression,
    ) -> EngineResult<Self> {
        let file = File::create(path).map_err(|e| {
            EngineError::io_with_path(
                "failed to create spill run file",
                path.display().to_string(),
                e.to_string(),
            )
        })?;
        let buffered = BufWriter::new(file);
        let inner = match compression {
            SpillCompression::None => {
                let writer = StreamWriter::try_new(buffered, schema.as_ref()).map_err(|e| {
                    EngineError::io_with_path(
                        "failed to open spill run writer",
                        path.display().to_string(),
                        e.to_string(),
                    )
                })?;
                RunWriter::Plain(writer)
            }
            SpillCompression::Lz4 => {
                let encoder = lz4::EncoderBuilder::new()
                    .level(4)
                    .build(buffered)
                    .map_err(|e| {
                        EngineError::io_with_path(
                            "failed to open LZ4 encoder for spill run",
                            path.display().to_string(),
                            e.to_string(),
                        )
                    })?;
                let writer = StreamWriter::try_new(encoder, schema.as_ref()).map_err(|e| {
                    EngineError::io_with_path(
                        "failed to open spill run writer",
                        path.display().to_string(),
                        e.to_string(),
                    )
                })?;
                RunWriter::Lz4(writer)
            }
        };
        Ok(Self {
            inner,
            path: path.to_path_buf(),
            batches: 0,
            rows: 0,
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> EngineResult<()> {
        let result = match &mut self.inner {
            RunWriter::Plain(writer) => writer.write(batch),
            RunWriter::Lz4(writer) => writer.write(batch),
        };
        result.map_err(|e| {
            EngineError::io_with_path(
                "failed to write batch to spill run",
                self.path.display().to_string(),
                e.to_string(),
            )
        })?;
        self.batches += 1;
        self.rows += batch.num_rows();
        Ok(())
    }

    /// Finish the stream and flush the file. Must be called; dropping an
    /// unfinished writer loses the stream terminator.
    pub fn finish(self) -> EngineResult<()> {
        let Self {
            inner,
            path,
            batches,
            rows,
        } = self;
        let io_err = |message: &str, e: String| {
            EngineError::io_with_path(message, path.display().to_string(), e)
        };

        match inner {
            RunWriter::Plain(mut writer) => {
                writer
                    .finish()
                    .map_err(|e| io_err("failed to finish spill run", e.to_string()))?;
                let mut buffered = writer
                    .into_inner()
                    .map_err(|e| io_err("failed to finish spill run", e.to_string()))?;
                buffered
                    .flush()
                    .map_err(|e| io_err("failed to flush spill run", e.to_string()))?;
            }
            RunWriter::Lz4(mut writer) => {
                writer
                    .finish()
                    .map_err(|e| io_err("failed to finish spill run", e.to_string()))?;
                let encoder = writer
                    .into_inner()
                    .map_err(|e| io_err("failed to finish spill run", e.to_string()))?;
                let (mut buffered, result) = encoder.finish();
                result.map_err(|e| io_err("failed to finish LZ4 frame", e.to_string()))?;
                buffered
                    .flush()
                    .map_err(|e| io_err("failed to flush spill run", e.to_string()))?;
            }
        }
        debug!(path = %path.display(), batches, rows, "finished spill run");
        Ok(())
    }
}

enum RunReader {
    Plain(StreamReader<BufReader<File>>),
    Lz4(StreamReader<BufReader<lz4::Decoder<BufReader<File>>>>),
}

pub struct SpillRunReader {
    inner: RunReader,
    path: PathBuf,
}

impl std::fmt::Debug for SpillRunReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillRunReader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SpillRunReader {
    pub fn open(path: &Path, compression: SpillCompression) -> EngineResult<Self> {
        let file = File::open(path).map_err(|e| {
            EngineError::io_with_path(
                "failed to open spill run file",
                path.display().to_string(),
                e.to_string(),
            )
        })?;
        let buffered = BufReader::new(file);
        let inner = match compression {
            SpillCompression::None => {
                let reader = StreamReader::try_new(buffered, None).map_err(|e| {
                    EngineError::io_with_path(
                        "failed to open spill run reader",
                        path.display().to_string(),
                        e.to_string(),
                    )
                })?;
                RunReader::Plain(reader)
            }
            SpillCompression::Lz4 => {
                let decoder = lz4::Decoder::new(buffered).map_err(|e| {
                    EngineError::io_with_path(
                        "failed to open LZ4 decoder for spill run",
                        path.display().to_string(),
                        e.to_string(),
                    )
                })?;
                let reader =
                    StreamReader::try_new(BufReader::new(decoder), None).map_err(|e| {
                        EngineError::io_with_path(
                            "failed to open spill run reader",
                            path.display().to_string(),
                            e.to_string(),
                        )
                    })?;
                RunReader::Lz4(reader)
            }
        };
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    /// Next batch of the run, or `None` at end of stream.
    pub fn next_batch(&mut self) -> EngineResult<Option<RecordBatch>> {
        let item = match &mut self.inner {
            RunReader::Plain(reader) => reader.next(),
            RunReader::Lz4(reader) => reader.next(),
        };
        match item {
            None => Ok(None),
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(e)) => Err(EngineError::io_with_path(
                "failed to read batch from spill run",
                self.path.display().to_string(),
                e.to_string(),
            )),
        }
    }
}
