//! Length-Prefixed Frame Encoding
//!
//! Message boundaries over the byte-stream pipes that connect the supervisor
//! to each worker process.
//!
//! Frame format:
//! ```text
//! +----------------+------------------+
//! | length (4 LE)  | rkyv payload     |
//! +----------------+------------------+
//! ```

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (64 MB). Job arguments may carry whole arrays.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("End of stream")]
    EndOfStream,
}

/// Serialize `message` and write it as one frame, then flush.
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let len = bytes.len();
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    // A frame must never sit in the buffer: the peer is blocked waiting on it.
    writer.flush()?;

    Ok(())
}

/// Read one frame and deserialize it after validating the archive
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    // rkyv needs an aligned buffer
    let mut buf = rkyv::AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::InvalidFrame(format!("stream ended inside a {len}-byte frame"))
        } else {
            FrameError::Io(e)
        }
    })?;

    let archived = rkyv::check_archived_root::<T>(&buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    archived
        .deserialize(&mut Infallible)
        .map_err(|e| FrameError::Deserialization(format!("{e:?}")))
}

/// Buffered writer that emits whole frames
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a writer (64KB buffer)
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Write one message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }
}

/// Buffered reader that yields whole frames
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a reader (64KB buffer)
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read one message
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Whether bytes are already buffered, so a read will not touch the pipe
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobArgs, JobOutcome, JobRequest, SupervisorCommand, Value, WorkerMessage};
    use std::io::Cursor;

    #[test]
    fn test_request_then_reply() {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer
                .write(&SupervisorCommand::Run(JobRequest {
                    index: 4,
                    function: "square".to_string(),
                    args: JobArgs::new().arg(4i64).kwarg("verbose", false),
                    high_priority: true,
                }))
                .unwrap();
            writer
                .write(&WorkerMessage::Finished {
                    index: 4,
                    outcome: JobOutcome::Success(Value::Int(16)),
                })
                .unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        match reader.read::<SupervisorCommand>().unwrap() {
            SupervisorCommand::Run(request) => {
                assert_eq!(request.index, 4);
                assert_eq!(request.function, "square");
                assert_eq!(request.args.int(0), Ok(4));
                assert!(request.high_priority);
            }
            other => panic!("unexpected command {other:?}"),
        }
        match reader.read::<WorkerMessage>().unwrap() {
            WorkerMessage::Finished { index, outcome } => {
                assert_eq!(index, 4);
                assert_eq!(outcome, JobOutcome::Success(Value::Int(16)));
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(matches!(
            reader.read::<WorkerMessage>(),
            Err(FrameError::EndOfStream)
        ));
    }

    #[test]
    fn test_large_array_argument() {
        let array: Vec<i64> = (0..200_000).rev().collect();
        let mut buffer = Vec::new();
        FrameWriter::new(&mut buffer)
            .write(&SupervisorCommand::Run(JobRequest {
                index: 0,
                function: "insertion_sort".to_string(),
                args: JobArgs::new().arg(array.clone()),
                high_priority: false,
            }))
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let SupervisorCommand::Run(request) = reader.read::<SupervisorCommand>().unwrap() else {
            panic!("expected Run");
        };
        assert_eq!(request.args.int_list(0).unwrap(), &array[..]);
    }

    #[test]
    fn test_zero_length_frame() {
        let buffer = 0u32.to_le_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(buffer));
        assert!(matches!(
            reader.read::<WorkerMessage>(),
            Err(FrameError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_length_prefix() {
        let buffer = u32::MAX.to_le_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(buffer));
        assert!(matches!(
            reader.read::<WorkerMessage>(),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let mut buffer = Vec::new();
        FrameWriter::new(&mut buffer)
            .write(&WorkerMessage::Started { index: 0, elevated: false })
            .unwrap();
        buffer.truncate(buffer.len() - 1);
        let mut reader = FrameReader::new(Cursor::new(buffer));
        assert!(matches!(
            reader.read::<WorkerMessage>(),
            Err(FrameError::InvalidFrame(_))
        ));
    }
}
