//! Stream bridges pairing a call context with one half of a streaming call
//!
//! Each bridge keeps its transport object behind a mutex held for the whole
//! of a write, finish or read, so concurrent host calls on one stream
//! serialise. Cancellation goes through the context only and never waits on
//! that mutex, which is what lets a host unblock a stuck read.

use parking_lot::Mutex;

use crate::context::CallContext;
use crate::error::{BridgeError, Result};
use crate::payload::Payload;
use crate::transport::{PayloadReader, PayloadWriter};

/// Result of one read on an inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Message(Payload),
    /// The server ended the stream; every later read reports this again
    EndOfStream,
}

/// Outbound half of `UpdateDeviceStream`
pub struct WriteStream {
    ctx: CallContext,
    writer: Mutex<Option<Box<dyn PayloadWriter>>>,
}

impl WriteStream {
    pub fn new(ctx: CallContext, writer: Box<dyn PayloadWriter>) -> Self {
        Self {
            ctx,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Send one message
    pub fn write(&self, payload: Payload) -> Result<()> {
        let mut writer = self.writer.lock();
        let writer = writer
            .as_mut()
            .ok_or_else(|| BridgeError::StreamClosed("stream already finished".into()))?;

        if self.ctx.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        writer.write(payload)
    }

    /// Half-close the stream and wait for the server's response
    ///
    /// The writer is released whatever the outcome; later writes fail.
    pub fn finish(&self) -> Result<Payload> {
        let mut guard = self.writer.lock();
        let mut writer = guard
            .take()
            .ok_or_else(|| BridgeError::StreamClosed("stream already finished".into()))?;

        if self.ctx.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        writer.finish()
    }

    /// Cancel the call without waiting for an in-flight write
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Cancel, then drop the writer once no operation holds it
    pub fn shutdown(&self) {
        self.ctx.cancel();
        let writer = self.writer.lock().take();
        drop(writer);
    }
}

#[derive(Default)]
struct ReadState {
    reader: Option<Box<dyn PayloadReader>>,
}

/// Inbound half of `RegisterAndListen`
pub struct ReadStream {
    ctx: CallContext,
    state: Mutex<ReadState>,
}

impl ReadStream {
    pub fn new(ctx: CallContext, reader: Box<dyn PayloadReader>) -> Self {
        Self {
            ctx,
            state: Mutex::new(ReadState {
                reader: Some(reader),
            }),
        }
    }

    /// Block for the next message
    ///
    /// The first end-of-stream or error is terminal: the reader is dropped and
    /// every later call reports [`ReadOutcome::EndOfStream`].
    pub fn read_next(&self) -> Result<ReadOutcome> {
        let mut state = self.state.lock();
        let Some(reader) = state.reader.as_mut() else {
            return Ok(ReadOutcome::EndOfStream);
        };

        let result = if self.ctx.is_cancelled() {
            Err(BridgeError::Cancelled)
        } else {
            reader.read()
        };

        match result {
            Ok(Some(payload)) => Ok(ReadOutcome::Message(payload)),
            Ok(None) => {
                state.reader = None;
                Ok(ReadOutcome::EndOfStream)
            }
            Err(e) => {
                state.reader = None;
                Err(e)
            }
        }
    }

    /// Cancel the call; a blocked read returns a cancelled error
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Cancel, then drop the reader once no read holds it
    pub fn shutdown(&self) {
        self.ctx.cancel();
        let reader = self.state.lock().reader.take();
        drop(reader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallMetadata;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct Recorded(Arc<StdMutex<Vec<Payload>>>);

    struct FakeWriter {
        sent: Recorded,
        closed_after: Option<usize>,
    }

    impl PayloadWriter for FakeWriter {
        fn write(&mut self, payload: Payload) -> Result<()> {
            let mut sent = self.sent.0.lock().unwrap();
            if self.closed_after.map_or(false, |n| sent.len() >= n) {
                return Err(BridgeError::StreamClosed("server hung up".into()));
            }
            sent.push(payload);
            Ok(())
        }

        fn finish(&mut self) -> Result<Payload> {
            let count = self.sent.0.lock().unwrap().len() as u8;
            Payload::parse(&[0x08, count])
        }
    }

    struct FakeReader {
        queued: VecDeque<Result<Option<Payload>>>,
    }

    impl PayloadReader for FakeReader {
        fn read(&mut self) -> Result<Option<Payload>> {
            self.queued.pop_front().unwrap_or(Ok(None))
        }
    }

    fn ctx() -> CallContext {
        CallContext::new(None, CallMetadata::default())
    }

    fn message(value: u8) -> Payload {
        Payload::parse(&[0x08, value]).unwrap()
    }

    #[test]
    fn test_writes_in_order_then_finish() {
        let sent = Recorded::default();
        let stream = WriteStream::new(
            ctx(),
            Box::new(FakeWriter {
                sent: sent.clone(),
                closed_after: None,
            }),
        );

        for value in 1..=3 {
            stream.write(message(value)).unwrap();
        }
        assert_eq!(stream.finish().unwrap(), message(3));
        assert_eq!(*sent.0.lock().unwrap(), vec![message(1), message(2), message(3)]);

        assert!(matches!(stream.write(message(4)), Err(BridgeError::StreamClosed(_))));
        assert!(matches!(stream.finish(), Err(BridgeError::StreamClosed(_))));
    }

    #[test]
    fn test_write_after_server_close_fails() {
        let stream = WriteStream::new(
            ctx(),
            Box::new(FakeWriter {
                sent: Recorded::default(),
                closed_after: Some(1),
            }),
        );
        stream.write(message(1)).unwrap();
        assert!(matches!(stream.write(message(2)), Err(BridgeError::StreamClosed(_))));
    }

    #[test]
    fn test_cancelled_write_stream() {
        let stream = WriteStream::new(
            ctx(),
            Box::new(FakeWriter {
                sent: Recorded::default(),
                closed_after: None,
            }),
        );
        stream.cancel();
        assert!(stream.is_cancelled());
        assert!(matches!(stream.write(message(1)), Err(BridgeError::Cancelled)));

        stream.shutdown();
        assert!(matches!(stream.write(message(1)), Err(BridgeError::StreamClosed(_))));
    }

    #[test]
    fn test_end_of_stream_is_sticky() {
        let stream = ReadStream::new(
            ctx(),
            Box::new(FakeReader {
                queued: VecDeque::from(vec![Ok(Some(message(1))), Ok(None), Ok(Some(message(2)))]),
            }),
        );

        assert_eq!(stream.read_next().unwrap(), ReadOutcome::Message(message(1)));
        for _ in 0..3 {
            assert_eq!(stream.read_next().unwrap(), ReadOutcome::EndOfStream);
        }
    }

    #[test]
    fn test_error_reported_once_then_end() {
        let stream = ReadStream::new(
            ctx(),
            Box::new(FakeReader {
                queued: VecDeque::from(vec![Err(BridgeError::Rpc {
                    code: tonic::Code::Unavailable,
                    message: "reset".into(),
                })]),
            }),
        );

        assert!(matches!(stream.read_next(), Err(BridgeError::Rpc { .. })));
        assert_eq!(stream.read_next().unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_cancelled_read() {
        let stream = ReadStream::new(
            ctx(),
            Box::new(FakeReader {
                queued: VecDeque::from(vec![Ok(Some(message(1)))]),
            }),
        );
        stream.cancel();
        assert!(matches!(stream.read_next(), Err(BridgeError::Cancelled)));
        assert_eq!(stream.read_next().unwrap(), ReadOutcome::EndOfStream);
    }
}
