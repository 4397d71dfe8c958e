//! Message Channel
//!
//! Serializes every outbound message onto the peer connection. Output
//! forwarders, progress listeners, and intermediate-result handlers may all
//! send at once from build-tool threads; each frame is written whole while
//! holding the lock so frames never interleave.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use proxy_protocol::{encode_frame, FrameError, ProtocolMessage};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to encode message")]
    Frame(#[from] FrameError),

    #[error("failed to write message: {0}")]
    Io(#[from] io::Error),

    #[error("channel closed: terminal message already sent")]
    Closed,

    #[error("channel lock poisoned")]
    Poisoned,
}

/// Destination for outbound protocol messages.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: ProtocolMessage) -> Result<(), ChannelError>;
}

struct ChannelState {
    writer: Box<dyn Write + Send>,
    terminated: bool,
}

/// [`MessageSink`] writing length-prefixed frames to any byte sink.
pub struct MessageChannel {
    state: Mutex<ChannelState>,
    sent: AtomicU64,
}

impl MessageChannel {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                writer: Box::new(writer),
                terminated: false,
            }),
            sent: AtomicU64::new(0),
        }
    }

    /// Messages written so far.
    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Whether a terminal message has been written.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().map(|s| s.terminated).unwrap_or(true)
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("messages_sent", &self.messages_sent())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl MessageSink for MessageChannel {
    fn send(&self, message: ProtocolMessage) -> Result<(), ChannelError> {
        let frame = encode_frame(&message)?;

        let mut state = self.state.lock().map_err(|_| ChannelError::Poisoned)?;
        if state.terminated {
            return Err(ChannelError::Closed);
        }
        state.writer.write_all(&frame)?;
        state.writer.flush()?;
        if message.is_terminal() {
            state.terminated = true;
        }
        drop(state);

        self.sent.fetch_add(1, Ordering::Relaxed);
        trace!(kind = message.kind_name(), bytes = frame.len(), "sent message");
        Ok(())
    }
}

/// In-memory [`MessageSink`] for tests. Records every message it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<ProtocolMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ProtocolMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Terminal messages recorded so far.
    pub fn terminal_messages(&self) -> Vec<ProtocolMessage> {
        self.messages()
            .into_iter()
            .filter(ProtocolMessage::is_terminal)
            .collect()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: ProtocolMessage) -> Result<(), ChannelError> {
        self.messages
            .lock()
            .map_err(|_| ChannelError::Poisoned)?
            .push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_protocol::{read_frame, FailureDescription, FaultKind};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::thread;

    /// Clonable in-memory writer.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer that hands bytes over one at a time, to expose interleaving.
    #[derive(Clone, Default)]
    struct TrickleBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for TrickleBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.0.lock().unwrap().push(buf[0]);
            thread::yield_now();
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn decode_all(bytes: Vec<u8>) -> Vec<ProtocolMessage> {
        let mut cursor = Cursor::new(bytes);
        let mut messages = Vec::new();
        while let Some(message) = read_frame::<_, ProtocolMessage>(&mut cursor).unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_writes_decodable_frames() {
        let buffer = SharedBuffer::default();
        let channel = MessageChannel::new(buffer.clone());

        channel
            .send(ProtocolMessage::StandardOutput {
                output: b"hello".to_vec(),
            })
            .unwrap();
        channel
            .send(ProtocolMessage::Success {
                payload: b"42".to_vec(),
            })
            .unwrap();

        let bytes = buffer.0.lock().unwrap().clone();
        let messages = decode_all(bytes);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], ProtocolMessage::StandardOutput { output } if output == b"hello"));
        assert!(messages[1].is_terminal());
        assert_eq!(channel.messages_sent(), 2);
    }

    #[test]
    fn test_refuses_after_terminal() {
        let buffer = SharedBuffer::default();
        let channel = MessageChannel::new(buffer.clone());

        channel
            .send(ProtocolMessage::Failure {
                failure: FailureDescription::new(FaultKind::BuildFault, "boom"),
            })
            .unwrap();
        let written = buffer.0.lock().unwrap().len();

        let err = channel
            .send(ProtocolMessage::StandardError {
                output: b"late".to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
        assert!(channel.is_terminated());
        assert_eq!(buffer.0.lock().unwrap().len(), written);
    }

    #[test]
    fn test_concurrent_sends_do_not_interleave() {
        let buffer = TrickleBuffer::default();
        let channel = Arc::new(MessageChannel::new(buffer.clone()));

        let handles: Vec<_> = (0..4u8)
            .map(|writer| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 0..25u8 {
                        let output = vec![writer; 16 + i as usize];
                        let message = if writer % 2 == 0 {
                            ProtocolMessage::StandardOutput { output }
                        } else {
                            ProtocolMessage::StandardError { output }
                        };
                        channel.send(message).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let bytes = buffer.0.lock().unwrap().clone();
        let messages = decode_all(bytes);
        assert_eq!(messages.len(), 100);
        for message in messages {
            let output = match message {
                ProtocolMessage::StandardOutput { output }
                | ProtocolMessage::StandardError { output } => output,
                other => panic!("unexpected message {:?}", other),
            };
            let first = output[0];
            assert!(output.iter().all(|b| *b == first));
        }
    }

    #[test]
    fn test_write_failure_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let channel = MessageChannel::new(Broken);
        let err = channel
            .send(ProtocolMessage::StandardOutput { output: vec![1] })
            .unwrap_err();
        assert!(matches!(err, ChannelError::Io(_)));
        assert_eq!(channel.messages_sent(), 0);
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.send(ProtocolMessage::StandardOutput { output: vec![] })
            .unwrap();
        sink.send(ProtocolMessage::Success { payload: vec![] })
            .unwrap();

        assert_eq!(sink.messages().len(), 2);
        assert_eq!(sink.terminal_messages().len(), 1);
    }
}
