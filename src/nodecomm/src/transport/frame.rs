use std::io::{self, Read, Write};

use byteorder::{ByteOrder, NativeEndian};

/// Size of the length prefix put in front of every message.
pub const PREFIX_LEN: usize = std::mem::size_of::<u64>();

// Writes until the whole buffer is out. A write that accepts zero bytes
// means the peer can no longer take data.
pub fn write_full<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        match writer.write(&buf[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("wrote {} of {} bytes", offset, buf.len()),
                ));
            }
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// Reads until the whole buffer is filled. End of stream before that is
// reported as `UnexpectedEof`.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read {} of {} bytes", offset, buf.len()),
                ));
            }
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Frames `payload` as `[u64 length, native byte order][payload]`.
pub fn send_message<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut prefix = [0u8; PREFIX_LEN];
    NativeEndian::write_u64(&mut prefix, payload.len() as u64);
    write_full(writer, &prefix)?;
    write_full(writer, payload)?;
    Ok(())
}

pub fn recv_message<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; PREFIX_LEN];
    read_full(reader, &mut prefix)?;
    let len = NativeEndian::read_u64(&prefix);
    let len = usize::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message length {} does not fit in memory", len),
        )
    })?;
    let mut payload = Vec::new();
    payload.try_reserve_exact(len).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("cannot allocate {} byte message: {}", len, e),
        )
    })?;
    payload.resize(len, 0);
    read_full(reader, &mut payload)?;
    Ok(payload)
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// In-memory stream that hands out at most `chunk` bytes per call and
    /// can be told to fail after a number of bytes or to report
    /// interruptions.
    pub struct ChunkedStream {
        pub written: Vec<u8>,
        pub readable: VecDeque<u8>,
        pub chunk: usize,
        pub write_limit: Option<usize>,
        pub interrupt_every: Option<usize>,
        calls: usize,
    }

    impl ChunkedStream {
        pub fn new(chunk: usize) -> Self {
            ChunkedStream {
                written: Vec::new(),
                readable: VecDeque::new(),
                chunk,
                write_limit: None,
                interrupt_every: None,
                calls: 0,
            }
        }

        pub fn with_input(chunk: usize, input: &[u8]) -> Self {
            let mut stream = Self::new(chunk);
            stream.readable.extend(input.iter().copied());
            stream
        }

        fn interrupted(&mut self) -> bool {
            self.calls += 1;
            matches!(self.interrupt_every, Some(n) if self.calls % n == 0)
        }
    }

    impl Write for ChunkedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.interrupted() {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let mut n = buf.len().min(self.chunk);
            if let Some(limit) = self.write_limit {
                n = n.min(limit.saturating_sub(self.written.len()));
            }
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ChunkedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupted() {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.chunk).min(self.readable.len());
            for (slot, byte) in buf.iter_mut().zip(self.readable.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    /// Stream whose every operation fails with a non-retryable error.
    pub struct BrokenStream;

    impl Write for BrokenStream {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for BrokenStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::ConnectionReset.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{BrokenStream, ChunkedStream};
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn short_writes_are_completed() {
        let mut stream = ChunkedStream::new(3);
        let payload = pattern(1000);
        send_message(&mut stream, &payload).unwrap();
        assert_eq!(stream.written.len(), PREFIX_LEN + payload.len());
        assert_eq!(
            NativeEndian::read_u64(&stream.written[..PREFIX_LEN]),
            payload.len() as u64
        );
        assert_eq!(&stream.written[PREFIX_LEN..], payload.as_slice());
    }

    #[test]
    fn short_reads_are_completed() {
        let payload = pattern(4097);
        let mut framed = ChunkedStream::new(usize::MAX);
        send_message(&mut framed, &payload).unwrap();

        let mut reader = ChunkedStream::with_input(7, &framed.written);
        assert_eq!(recv_message(&mut reader).unwrap(), payload);
        assert!(reader.readable.is_empty());
    }

    #[test]
    fn interrupted_calls_are_retried() {
        let payload = pattern(300);
        let mut writer = ChunkedStream::new(16);
        writer.interrupt_every = Some(3);
        send_message(&mut writer, &payload).unwrap();

        let mut reader = ChunkedStream::with_input(16, &writer.written);
        reader.interrupt_every = Some(2);
        assert_eq!(recv_message(&mut reader).unwrap(), payload);
    }

    #[test]
    fn zero_byte_write_fails() {
        let mut stream = ChunkedStream::new(64);
        stream.write_limit = Some(PREFIX_LEN + 10);
        let err = send_message(&mut stream, &pattern(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn truncated_body_fails() {
        let payload = pattern(64);
        let mut framed = ChunkedStream::new(usize::MAX);
        send_message(&mut framed, &payload).unwrap();
        framed.written.truncate(PREFIX_LEN + 20);

        let mut reader = ChunkedStream::with_input(5, &framed.written);
        let err = recv_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_prefix_fails() {
        let mut reader = ChunkedStream::with_input(2, &[1, 0, 0]);
        let err = recv_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_prefix_fails_without_allocating() {
        let mut reader = ChunkedStream::with_input(8, &(1u64 << 63).to_ne_bytes());
        let err = recv_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn broken_stream_reports_error() {
        assert!(send_message(&mut BrokenStream, b"hello").is_err());
        assert!(recv_message(&mut BrokenStream).is_err());
    }

    #[test]
    fn empty_payload_is_prefix_only() {
        let mut stream = ChunkedStream::new(usize::MAX);
        send_message(&mut stream, &[]).unwrap();
        assert_eq!(stream.written, vec![0u8; PREFIX_LEN]);
        let mut reader = ChunkedStream::with_input(1, &stream.written);
        assert!(recv_message(&mut reader).unwrap().is_empty());
    }
}
