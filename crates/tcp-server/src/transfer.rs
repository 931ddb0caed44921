// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Full-length blocking transfers over a connected stream.
//!
//! Short writes and reads are absorbed by looping until the requested count has moved. An
//! orderly close by the peer (a zero-length transfer) stops the loop early and the partial
//! count is returned; any other failure is reported as a [`NetworkError`].

use std::io::{self, Read, Write};

use crate::error::NetworkError;

/// Write all of `buf` to `stream`. Returns the number of bytes written, which is less than
/// `buf.len()` only if the stream accepted a zero-length write.
pub fn send_all<W: Write + ?Sized>(stream: &mut W, buf: &[u8]) -> Result<usize, NetworkError> {
    let mut sent = 0;
    while sent < buf.len() {
        match stream.write(&buf[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(NetworkError::Send { sent, source }),
        }
    }
    Ok(sent)
}

/// Fill `buf` from `stream`. Returns the number of bytes read, which is less than `buf.len()`
/// only if the peer closed the connection first.
pub fn receive_all<R: Read + ?Sized>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<usize, NetworkError> {
    let mut received = 0;
    while received < buf.len() {
        match stream.read(&mut buf[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(NetworkError::Receive { received, source }),
        }
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_case::test_case;

    /// Moves at most `chunk` bytes per call, and fails once with `Interrupted` up front.
    struct Trickle<T> {
        inner: T,
        chunk: usize,
        interrupted: bool,
    }

    impl<T> Trickle<T> {
        fn new(inner: T, chunk: usize) -> Self {
            Self {
                inner,
                chunk,
                interrupted: false,
            }
        }
    }

    impl<T: Read> Read for Trickle<T> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    impl<T: Write> Write for Trickle<T> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.chunk);
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    struct Broken {
        after: usize,
        moved: usize,
    }

    impl Read for Broken {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.moved >= self.after {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            let n = buf.len().min(self.after - self.moved);
            buf[..n].fill(b'x');
            self.moved += n;
            Ok(n)
        }
    }

    impl Write for Broken {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.moved >= self.after {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let n = buf.len().min(self.after - self.moved);
            self.moved += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test_case(1; "one byte at a time")]
    #[test_case(3; "uneven chunks")]
    #[test_case(64; "single call")]
    fn test_send_all_absorbs_short_writes(chunk: usize) {
        let mut out = Trickle::new(Vec::new(), chunk);
        let payload = b"a message longer than a chunk";
        assert_eq!(send_all(&mut out, payload).unwrap(), payload.len());
        assert_eq!(out.inner, payload);
    }

    #[test_case(1; "one byte at a time")]
    #[test_case(5; "uneven chunks")]
    fn test_receive_all_absorbs_short_reads(chunk: usize) {
        let mut input = Trickle::new(Cursor::new(b"ping pong".to_vec()), chunk);
        let mut buf = [0u8; 9];
        assert_eq!(receive_all(&mut input, &mut buf).unwrap(), 9);
        assert_eq!(&buf, b"ping pong");
    }

    #[test]
    fn test_receive_all_stops_on_orderly_close() {
        let mut input = Cursor::new(b"pi".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(receive_all(&mut input, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"pi");
    }

    #[test]
    fn test_send_all_stops_on_zero_length_write() {
        let mut storage = [0u8; 3];
        let mut out = Cursor::new(&mut storage[..]);
        assert_eq!(send_all(&mut out, b"ping").unwrap(), 3);
    }

    #[test]
    fn test_failures_report_progress() {
        let mut broken = Broken { after: 2, moved: 0 };
        let mut buf = [0u8; 8];
        match receive_all(&mut broken, &mut buf) {
            Err(NetworkError::Receive { received, source }) => {
                assert_eq!(received, 2);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected result {other:?}"),
        }

        let mut broken = Broken { after: 5, moved: 0 };
        let err = send_all(&mut broken, b"0123456789").unwrap_err();
        assert!(matches!(err, NetworkError::Send { sent: 5, .. }));
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_empty_buffers_are_noops() {
        let mut broken = Broken { after: 0, moved: 0 };
        assert_eq!(send_all(&mut broken, b"").unwrap(), 0);
        assert_eq!(receive_all(&mut broken, &mut []).unwrap(), 0);
    }
}
