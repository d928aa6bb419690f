//! Reassembly of frames from the chunks a transport hands out.
use bytes::{Buf, Bytes, BytesMut};

use super::{
    config::{DEFAULT_MAX_BODY_SIZE, Framing},
    frame::{FrameError, HEADER_SIZE, Header, TERMINATOR},
};

/// Accumulates raw transport chunks and slices complete frames out of them.
///
/// Every frame yielded has its terminator stripped and is ready for
/// [`Frame::decode`](super::frame::Frame::decode).
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    max_body_size: usize,
    pending: BytesMut,
    /// Bytes of `pending` already known to hold no terminator.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pending: BytesMut::with_capacity(64 * 1024),
            scanned: 0,
        }
    }

    /// Caps the body length a frame may declare, or grow to in delimited mode.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Takes the next complete frame out of the buffer, if one is available.
    pub fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        match self.framing {
            Framing::Delimited => self.next_delimited(),
            Framing::LengthPrefixed => self.next_length_prefixed(),
        }
    }

    fn next_delimited(&mut self) -> Option<Result<Bytes, FrameError>> {
        match self.find_terminator() {
            Some(end) => Some(Ok(self.take(end))),
            None => self.discard_oversized(),
        }
    }

    fn next_length_prefixed(&mut self) -> Option<Result<Bytes, FrameError>> {
        if self.pending.len() < HEADER_SIZE {
            return None;
        }

        let header = match Header::peek(&self.pending) {
            Ok(header) => header,
            Err(e) => return self.resync(e),
        };
        if header.body_length() > self.max_body_size {
            return self.resync(FrameError::BodyTooLarge(header.body_length()));
        }

        let end = HEADER_SIZE + header.body_length();
        if self.pending.len() < end + TERMINATOR.len() {
            return None;
        }
        if self.pending[end..end + TERMINATOR.len()] != TERMINATOR {
            return self.resync(FrameError::BadTrailer);
        }

        Some(Ok(self.take(end)))
    }

    /// Splits off the frame ending at `end` and skips its terminator.
    fn take(&mut self, end: usize) -> Bytes {
        let frame = self.pending.split_to(end).freeze();
        self.pending.advance(TERMINATOR.len());
        self.scanned = 0;
        frame
    }

    /// Drops everything up to and including the next terminator.
    ///
    /// Without a terminator in sight the garbage is kept until more data arrives, or until it
    /// outgrows the largest frame allowed.
    fn resync(&mut self, err: FrameError) -> Option<Result<Bytes, FrameError>> {
        match self.find_terminator() {
            Some(end) => {
                self.take(end);
                Some(Err(err))
            }
            None => self.discard_oversized(),
        }
    }

    /// Gives up on an unterminated run longer than any acceptable frame.
    ///
    /// The last bytes are kept since they may be the start of a terminator.
    fn discard_oversized(&mut self) -> Option<Result<Bytes, FrameError>> {
        let limit = HEADER_SIZE
            .saturating_add(self.max_body_size)
            .saturating_add(TERMINATOR.len());
        if self.pending.len() <= limit {
            return None;
        }

        let keep = TERMINATOR.len() - 1;
        let dropped = self.pending.len() - keep;
        self.pending.advance(dropped);
        self.scanned = 0;
        Some(Err(FrameError::BodyTooLarge(dropped.saturating_sub(HEADER_SIZE))))
    }

    /// Position of the first terminator, resuming where the last search stopped.
    fn find_terminator(&mut self) -> Option<usize> {
        let from = self.scanned.saturating_sub(TERMINATOR.len() - 1);
        match self.pending[from..]
            .windows(TERMINATOR.len())
            .position(|window| window == TERMINATOR)
        {
            Some(offset) => Some(from + offset),
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::protocol::frame::{Frame, FrameKind};

    use super::*;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode().unwrap()).collect()
    }

    fn drain(buffer: &mut FrameBuffer) -> Vec<Result<Frame, String>> {
        let mut out = Vec::new();
        while let Some(next) = buffer.next_frame() {
            out.push(
                next.and_then(|data| Frame::decode(&data))
                    .map_err(|e| e.to_string()),
            );
        }
        out
    }

    #[test]
    fn frames_split_across_chunks() {
        for framing in [Framing::Delimited, Framing::LengthPrefixed] {
            let frames = vec![
                Frame::request(1, b"first".to_vec()),
                Frame::response(2, b"second".to_vec()),
                Frame::request(3, Vec::new()),
            ];
            let data = wire(&frames);
            let mut buffer = FrameBuffer::new(framing);
            let mut decoded = Vec::new();

            for chunk in data.chunks(4) {
                buffer.push(chunk);
                decoded.extend(drain(&mut buffer));
            }

            let decoded: Vec<Frame> = decoded.into_iter().map(Result::unwrap).collect();
            assert_eq!(decoded, frames);
            assert_eq!(buffer.buffered(), 0);
        }
    }

    #[test]
    fn incomplete_frame_stays_buffered() {
        let data = wire(&[Frame::request(9, b"later".to_vec())]);
        let mut buffer = FrameBuffer::new(Framing::Delimited);

        buffer.push(&data[..data.len() - 1]);
        assert!(buffer.next_frame().is_none());
        assert_eq!(buffer.buffered(), data.len() - 1);

        buffer.push(&data[data.len() - 1..]);
        let frame = Frame::decode(&buffer.next_frame().unwrap().unwrap()).unwrap();
        assert_eq!(frame.identity, 9);
    }

    #[test]
    fn delimited_splits_inside_body_containing_terminator() {
        let frame = Frame::request(4, b"a\r\r\nb".to_vec());
        let mut buffer = FrameBuffer::new(Framing::Delimited);
        buffer.push(&frame.encode().unwrap());

        let out = drain(&mut buffer);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(Result::is_err));
    }

    #[test]
    fn length_prefixed_keeps_body_containing_terminator() {
        let frame = Frame::request(4, b"a\r\r\nb".to_vec());
        let mut buffer = FrameBuffer::new(Framing::LengthPrefixed);
        buffer.push(&frame.encode().unwrap());

        let out = drain(&mut buffer);
        assert_eq!(out, vec![Ok(frame)]);
    }

    #[test]
    fn length_prefixed_resyncs_after_garbage() {
        let good = Frame::response(5, b"ok".to_vec());
        let mut data = b"garbage-bytes\r\r\n".to_vec();
        data.extend(good.encode().unwrap());

        let mut buffer = FrameBuffer::new(Framing::LengthPrefixed);
        buffer.push(&data);

        let out = drain(&mut buffer);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap().kind, FrameKind::Response);
    }

    #[test]
    fn length_prefixed_rejects_oversized_declared_length() {
        let good = Frame::response(5, b"ok".to_vec());
        let mut data = b"REQ\0\0\0\x01\xff\xff\xff\xf0\r\r\n".to_vec();
        data.extend(good.encode().unwrap());

        let mut buffer = FrameBuffer::new(Framing::LengthPrefixed).with_max_body_size(1024);
        buffer.push(&data);

        assert!(matches!(
            buffer.next_frame(),
            Some(Err(FrameError::BodyTooLarge(0xffff_fff0)))
        ));
        let frame = Frame::decode(&buffer.next_frame().unwrap().unwrap()).unwrap();
        assert_eq!(frame, good);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn unterminated_run_is_dropped_once_oversized() {
        let mut buffer = FrameBuffer::new(Framing::Delimited).with_max_body_size(16);
        buffer.push(&[b'x'; 20]);
        assert!(buffer.next_frame().is_none());

        buffer.push(&[b'x'; 20]);
        assert!(matches!(
            buffer.next_frame(),
            Some(Err(FrameError::BodyTooLarge(_)))
        ));
        assert_eq!(buffer.buffered(), TERMINATOR.len() - 1);

        let good = Frame::request(8, b"after".to_vec());
        buffer.push(b"\r\r\n");
        buffer.push(&good.encode().unwrap());
        let out = drain(&mut buffer);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap(), &good);
    }

    #[test]
    fn megabyte_of_small_frames_drains_quickly() {
        for framing in [Framing::Delimited, Framing::LengthPrefixed] {
            let frame = Frame::request(1, b"x".to_vec()).encode().unwrap();
            let count = (1 << 20) / frame.len();
            let data = frame.repeat(count);

            let mut buffer = FrameBuffer::new(framing);
            buffer.push(&data);

            let started = Instant::now();
            let mut drained = 0;
            while let Some(next) = buffer.next_frame() {
                next.unwrap();
                drained += 1;
            }
            assert_eq!(drained, count);
            assert_eq!(buffer.buffered(), 0);
            assert!(
                started.elapsed() < Duration::from_millis(500),
                "{framing:?} took {:?}",
                started.elapsed()
            );
        }
    }

    #[test]
    fn terminator_split_across_pushes_is_found() {
        let frame = Frame::request(3, vec![b'a'; 100]);
        let data = frame.encode().unwrap();
        let mut buffer = FrameBuffer::new(Framing::Delimited);

        for chunk in data.chunks(1) {
            buffer.push(chunk);
            if buffer.buffered() < data.len() {
                assert!(buffer.next_frame().is_none());
            }
        }
        let out = drain(&mut buffer);
        assert_eq!(out, vec![Ok(frame)]);
    }

    #[test]
    fn length_prefixed_rejects_bad_trailer() {
        let mut data = Frame::request(6, b"xyz".to_vec()).encode().unwrap();
        let len = data.len();
        data[len - 3] = b'?';
        data.extend(b"\r\r\n");

        let mut buffer = FrameBuffer::new(Framing::LengthPrefixed);
        buffer.push(&data);

        assert!(matches!(
            buffer.next_frame(),
            Some(Err(FrameError::BadTrailer))
        ));
        assert_eq!(buffer.buffered(), 0);
    }
}
