//! Per-frame replication sessions.
//!
//! A session is the staging buffer a codec worker writes a rebuilt frame
//! into. Sessions begin lazily on the first frame section that needs
//! rewriting, support cursor snapshots for codecs that parse ahead and then
//! back up, and flush into a [`PatchRecord`] keyed by the input packet.

use datamosh_core::bitstream::BitWriter;
use datamosh_core::error::{BitstreamError, Error, Result};
use datamosh_core::packet::Packet;

use crate::output::{PatchPayload, PatchRecord};

/// Floor for the staging buffer reservation. Frames are small compared to
/// this; the generous floor keeps reallocation out of the replication loop.
const MIN_BUFFER: usize = 0x20_0000;

fn staging_capacity(pkt_size: usize) -> usize {
    let size = pkt_size.max(MIN_BUFFER);
    size + (size >> 1)
}

/// Opaque cursor snapshot for a [`BitSession`].
#[derive(Debug)]
pub struct BitSnapshot {
    pos: usize,
}

/// Bit-granular replication session.
#[derive(Debug, Default)]
pub struct BitSession {
    writer: Option<BitWriter>,
}

impl BitSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the session if it has not started yet. Calling this again is a
    /// no-op; the existing buffer and cursor are kept.
    pub fn begin(&mut self, pkt_size: usize) {
        if self.writer.is_none() {
            self.writer = Some(BitWriter::with_capacity(staging_capacity(pkt_size)));
        }
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    /// Access the output cursor. Errors if the session never began.
    pub fn writer(&mut self) -> Result<&mut BitWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::from(BitstreamError::Other("session not started".into())))
    }

    /// Snapshot the cursor position.
    pub fn save(&self) -> Result<BitSnapshot> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::from(BitstreamError::Other("session not started".into())))?;
        Ok(BitSnapshot {
            pos: writer.position(),
        })
    }

    /// Rewind the cursor to a snapshot, consuming it. Content written after
    /// the snapshot is overwritten by subsequent writes.
    pub fn restore(&mut self, snapshot: BitSnapshot) -> Result<()> {
        self.writer()?.seek(snapshot.pos)
    }

    /// End the session, producing the patch that replaces `pkt` in the
    /// output. Returns `None` if the session never began.
    ///
    /// The patch covers the cursor position rounded up to whole bytes; data
    /// beyond the cursor left over from a restored snapshot is dropped.
    pub fn flush(&mut self, pkt: &Packet) -> Option<PatchRecord> {
        let writer = self.writer.take()?;
        let len = writer.position().div_ceil(8);
        let mut data = writer.into_data();
        data.truncate(len);
        tracing::trace!(
            i_pos = pkt.pos,
            i_size = pkt.size(),
            o_size = data.len(),
            "bit session flushed"
        );
        Some(PatchRecord {
            i_pos: pkt.pos,
            i_size: pkt.size(),
            payload: PatchPayload::Data(data),
        })
    }
}

/// Opaque cursor snapshot for a [`ByteSession`].
#[derive(Debug)]
pub struct ByteSnapshot {
    pos: usize,
}

/// Byte-granular replication session, for codecs whose coded payload is a
/// byte stream (entropy-coded segments copied wholesale).
#[derive(Debug, Default)]
pub struct ByteSession {
    buf: Option<ByteCursor>,
}

#[derive(Debug)]
struct ByteCursor {
    data: Vec<u8>,
    pos: usize,
    high: usize,
}

impl ByteCursor {
    fn write(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        if self.pos > self.high {
            self.high = self.pos;
        }
    }
}

impl ByteSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the session if it has not started yet.
    pub fn begin(&mut self, pkt_size: usize) {
        if self.buf.is_none() {
            self.buf = Some(ByteCursor {
                data: Vec::with_capacity(staging_capacity(pkt_size)),
                pos: 0,
                high: 0,
            });
        }
    }

    pub fn is_active(&self) -> bool {
        self.buf.is_some()
    }

    fn cursor(&mut self) -> Result<&mut ByteCursor> {
        self.buf
            .as_mut()
            .ok_or_else(|| Error::from(BitstreamError::Other("session not started".into())))
    }

    /// Append (or overwrite, after a restore) bytes at the cursor.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.cursor()?.write(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// Current byte position of the cursor.
    pub fn position(&self) -> usize {
        self.buf.as_ref().map_or(0, |c| c.pos)
    }

    /// Snapshot the cursor position.
    pub fn save(&self) -> Result<ByteSnapshot> {
        let cursor = self
            .buf
            .as_ref()
            .ok_or_else(|| Error::from(BitstreamError::Other("session not started".into())))?;
        Ok(ByteSnapshot { pos: cursor.pos })
    }

    /// Rewind the cursor to a snapshot, consuming it.
    pub fn restore(&mut self, snapshot: ByteSnapshot) -> Result<()> {
        let cursor = self.cursor()?;
        if snapshot.pos > cursor.high {
            return Err(
                BitstreamError::Other("restore past end of written data".into()).into(),
            );
        }
        cursor.pos = snapshot.pos;
        Ok(())
    }

    /// End the session, producing the patch that replaces `pkt`. The patch
    /// covers the bytes up to the cursor position.
    pub fn flush(&mut self, pkt: &Packet) -> Option<PatchRecord> {
        let cursor = self.buf.take()?;
        let mut data = cursor.data;
        data.truncate(cursor.pos);
        tracing::trace!(
            i_pos = pkt.pos,
            i_size = pkt.size(),
            o_size = data.len(),
            "byte session flushed"
        );
        Some(PatchRecord {
            i_pos: pkt.pos,
            i_size: pkt.size(),
            payload: PatchPayload::Data(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(pos: i64, size: usize) -> Packet {
        Packet::new(vec![0; size]).with_pos(pos)
    }

    #[test]
    fn test_begin_is_idempotent() {
        let mut session = BitSession::new();
        session.begin(100);
        session.writer().unwrap().write_bits(0xAB, 8);
        session.begin(100);
        assert_eq!(session.writer().unwrap().position(), 8);
    }

    #[test]
    fn test_flush_rounds_up_to_bytes() {
        let mut session = BitSession::new();
        session.begin(10);
        session.writer().unwrap().write_bits(0b101, 3);
        let patch = session.flush(&pkt(64, 10)).unwrap();
        assert_eq!(patch.i_pos, 64);
        assert_eq!(patch.i_size, 10);
        match &patch.payload {
            PatchPayload::Data(d) => assert_eq!(d, &[0b1010_0000]),
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(!session.is_active());
        assert!(session.flush(&pkt(64, 10)).is_none());
    }

    #[test]
    fn test_bit_save_restore() {
        let mut session = BitSession::new();
        session.begin(10);
        session.writer().unwrap().write_bits(0xFF, 8);
        let snap = session.save().unwrap();
        session.writer().unwrap().write_bits(0xAA, 8);
        session.restore(snap).unwrap();
        session.writer().unwrap().write_bits(0x55, 8);
        let patch = session.flush(&pkt(0, 2)).unwrap();
        match &patch.payload {
            PatchPayload::Data(d) => assert_eq!(d, &[0xFF, 0x55]),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_byte_session_overwrite() {
        let mut session = ByteSession::new();
        session.begin(4);
        session.write(&[1, 2, 3, 4]).unwrap();
        let snap = session.save().unwrap();
        session.write(&[5, 6]).unwrap();
        session.restore(snap).unwrap();
        session.write(&[7]).unwrap();
        let patch = session.flush(&pkt(0, 4)).unwrap();
        match &patch.payload {
            PatchPayload::Data(d) => assert_eq!(d, &[1, 2, 3, 4, 7]),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_save_without_begin_fails() {
        let session = BitSession::new();
        assert!(session.save().is_err());
        let session = ByteSession::new();
        assert!(session.save().is_err());
    }
}
