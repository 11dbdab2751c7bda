//! Output assembly: patch substitution and container fixups.
//!
//! The assembler collects patches while codec workers run, then replays the
//! input file once: bytes outside any patch are copied verbatim, patched
//! ranges are substituted, and every size or offset field registered in the
//! [`FixupLedger`] is shifted by the accumulated deltas and overwritten in
//! place at the end.

use std::io::{Read, Seek, SeekFrom, Write};

use datamosh_core::error::Result;

/// Replacement payload for one input byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchPayload {
    /// Literal replacement bytes.
    Data(Vec<u8>),
    /// Alignment padding: emit `fill` bytes until the output position is a
    /// multiple of `alignment`. The final length depends on where the patch
    /// lands in the output, so it is computed during the flush.
    Padding { fill: u8, alignment: usize },
}

/// One replacement of an input byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    /// Byte position of the replaced range in the input file.
    pub i_pos: i64,
    /// Length of the replaced range in the input file.
    pub i_size: usize,
    /// What goes into the output instead.
    pub payload: PatchPayload,
}

/// Byte order and meaning of a fixed-up 32-bit container field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// Little-endian absolute offset field.
    OffsetLe32,
    /// Big-endian absolute offset field.
    OffsetBe32,
    /// Little-endian size field.
    SizeLe32,
    /// Big-endian size field.
    SizeBe32,
}

impl FixupKind {
    fn is_offset(self) -> bool {
        matches!(self, FixupKind::OffsetLe32 | FixupKind::OffsetBe32)
    }
}

/// A 32-bit container field whose value must track output edits.
///
/// `pos` is where the field lives; `val` is its eventual value. For offset
/// fields `a1` is the position the offset points at. For size fields
/// `[a1, a2]` is the byte range whose length the field holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixupRecord {
    pub kind: FixupKind,
    pub pos: i64,
    pub val: i64,
    pub a1: i64,
    pub a2: i64,
}

/// Registered container fields, updated as patches shift the output.
#[derive(Debug, Default)]
pub struct FixupLedger {
    fixups: Vec<FixupRecord>,
}

impl FixupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an offset field at `pos` holding `val`, pointing at `target`.
    pub fn add_offset(&mut self, kind: FixupKind, pos: i64, val: i64, target: i64) {
        debug_assert!(kind.is_offset());
        self.fixups.push(FixupRecord {
            kind,
            pos,
            val,
            a1: target,
            a2: 0,
        });
    }

    /// Register a size field at `pos` holding `val`, covering `len` bytes
    /// starting at `start`.
    pub fn add_size(&mut self, kind: FixupKind, pos: i64, val: i64, start: i64, len: i64) {
        debug_assert!(!kind.is_offset());
        self.fixups.push(FixupRecord {
            kind,
            pos,
            val,
            a1: start,
            a2: start + len - 1,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    pub fn records(&self) -> &[FixupRecord] {
        &self.fixups
    }

    /// Fold another ledger's records into this one.
    pub fn merge(&mut self, other: FixupLedger) {
        self.fixups.extend(other.fixups);
    }

    /// Shift every record for an edit of `delta` bytes at output position
    /// `pos`. Only called with a non-zero delta.
    ///
    /// Offset values move when the edit lands at or before their target.
    /// Size values grow when the edit lands inside their range; a padding
    /// patch at the exact start of a range pads the previous packet and is
    /// not counted. The field position and range anchors shift like any
    /// other output byte.
    fn update(&mut self, pos: i64, delta: i64, is_padding: bool) {
        for fixup in &mut self.fixups {
            if fixup.kind.is_offset() {
                if pos <= fixup.a1 {
                    fixup.val += delta;
                }
            } else {
                let inside = if is_padding {
                    pos > fixup.a1
                } else {
                    pos >= fixup.a1
                };
                if inside && pos <= fixup.a2 {
                    fixup.val += delta;
                }
            }
            if pos < fixup.pos {
                fixup.pos += delta;
            }
            if pos <= fixup.a1 {
                fixup.a1 += delta;
            }
            if pos <= fixup.a2 {
                fixup.a2 += delta;
            }
        }
    }

    /// Seek to each field and overwrite it with its final value.
    fn apply<W: Write + Seek>(&self, output: &mut W) -> Result<()> {
        for fixup in &self.fixups {
            output.seek(SeekFrom::Start(fixup.pos as u64))?;
            let val = fixup.val as u32;
            let bytes = match fixup.kind {
                FixupKind::OffsetLe32 | FixupKind::SizeLe32 => val.to_le_bytes(),
                FixupKind::OffsetBe32 | FixupKind::SizeBe32 => val.to_be_bytes(),
            };
            output.write_all(&bytes)?;
        }
        Ok(())
    }
}

/// Collects patches and fixups during a run, then rebuilds the output file.
#[derive(Debug, Default)]
pub struct OutputAssembler {
    patches: Vec<PatchRecord>,
    pub ledger: FixupLedger,
}

impl OutputAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_patch(&mut self, patch: PatchRecord) {
        self.patches.push(patch);
    }

    /// Register alignment padding replacing `i_size` input bytes at `i_pos`.
    pub fn push_padding(&mut self, i_pos: i64, i_size: usize, fill: u8, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        self.patches.push(PatchRecord {
            i_pos,
            i_size,
            payload: PatchPayload::Padding { fill, alignment },
        });
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// Replay the input into the output, substituting patches in input
    /// order, then overwrite the fixed-up container fields.
    pub fn flush<R, W>(&mut self, input: &mut R, output: &mut W) -> Result<()>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        self.patches.sort_by_key(|p| p.i_pos);

        tracing::debug!(
            patches = self.patches.len(),
            fixups = self.ledger.len(),
            "assembling output"
        );

        input.seek(SeekFrom::Start(0))?;
        let mut i_tell: i64 = 0;
        let mut o_tell: i64 = 0;

        for patch in &mut self.patches {
            // bytes between the previous patch and this one pass through
            copy_exact(input, output, (patch.i_pos - i_tell) as u64)?;
            o_tell += patch.i_pos - i_tell;

            input.seek(SeekFrom::Current(patch.i_size as i64))?;
            i_tell = patch.i_pos + patch.i_size as i64;

            let o_pos = o_tell;
            let o_size = match &patch.payload {
                PatchPayload::Data(data) => {
                    output.write_all(data)?;
                    data.len()
                }
                PatchPayload::Padding { fill, alignment } => {
                    let pad = (-o_pos) as usize & (alignment - 1);
                    let buf = vec![*fill; pad];
                    output.write_all(&buf)?;
                    pad
                }
            };
            o_tell += o_size as i64;

            let delta = o_size as i64 - patch.i_size as i64;
            if delta != 0 {
                let is_padding = matches!(patch.payload, PatchPayload::Padding { .. });
                self.ledger.update(o_pos, delta, is_padding);
            }
        }

        copy_to_end(input, output)?;
        self.ledger.apply(output)?;
        output.flush()?;
        Ok(())
    }
}

/// Streaming output for runs with no patches or fixups: packets are written
/// in arrival order without a replay pass.
#[derive(Debug)]
pub struct DirectWriter<W> {
    output: W,
    written: u64,
}

impl<W: Write> DirectWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output, written: 0 }
    }

    pub fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        self.output.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.output.flush()?;
        Ok(self.output)
    }
}

fn copy_exact<R: Read, W: Write>(input: &mut R, output: &mut W, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let copied = std::io::copy(&mut input.take(len), output)?;
    if copied != len {
        return Err(datamosh_core::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "input ended inside a replicated range",
        )));
    }
    Ok(())
}

fn copy_to_end<R: Read, W: Write>(input: &mut R, output: &mut W) -> Result<()> {
    std::io::copy(input, output)?;
    Ok(())
}
