use std::fmt;

/// Stream policy for one field: how many bytes it occupies, what terminates
/// it, which byte pads it and whether its bytes are stored reversed.
///
/// The same layout drives both directions; `Cursor::extract` and `emit` are
/// inverses for any byte string a layout accepts.
#[derive(Debug, Clone, Default)]
pub struct FieldLayout {
    /// Fixed size in bytes; `0` means delimited (or an explicit zero-byte
    /// field when the delimiter is empty too).
    pub size: usize,
    /// Terminator byte sequence for variable-length fields. With a nonzero
    /// `size` the field is truncated at the first occurrence instead.
    pub delimiter: Vec<u8>,
    /// Padding byte stripped from the tail on read and re-added on write.
    pub trim: Option<u8>,
    /// Reverse the field bytes before decoding / after encoding.
    pub reversed: bool,
}

/// Read cursor over an in-memory byte stream.
#[derive(Clone)]
pub struct Cursor<'input> {
    buffer: &'input [u8],
    offset: usize,
}

impl<'input> Cursor<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Current byte offset. May point past the end after a clamped fixed
    /// read or a delimited read that consumed the rest of the stream.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    /// Extract the next field. Returns `None` at or past end of input; the
    /// interpreter treats that as clean end of stream.
    ///
    /// Fixed reads advance by the full `size` even when the buffer tail is
    /// shorter. Delimited reads advance past the delimiter, or to the end
    /// of the stream when the delimiter never occurs.
    pub fn extract(&mut self, layout: &FieldLayout) -> Option<Vec<u8>> {
        if self.is_at_end() {
            return None;
        }

        let (mut field, advance) = if layout.size > 0 {
            let end = usize::min(self.offset + layout.size, self.buffer.len());
            let mut window = self.buffer[self.offset..end].to_vec();
            if !layout.delimiter.is_empty() {
                if let Some(at) = find(&window, &layout.delimiter) {
                    window.truncate(at);
                }
            }
            (window, layout.size)
        } else if layout.delimiter.is_empty() {
            (Vec::new(), 0)
        } else {
            let rest = &self.buffer[self.offset..];
            match find(rest, &layout.delimiter) {
                Some(at) => (rest[..at].to_vec(), at + layout.delimiter.len()),
                None => (rest.to_vec(), rest.len()),
            }
        };

        if let Some(pad) = layout.trim {
            while field.last() == Some(&pad) {
                field.pop();
            }
        }
        if layout.reversed {
            field.reverse();
        }

        self.offset += advance;
        Some(field)
    }
}

/// Append an encoded field to the output, mirroring `Cursor::extract`:
/// un-reverse, re-attach the delimiter, pad up to the fixed size and clip.
///
/// Padding uses the `trim` byte when one is configured, `0x00` otherwise.
/// Clipping can cut into the delimiter of an over-long fixed field.
pub fn emit(out: &mut Vec<u8>, field: &[u8], layout: &FieldLayout) {
    let mut field = field.to_vec();
    if layout.reversed {
        field.reverse();
    }
    field.extend_from_slice(&layout.delimiter);
    if layout.size > 0 {
        let pad = layout.trim.unwrap_or(0x00);
        if field.len() < layout.size {
            field.resize(layout.size, pad);
        }
        field.truncate(layout.size);
    }
    out.extend_from_slice(&field);
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl fmt::Debug for Cursor<'_> {
    /// Debug-print only the unconsumed part of the buffer.
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rest = self.buffer.get(self.offset..).unwrap_or_default();
        let shown = &rest[..usize::min(rest.len(), 16)];
        write!(
            f,
            "Cursor {{ offset: {}, next: [{}{}] }}",
            self.offset,
            hex::encode(shown),
            if rest.len() > shown.len() { ".." } else { "" }
        )
    }
}

#[cfg(test)]
fn fixed(size: usize) -> FieldLayout {
    FieldLayout {
        size,
        ..FieldLayout::default()
    }
}

#[cfg(test)]
fn delimited(delimiter: &[u8]) -> FieldLayout {
    FieldLayout {
        delimiter: delimiter.to_vec(),
        ..FieldLayout::default()
    }
}

#[test]
fn test_fixed_fields() {
    let mut c = Cursor::new(&[1, 2, 3, 4, 5]);
    assert_eq!(c.extract(&fixed(2)), Some(vec![1, 2]));
    assert_eq!(c.offset(), 2);
    assert_eq!(c.extract(&fixed(1)), Some(vec![3]));
    // A short tail is clamped but the offset still advances by `size`.
    assert_eq!(c.extract(&fixed(4)), Some(vec![4, 5]));
    assert_eq!(c.offset(), 7);
    assert!(c.is_at_end());
    assert_eq!(c.extract(&fixed(1)), None);
}

#[test]
fn test_zero_size_fields() {
    let mut c = Cursor::new(&[9]);
    assert_eq!(c.extract(&fixed(0)), Some(Vec::new()));
    assert_eq!(c.offset(), 0);
    assert_eq!(c.extract(&fixed(1)), Some(vec![9]));
    assert_eq!(c.extract(&fixed(0)), None);
}

#[test]
fn test_delimited_fields() {
    let mut c = Cursor::new(b"one\0two\0rest");
    assert_eq!(c.extract(&delimited(&[0])), Some(b"one".to_vec()));
    assert_eq!(c.offset(), 4);
    assert_eq!(c.extract(&delimited(&[0])), Some(b"two".to_vec()));
    // Absent delimiter consumes to end of stream without error.
    assert_eq!(c.extract(&delimited(&[0])), Some(b"rest".to_vec()));
    assert!(c.is_at_end());
    assert_eq!(c.extract(&delimited(&[0])), None);
}

#[test]
fn test_multi_byte_delimiter() {
    let mut c = Cursor::new(b"ab\r\ncd");
    assert_eq!(c.extract(&delimited(b"\r\n")), Some(b"ab".to_vec()));
    assert_eq!(c.offset(), 4);
    assert_eq!(c.extract(&delimited(b"\r\n")), Some(b"cd".to_vec()));
}

#[test]
fn test_fixed_with_delimiter() {
    // Delimiter truncates inside the window, offset advances by full size.
    let layout = FieldLayout {
        size: 6,
        delimiter: vec![0],
        ..FieldLayout::default()
    };
    let mut c = Cursor::new(b"ab\0cdef!");
    assert_eq!(c.extract(&layout), Some(b"ab".to_vec()));
    assert_eq!(c.offset(), 6);
}

#[test]
fn test_trim_and_order() {
    let layout = FieldLayout {
        size: 6,
        trim: Some(0),
        ..FieldLayout::default()
    };
    let mut c = Cursor::new(&[0x31, 0x32, 0x33, 0, 0, 0]);
    assert_eq!(c.extract(&layout), Some(vec![0x31, 0x32, 0x33]));

    let layout = FieldLayout {
        size: 3,
        reversed: true,
        ..FieldLayout::default()
    };
    let mut c = Cursor::new(&[0x00, 0x02, 0x01]);
    assert_eq!(c.extract(&layout), Some(vec![0x01, 0x02, 0x00]));
}

#[test]
fn test_emit_inverts_extract() {
    let layouts = [
        fixed(3),
        delimited(&[0]),
        FieldLayout {
            size: 6,
            trim: Some(0),
            ..FieldLayout::default()
        },
        FieldLayout {
            size: 3,
            reversed: true,
            ..FieldLayout::default()
        },
    ];
    let streams: [&[u8]; 4] = [
        &[1, 2, 3],
        b"abc\0",
        &[0x31, 0x32, 0x33, 0, 0, 0],
        &[0x00, 0x02, 0x01],
    ];
    for (layout, stream) in layouts.iter().zip(streams) {
        let mut cursor = Cursor::new(stream);
        let field = cursor.extract(layout).unwrap();
        let mut out = Vec::new();
        emit(&mut out, &field, layout);
        assert_eq!(out, stream);
    }
}

#[test]
fn test_emit_pads_and_clips() {
    let mut out = Vec::new();
    emit(&mut out, b"12", &fixed(4));
    assert_eq!(out, b"12\0\0");

    let mut out = Vec::new();
    let layout = FieldLayout {
        size: 4,
        trim: Some(0xff),
        ..FieldLayout::default()
    };
    emit(&mut out, b"12", &layout);
    assert_eq!(out, b"12\xff\xff");

    let mut out = Vec::new();
    emit(&mut out, b"123456", &fixed(4));
    assert_eq!(out, b"1234");
}
