//! Encoding-aware bidirectional line extraction.
//!
//! A [`LineReader`] owns a seekable byte source and turns it into logical,
//! comment-stripped text lines, forward via [`LineReader::next_line`] and
//! backward via [`LineReader::prev_line`]. The encoding comes from the
//! format if it names one, else from a BOM, else UTF-8.
//!
//! Lines are decoded as complete slices: in every supported encoding the
//! line terminator occupies its own code unit, so a full line is a
//! self-contained decode unit and no decoder state crosses a read boundary.

use crate::error::{Error, Result};
use crate::format::{Comment, Encoding};
use std::io::{Read, Seek, SeekFrom};

/// Requirements for a log byte source. Archive members and in-memory
/// buffers satisfy this through `Cursor`.
pub trait ByteSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ByteSource for T {}

const CHUNK_SIZE: usize = 512;

pub struct LineReader {
    source: Box<dyn ByteSource>,
    name: String,
    encoding: Encoding,
    comments: Vec<Comment>,
    /// First content offset, just past any BOM.
    stream_start: u64,
    /// Source position; everything before it has been consumed or buffered.
    raw_pos: u64,
    /// Bytes read ahead of the logical position during forward scans.
    buffer: Vec<u8>,
}

impl LineReader {
    /// Wrap a byte source. Sniffs and consumes a BOM; an explicit format
    /// encoding overrides the sniffed one. Fails with [`Error::Open`] if
    /// the source cannot seek.
    pub fn new(
        mut source: Box<dyn ByteSource>,
        name: impl Into<String>,
        encoding: Option<Encoding>,
        comments: Vec<Comment>,
    ) -> Result<Self> {
        let name = name.into();

        let open_err = |e: std::io::Error| Error::Open {
            name: name.clone(),
            source: e,
        };

        source.seek(SeekFrom::Start(0)).map_err(open_err)?;
        let mut head = [0u8; 4];
        let mut head_len = 0;
        while head_len < 4 {
            let n = source.read(&mut head[head_len..]).map_err(open_err)?;
            if n == 0 {
                break;
            }
            head_len += n;
        }

        let (sniffed, bom_len) = sniff_bom(&head[..head_len]);
        let encoding = encoding.or(sniffed).unwrap_or(Encoding::Utf8);

        let stream_start = bom_len as u64;
        source.seek(SeekFrom::Start(stream_start)).map_err(open_err)?;

        Ok(Self {
            source,
            name,
            encoding,
            comments,
            stream_start,
            raw_pos: stream_start,
            buffer: Vec::new(),
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Logical position: the offset of the next unread content.
    pub fn position(&self) -> u64 {
        self.raw_pos - self.buffer.len() as u64
    }

    /// Offset of the first content byte, just past any BOM.
    pub fn stream_start(&self) -> u64 {
        self.stream_start
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.buffer.clear();
        self.source.seek(SeekFrom::Start(offset))?;
        self.raw_pos = offset;
        Ok(())
    }

    pub fn goto_end(&mut self) -> Result<()> {
        self.buffer.clear();
        self.raw_pos = self.source.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Next non-comment, non-empty logical line, or `None` at end of
    /// stream.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let mut open_comment: Option<Comment> = None;

        loop {
            let Some(raw) = self.read_raw_line()? else {
                return Ok(None);
            };
            let line = self.decode(&raw)?;

            if line.is_empty() {
                continue;
            }

            if let Some(comment) = &open_comment {
                let finish = comment.finish.as_deref().unwrap_or_default();
                if line.ends_with(finish) {
                    open_comment = None;
                }
                continue;
            }

            if let Some(comment) = self.comments.iter().find(|c| line.starts_with(&c.start)) {
                if let Some(finish) = &comment.finish {
                    if !line.ends_with(finish) {
                        open_comment = Some(comment.clone());
                    }
                }
                continue;
            }

            return Ok(Some(line));
        }
    }

    /// Previous non-comment, non-empty logical line, lying strictly above
    /// the current position, or `None` once the stream origin is reached.
    ///
    /// Scanning mirrors the forward comment rule with `start`/`finish`
    /// swapped: a line ending with a `finish` opens suppression that runs
    /// upward until a line starting with the matching `start`.
    pub fn prev_line(&mut self) -> Result<Option<String>> {
        // Collapse the read-ahead buffer onto the logical position.
        let pos = self.position();
        self.seek(pos)?;

        let width = self.encoding.unit_width();
        let mut open_comment: Option<Comment> = None;

        while self.raw_pos > self.stream_start {
            // Walk backward one code unit at a time, accumulating units in
            // reverse order until a terminator bounds a non-empty line.
            let mut walked: Vec<u8> = Vec::new();
            let mut unit = [0u8; 4];

            while self.raw_pos > self.stream_start {
                // A truncated multi-byte stream can leave the cursor
                // unaligned; stop at the origin rather than before it.
                let Some(prev) = self
                    .raw_pos
                    .checked_sub(width as u64)
                    .filter(|p| *p >= self.stream_start)
                else {
                    self.raw_pos = self.stream_start;
                    break;
                };
                self.source.seek(SeekFrom::Start(prev))?;
                self.source.read_exact(&mut unit[..width])?;
                self.raw_pos = prev;

                if is_terminator_unit(&unit[..width], self.encoding) {
                    if !walked.is_empty() {
                        break;
                    }
                } else {
                    walked.extend_from_slice(&unit[..width]);
                }
            }
            self.source.seek(SeekFrom::Start(self.raw_pos))?;

            if walked.is_empty() {
                continue;
            }

            // Units were collected back-to-front.
            let bytes: Vec<u8> = walked.chunks(width).rev().flatten().copied().collect();
            let line = self.decode(&bytes)?;

            if let Some(comment) = &open_comment {
                if line.starts_with(&comment.start) {
                    open_comment = None;
                }
                continue;
            }

            if !self.comments.is_empty() {
                let mut suppressed = false;
                for comment in &self.comments {
                    if let Some(finish) = &comment.finish {
                        if line.ends_with(finish.as_str()) {
                            if !line.starts_with(&comment.start) {
                                open_comment = Some(comment.clone());
                            }
                            suppressed = true;
                            break;
                        }
                    }
                    if line.starts_with(&comment.start) {
                        suppressed = true;
                        break;
                    }
                }
                if suppressed {
                    continue;
                }
            }

            return Ok(Some(line));
        }

        Ok(None)
    }

    /// Pull the next raw line out of the buffered stream, consuming its
    /// terminator. Trailing `\r`/`\n` units are stripped from the result.
    fn read_raw_line(&mut self) -> Result<Option<Vec<u8>>> {
        let width = self.encoding.unit_width();
        let mut scan_from = 0;

        loop {
            if let Some(at) = self.find_newline(scan_from) {
                let mut line: Vec<u8> = self.buffer.drain(..at + width).collect();
                line.truncate(at);
                strip_trailing_terminators(&mut line, self.encoding);
                return Ok(Some(line));
            }

            scan_from = self.buffer.len().saturating_sub(width - 1);
            scan_from -= scan_from % width;

            let old_len = self.buffer.len();
            self.buffer.resize(old_len + CHUNK_SIZE, 0);
            let n = self.source.read(&mut self.buffer[old_len..])?;
            self.buffer.truncate(old_len + n);
            self.raw_pos += n as u64;

            if n == 0 {
                // End of stream: whatever is buffered is the final line.
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let mut line = std::mem::take(&mut self.buffer);
                strip_trailing_terminators(&mut line, self.encoding);
                return Ok(Some(line));
            }
        }
    }

    /// Find the buffer offset of the next newline code unit at or after
    /// `from`, stepping by the encoding's unit width.
    fn find_newline(&self, from: usize) -> Option<usize> {
        let width = self.encoding.unit_width();
        let mut at = from;
        while at + width <= self.buffer.len() {
            if is_newline_unit(&self.buffer[at..at + width], self.encoding) {
                return Some(at);
            }
            at += width;
        }
        None
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        let text = decode_bytes(bytes, self.encoding);
        if text.is_empty() && !bytes.is_empty() {
            return Err(Error::Encoding {
                encoding: self.encoding.name(),
                offset: self.position(),
                len: bytes.len(),
            });
        }
        Ok(text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn sniff_bom(head: &[u8]) -> (Option<Encoding>, usize) {
    // UTF-32LE must be tested before UTF-16LE: its BOM starts with FF FE.
    if head.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        (Some(Encoding::Utf32Le), 4)
    } else if head.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        (Some(Encoding::Utf32Be), 4)
    } else if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
        (Some(Encoding::Utf8), 3)
    } else if head.starts_with(&[0xFF, 0xFE]) {
        (Some(Encoding::Utf16Le), 2)
    } else if head.starts_with(&[0xFE, 0xFF]) {
        (Some(Encoding::Utf16Be), 2)
    } else {
        (None, 0)
    }
}

fn unit_is_ascii(unit: &[u8], encoding: Encoding, ascii: u8) -> bool {
    match encoding {
        Encoding::Utf8 => unit[0] == ascii,
        Encoding::Utf16Le => unit == [ascii, 0x00],
        Encoding::Utf16Be => unit == [0x00, ascii],
        Encoding::Utf32Le => unit == [ascii, 0x00, 0x00, 0x00],
        Encoding::Utf32Be => unit == [0x00, 0x00, 0x00, ascii],
    }
}

fn is_newline_unit(unit: &[u8], encoding: Encoding) -> bool {
    unit_is_ascii(unit, encoding, b'\n')
}

fn is_terminator_unit(unit: &[u8], encoding: Encoding) -> bool {
    unit_is_ascii(unit, encoding, b'\n') || unit_is_ascii(unit, encoding, b'\r')
}

fn strip_trailing_terminators(line: &mut Vec<u8>, encoding: Encoding) {
    let width = encoding.unit_width();
    while line.len() >= width && is_terminator_unit(&line[line.len() - width..], encoding) {
        line.truncate(line.len() - width);
    }
}

fn decode_bytes(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 => encoding_rs::UTF_8.decode(bytes).0.into_owned(),
        Encoding::Utf16Le => encoding_rs::UTF_16LE.decode(bytes).0.into_owned(),
        Encoding::Utf16Be => encoding_rs::UTF_16BE.decode(bytes).0.into_owned(),
        // encoding_rs ships no UTF-32 codec; the unit decode is trivial.
        Encoding::Utf32Le | Encoding::Utf32Be => {
            let mut out = String::with_capacity(bytes.len() / 4);
            for unit in bytes.chunks(4) {
                let ch = if unit.len() == 4 {
                    let v = if encoding == Encoding::Utf32Le {
                        u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]])
                    } else {
                        u32::from_be_bytes([unit[0], unit[1], unit[2], unit[3]])
                    };
                    char::from_u32(v).unwrap_or(char::REPLACEMENT_CHARACTER)
                } else {
                    char::REPLACEMENT_CHARACTER
                };
                out.push(ch);
            }
            out
        }
    }
}

/// Encode text in one of the supported encodings, optionally with a BOM.
/// Test and tooling helper; the engine itself never writes logs.
pub fn encode_text(text: &str, encoding: Encoding, bom: bool) -> Vec<u8> {
    let mut out = Vec::new();
    match encoding {
        Encoding::Utf8 => {
            if bom {
                out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
            }
            out.extend_from_slice(text.as_bytes());
        }
        Encoding::Utf16Le => {
            if bom {
                out.extend_from_slice(&[0xFF, 0xFE]);
            }
            for u in text.encode_utf16() {
                out.extend_from_slice(&u.to_le_bytes());
            }
        }
        Encoding::Utf16Be => {
            if bom {
                out.extend_from_slice(&[0xFE, 0xFF]);
            }
            for u in text.encode_utf16() {
                out.extend_from_slice(&u.to_be_bytes());
            }
        }
        Encoding::Utf32Le => {
            if bom {
                out.extend_from_slice(&[0xFF, 0xFE, 0x00, 0x00]);
            }
            for c in text.chars() {
                out.extend_from_slice(&(c as u32).to_le_bytes());
            }
        }
        Encoding::Utf32Be => {
            if bom {
                out.extend_from_slice(&[0x00, 0x00, 0xFE, 0xFF]);
            }
            for c in text.chars() {
                out.extend_from_slice(&(c as u32).to_be_bytes());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_over(bytes: Vec<u8>, encoding: Option<Encoding>, comments: Vec<Comment>) -> LineReader {
        LineReader::new(Box::new(Cursor::new(bytes)), "test", encoding, comments).unwrap()
    }

    fn collect_forward(reader: &mut LineReader) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().unwrap() {
            lines.push(line);
        }
        lines
    }

    fn collect_backward(reader: &mut LineReader) -> Vec<String> {
        reader.goto_end().unwrap();
        let mut lines = Vec::new();
        while let Some(line) = reader.prev_line().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn forward_lines_skip_empty() {
        let mut r = reader_over(b"alpha\n\nbravo\r\ncharlie".to_vec(), None, vec![]);
        assert_eq!(collect_forward(&mut r), ["alpha", "bravo", "charlie"]);
        assert!(r.next_line().unwrap().is_none());
    }

    #[test]
    fn backward_lines_mirror_forward() {
        let mut r = reader_over(b"alpha\n\nbravo\r\ncharlie\n".to_vec(), None, vec![]);
        assert_eq!(collect_backward(&mut r), ["charlie", "bravo", "alpha"]);
        assert!(r.prev_line().unwrap().is_none());
    }

    #[test]
    fn bom_is_consumed_and_encoding_detected() {
        for encoding in [
            Encoding::Utf8,
            Encoding::Utf16Le,
            Encoding::Utf16Be,
            Encoding::Utf32Le,
            Encoding::Utf32Be,
        ] {
            let bytes = encode_text("first\nsecond\n", encoding, true);
            let mut r = reader_over(bytes, None, vec![]);
            assert_eq!(r.encoding(), encoding, "{}", encoding.name());
            assert_eq!(collect_forward(&mut r), ["first", "second"]);
        }
    }

    #[test]
    fn utf16_backward_walk() {
        let bytes = encode_text("один\nдва\nтри", Encoding::Utf16Le, true);
        let mut r = reader_over(bytes, None, vec![]);
        assert_eq!(collect_backward(&mut r), ["три", "два", "один"]);
    }

    #[test]
    fn explicit_encoding_wins_over_default() {
        let bytes = encode_text("строка\n", Encoding::Utf16Be, false);
        let mut r = reader_over(bytes, Some(Encoding::Utf16Be), vec![]);
        assert_eq!(collect_forward(&mut r), ["строка"]);
    }

    #[test]
    fn single_line_comments_are_suppressed() {
        let comments = vec![Comment {
            start: "#".to_string(),
            finish: None,
        }];
        let mut r = reader_over(
            b"# header\ndata 1\n# note\ndata 2\n".to_vec(),
            None,
            comments.clone(),
        );
        assert_eq!(collect_forward(&mut r), ["data 1", "data 2"]);

        let mut r = reader_over(b"# header\ndata 1\n# note\ndata 2\n".to_vec(), None, comments);
        assert_eq!(collect_backward(&mut r), ["data 2", "data 1"]);
    }

    #[test]
    fn block_comment_swallows_apparent_entries() {
        let comments = vec![Comment {
            start: "/*".to_string(),
            finish: Some("*/".to_string()),
        }];
        let body = b"before\n/* begin\nlooks like data\nend */\nafter\n".to_vec();

        let mut r = reader_over(body.clone(), None, comments.clone());
        assert_eq!(collect_forward(&mut r), ["before", "after"]);

        let mut r = reader_over(body, None, comments);
        assert_eq!(collect_backward(&mut r), ["after", "before"]);
    }

    #[test]
    fn one_line_block_comment() {
        let comments = vec![Comment {
            start: "/*".to_string(),
            finish: Some("*/".to_string()),
        }];
        let mut r = reader_over(b"/* all in one */\ndata\n".to_vec(), None, comments);
        assert_eq!(collect_forward(&mut r), ["data"]);
    }

    #[test]
    fn position_round_trips_through_seek() {
        let mut r = reader_over(b"alpha\nbravo\ncharlie\n".to_vec(), None, vec![]);
        assert_eq!(r.next_line().unwrap().as_deref(), Some("alpha"));
        let pos = r.position();
        assert_eq!(r.next_line().unwrap().as_deref(), Some("bravo"));
        r.seek(pos).unwrap();
        assert_eq!(r.next_line().unwrap().as_deref(), Some("bravo"));
        assert_eq!(r.next_line().unwrap().as_deref(), Some("charlie"));
    }

    #[test]
    fn mixed_direction_reads() {
        let mut r = reader_over(b"alpha\nbravo\ncharlie\n".to_vec(), None, vec![]);
        assert_eq!(r.next_line().unwrap().as_deref(), Some("alpha"));
        assert_eq!(r.next_line().unwrap().as_deref(), Some("bravo"));
        // Walking back from after "bravo" yields "bravo" again.
        assert_eq!(r.prev_line().unwrap().as_deref(), Some("bravo"));
        assert_eq!(r.prev_line().unwrap().as_deref(), Some("alpha"));
        assert!(r.prev_line().unwrap().is_none());
    }

    #[test]
    fn long_lines_cross_chunk_boundaries() {
        let long = "x".repeat(CHUNK_SIZE * 3 + 17);
        let data = format!("{long}\nshort\n");
        let mut r = reader_over(data.into_bytes(), None, vec![]);
        assert_eq!(r.next_line().unwrap().as_deref(), Some(long.as_str()));
        assert_eq!(r.next_line().unwrap().as_deref(), Some("short"));
    }

    #[test]
    fn file_without_trailing_newline() {
        let mut r = reader_over(b"alpha\nbravo".to_vec(), None, vec![]);
        assert_eq!(collect_forward(&mut r), ["alpha", "bravo"]);
    }
}
