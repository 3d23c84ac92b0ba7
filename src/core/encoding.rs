//! XML Encoding Detection and Streaming Conversion
//!
//! Detection runs on raw bytes before anything is decoded: caller override,
//! byte order mark, BOM-less UTF-16 patterns, then the `encoding` pseudo
//! attribute of a leading `<?xml ... ?>`. UTF-8, UTF-16, US-ASCII and
//! ISO-8859-1 are decoded here; any other label goes through encoding_rs.
//!
//! Decoders are incremental: an incomplete sequence at the end of a chunk is
//! carried over to the next one.

use std::fmt;

use encoding_rs::{DecoderResult, Encoding};
use memchr::memmem;

/// Give up looking for the end of a leading XML declaration after this many bytes
const MAX_DECL_SNIFF: usize = 1024;

/// Document encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Ascii,
    Latin1,
    Other(&'static Encoding),
}

impl XmlEncoding {
    /// Resolve an encoding label, case-insensitively
    pub fn from_label(label: &str) -> Option<XmlEncoding> {
        let normalized = label.trim().to_ascii_lowercase();
        let encoding = match normalized.as_str() {
            "utf-8" | "utf8" => XmlEncoding::Utf8,
            "utf-16" | "utf16" | "utf-16be" => XmlEncoding::Utf16Be,
            "utf-16le" => XmlEncoding::Utf16Le,
            "us-ascii" | "ascii" | "iso-646-us" => XmlEncoding::Ascii,
            "iso-8859-1" | "iso_8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => {
                XmlEncoding::Latin1
            }
            other => {
                let encoding = Encoding::for_label(other.as_bytes())?;
                if encoding == encoding_rs::UTF_8 {
                    XmlEncoding::Utf8
                } else if encoding == encoding_rs::UTF_16LE {
                    XmlEncoding::Utf16Le
                } else if encoding == encoding_rs::UTF_16BE {
                    XmlEncoding::Utf16Be
                } else if encoding == encoding_rs::REPLACEMENT {
                    return None;
                } else {
                    XmlEncoding::Other(encoding)
                }
            }
        };
        Some(encoding)
    }

    pub fn name(&self) -> &'static str {
        match self {
            XmlEncoding::Utf8 => "UTF-8",
            XmlEncoding::Utf16Le => "UTF-16LE",
            XmlEncoding::Utf16Be => "UTF-16BE",
            XmlEncoding::Ascii => "US-ASCII",
            XmlEncoding::Latin1 => "ISO-8859-1",
            XmlEncoding::Other(encoding) => encoding.name(),
        }
    }

    #[inline]
    pub fn is_utf16(&self) -> bool {
        matches!(self, XmlEncoding::Utf16Le | XmlEncoding::Utf16Be)
    }

    /// Whether a declaration naming `declared` is consistent with a stream
    /// that is already being decoded as `self`
    pub fn accepts_declaration(&self, declared: &XmlEncoding) -> bool {
        match self {
            XmlEncoding::Utf16Le | XmlEncoding::Utf16Be => declared.is_utf16(),
            XmlEncoding::Utf8 => matches!(declared, XmlEncoding::Utf8 | XmlEncoding::Ascii),
            _ => !declared.is_utf16(),
        }
    }

    /// Number of raw input bytes `c` occupied.
    ///
    /// Exact for the natively decoded encodings. For stateful encodings
    /// decoded through encoding_rs (ISO-2022-JP) shift sequences are not
    /// counted.
    #[inline]
    pub fn raw_width(&self, c: char) -> usize {
        match self {
            XmlEncoding::Utf8 => c.len_utf8(),
            XmlEncoding::Utf16Le | XmlEncoding::Utf16Be => c.len_utf16() * 2,
            XmlEncoding::Ascii | XmlEncoding::Latin1 => 1,
            XmlEncoding::Other(encoding) => {
                if c.is_ascii() {
                    return 1;
                }
                let mut buf = [0u8; 4];
                let (bytes, _, _) = encoding.encode(c.encode_utf8(&mut buf));
                bytes.len()
            }
        }
    }
}

impl fmt::Display for XmlEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the document encoding was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    ByteOrderMark,
    /// BOM-less UTF-16 recognized from the first bytes
    Heuristic,
    Declaration,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingInfo {
    pub encoding: XmlEncoding,
    pub source: EncodingSource,
    /// Bytes of byte order mark skipped before decoding
    pub bom_len: usize,
}

/// Decoding failure at an absolute raw byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub byte_offset: u64,
    pub message: String,
}

impl DecodeError {
    pub fn new(byte_offset: u64, message: impl Into<String>) -> Self {
        DecodeError {
            byte_offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.byte_offset)
    }
}

impl std::error::Error for DecodeError {}

/// Decide the document encoding from the first bytes of input.
///
/// Returns `Ok(None)` when more input is needed to decide.
pub fn detect(
    input: &[u8],
    is_final: bool,
    override_label: Option<&str>,
) -> Result<Option<EncodingInfo>, DecodeError> {
    if input.len() < 4 && !is_final {
        return Ok(None);
    }

    if let Some(label) = override_label {
        let encoding = XmlEncoding::from_label(label)
            .ok_or_else(|| DecodeError::new(0, format!("unknown encoding '{}'", label)))?;
        // An override still skips a BOM of its own family
        let (encoding, bom_len) = match (encoding, input) {
            (XmlEncoding::Utf8, [0xEF, 0xBB, 0xBF, ..]) => (XmlEncoding::Utf8, 3),
            (e, [0xFF, 0xFE, ..]) if e.is_utf16() => (XmlEncoding::Utf16Le, 2),
            (e, [0xFE, 0xFF, ..]) if e.is_utf16() => (XmlEncoding::Utf16Be, 2),
            (e, _) => (e, 0),
        };
        return Ok(Some(EncodingInfo {
            encoding,
            source: EncodingSource::Override,
            bom_len,
        }));
    }

    let found = |encoding, source, bom_len| {
        Ok(Some(EncodingInfo {
            encoding,
            source,
            bom_len,
        }))
    };

    match input {
        [0xEF, 0xBB, 0xBF, ..] => return found(XmlEncoding::Utf8, EncodingSource::ByteOrderMark, 3),
        [0xFF, 0xFE, ..] => return found(XmlEncoding::Utf16Le, EncodingSource::ByteOrderMark, 2),
        [0xFE, 0xFF, ..] => return found(XmlEncoding::Utf16Be, EncodingSource::ByteOrderMark, 2),
        [0x3C, 0x00, ..] => return found(XmlEncoding::Utf16Le, EncodingSource::Heuristic, 0),
        [0x00, 0x3C, ..] => return found(XmlEncoding::Utf16Be, EncodingSource::Heuristic, 0),
        _ => {}
    }

    if input.starts_with(b"<?xml") {
        match input.get(5) {
            None if !is_final => return Ok(None),
            Some(b' ' | b'\t' | b'\n' | b'\r') => match memmem::find(input, b"?>") {
                Some(end) => {
                    if let Some(label) = declared_encoding(&input[..end]) {
                        let label = String::from_utf8_lossy(label);
                        let encoding = XmlEncoding::from_label(&label).ok_or_else(|| {
                            DecodeError::new(0, format!("unknown encoding '{}'", label))
                        })?;
                        if encoding.is_utf16() {
                            return Err(DecodeError::new(
                                0,
                                "incorrect encoding declaration: UTF-16 declared in an 8-bit stream",
                            ));
                        }
                        return found(encoding, EncodingSource::Declaration, 0);
                    }
                }
                None if !is_final && input.len() < MAX_DECL_SNIFF => return Ok(None),
                None => {}
            },
            _ => {}
        }
    } else if !is_final && input.len() < 5 && b"<?xml".starts_with(input) {
        return Ok(None);
    }

    found(XmlEncoding::Utf8, EncodingSource::Default, 0)
}

/// Value of the `encoding` pseudo-attribute in a raw declaration
fn declared_encoding(decl: &[u8]) -> Option<&[u8]> {
    let at = memmem::find(decl, b"encoding")?;
    if !matches!(decl.get(at.wrapping_sub(1)), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        return None;
    }
    let mut rest = &decl[at + b"encoding".len()..];
    rest = trim_start(rest);
    rest = rest.strip_prefix(b"=")?;
    rest = trim_start(rest);
    let quote = *rest.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let body = &rest[1..];
    let end = memchr::memchr(quote, body)?;
    Some(&body[..end])
}

fn trim_start(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t' | b'\n' | b'\r', rest @ ..] = bytes {
        bytes = rest;
    }
    bytes
}

/// Length of the UTF-8 sequence introduced by lead byte `b`
#[inline]
fn utf8_sequence_len(b: u8) -> usize {
    match b {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Incremental decoder for one encoding
pub struct Decoder {
    encoding: XmlEncoding,
    /// Bytes of an incomplete sequence from the previous chunk
    pending: Vec<u8>,
    /// Absolute raw offset of the first undecoded byte
    offset: u64,
    other: Option<encoding_rs::Decoder>,
}

impl Decoder {
    /// Decoder whose first byte sits at absolute raw offset `offset`
    pub fn new(encoding: XmlEncoding, offset: u64) -> Self {
        let other = match encoding {
            XmlEncoding::Other(enc) => Some(enc.new_decoder_without_bom_handling()),
            _ => None,
        };
        Decoder {
            encoding,
            pending: Vec::new(),
            offset,
            other,
        }
    }

    pub fn encoding(&self) -> XmlEncoding {
        self.encoding
    }

    /// Decode `src` onto `dst`; with `last` set, an incomplete trailing
    /// sequence is an error instead of being carried over
    pub fn decode(&mut self, src: &[u8], dst: &mut String, last: bool) -> Result<(), DecodeError> {
        match self.encoding {
            XmlEncoding::Utf8 => self.decode_utf8(src, dst, last),
            XmlEncoding::Utf16Le => self.decode_utf16(src, dst, last, false),
            XmlEncoding::Utf16Be => self.decode_utf16(src, dst, last, true),
            XmlEncoding::Ascii => {
                if let Some(i) = src.iter().position(|b| !b.is_ascii()) {
                    return Err(DecodeError::new(self.offset + i as u64, "byte outside US-ASCII"));
                }
                dst.extend(src.iter().map(|&b| b as char));
                self.offset += src.len() as u64;
                Ok(())
            }
            XmlEncoding::Latin1 => {
                dst.extend(src.iter().map(|&b| b as char));
                self.offset += src.len() as u64;
                Ok(())
            }
            XmlEncoding::Other(_) => self.decode_other(src, dst, last),
        }
    }

    fn decode_utf8(&mut self, mut src: &[u8], dst: &mut String, last: bool) -> Result<(), DecodeError> {
        if !self.pending.is_empty() {
            let need = utf8_sequence_len(self.pending[0]);
            let take = need.saturating_sub(self.pending.len()).min(src.len());
            self.pending.extend_from_slice(&src[..take]);
            src = &src[take..];
            if self.pending.len() < need {
                if last {
                    return Err(DecodeError::new(self.offset, "truncated UTF-8 sequence"));
                }
                return Ok(());
            }
            match std::str::from_utf8(&self.pending) {
                Ok(s) => dst.push_str(s),
                Err(_) => return Err(DecodeError::new(self.offset, "invalid UTF-8 sequence")),
            }
            self.offset += need as u64;
            self.pending.clear();
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                dst.push_str(s);
                self.offset += src.len() as u64;
                Ok(())
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&src[..valid]) {
                    dst.push_str(s);
                }
                let at = self.offset + valid as u64;
                match e.error_len() {
                    Some(_) => Err(DecodeError::new(at, "invalid UTF-8 sequence")),
                    None if last => Err(DecodeError::new(at, "truncated UTF-8 sequence")),
                    None => {
                        self.pending.extend_from_slice(&src[valid..]);
                        self.offset = at;
                        Ok(())
                    }
                }
            }
        }
    }

    fn decode_utf16(
        &mut self,
        src: &[u8],
        dst: &mut String,
        last: bool,
        big_endian: bool,
    ) -> Result<(), DecodeError> {
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len() + src.len();
        let byte_at = |k: usize| {
            if k < pending.len() {
                pending[k]
            } else {
                src[k - pending.len()]
            }
        };
        let unit_at = |k: usize| {
            let (a, b) = (byte_at(k), byte_at(k + 1));
            if big_endian {
                u16::from_be_bytes([a, b])
            } else {
                u16::from_le_bytes([a, b])
            }
        };

        let mut i = 0;
        while i + 2 <= total {
            let unit = unit_at(i);
            match unit {
                0xD800..=0xDBFF => {
                    if i + 4 > total {
                        break;
                    }
                    let low = unit_at(i + 2);
                    if !(0xDC00..=0xDFFF).contains(&low) {
                        return Err(DecodeError::new(self.offset + i as u64, "unpaired UTF-16 surrogate"));
                    }
                    let scalar = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                    match char::from_u32(scalar) {
                        Some(c) => dst.push(c),
                        None => {
                            return Err(DecodeError::new(self.offset + i as u64, "invalid UTF-16 sequence"))
                        }
                    }
                    i += 4;
                }
                0xDC00..=0xDFFF => {
                    return Err(DecodeError::new(self.offset + i as u64, "unpaired UTF-16 surrogate"));
                }
                _ => {
                    match char::from_u32(unit as u32) {
                        Some(c) => dst.push(c),
                        None => {
                            return Err(DecodeError::new(self.offset + i as u64, "invalid UTF-16 sequence"))
                        }
                    }
                    i += 2;
                }
            }
        }

        if i < total {
            if last {
                return Err(DecodeError::new(self.offset + i as u64, "truncated UTF-16 sequence"));
            }
            self.pending = (i..total).map(byte_at).collect();
        }
        self.offset += i as u64;
        Ok(())
    }

    fn decode_other(&mut self, src: &[u8], dst: &mut String, last: bool) -> Result<(), DecodeError> {
        let Some(decoder) = self.other.as_mut() else {
            return Ok(());
        };
        let mut read_total = 0;
        loop {
            let remaining = &src[read_total..];
            let reserve = decoder
                .max_utf8_buffer_length_without_replacement(remaining.len())
                .unwrap_or(remaining.len() * 3 + 16);
            dst.reserve(reserve);
            let (result, read) = decoder.decode_to_string_without_replacement(remaining, dst, last);
            read_total += read;
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(bad, consumed_after) => {
                    let at = (self.offset + read_total as u64)
                        .saturating_sub(bad as u64 + consumed_after as u64);
                    return Err(DecodeError::new(
                        at,
                        format!("invalid {} sequence", self.encoding.name()),
                    ));
                }
            }
        }
        self.offset += read_total as u64;
        Ok(())
    }
}

/// Detection followed by decoding, fed chunk by chunk
pub struct StreamDecoder {
    override_label: Option<String>,
    sniffed: Vec<u8>,
    active: Option<(Decoder, EncodingInfo)>,
}

impl StreamDecoder {
    pub fn new(override_label: Option<&str>) -> Self {
        StreamDecoder {
            override_label: override_label.map(str::to_string),
            sniffed: Vec::new(),
            active: None,
        }
    }

    /// The decided encoding, once enough input has been seen
    pub fn info(&self) -> Option<EncodingInfo> {
        self.active.as_ref().map(|(_, info)| *info)
    }

    /// Decode the next chunk onto `dst`
    pub fn decode(&mut self, bytes: &[u8], is_final: bool, dst: &mut String) -> Result<(), DecodeError> {
        if let Some((decoder, _)) = self.active.as_mut() {
            return decoder.decode(bytes, dst, is_final);
        }

        self.sniffed.extend_from_slice(bytes);
        let Some(info) = detect(&self.sniffed, is_final, self.override_label.as_deref())? else {
            return Ok(());
        };
        log::debug!(
            "input encoding {} from {:?}, {} byte BOM",
            info.encoding,
            info.source,
            info.bom_len
        );

        let buffered = std::mem::take(&mut self.sniffed);
        let mut decoder = Decoder::new(info.encoding, info.bom_len as u64);
        let result = decoder.decode(&buffered[info.bom_len..], dst, is_final);
        self.active = Some((decoder, info));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]], label: Option<&str>) -> Result<(String, EncodingInfo), DecodeError> {
        let mut stream = StreamDecoder::new(label);
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            stream.decode(chunk, i + 1 == chunks.len(), &mut out)?;
        }
        Ok((out, stream.info().unwrap()))
    }

    #[test]
    fn test_detect_bom() {
        let info = detect(&[0xEF, 0xBB, 0xBF, b'<'], false, None).unwrap().unwrap();
        assert_eq!(info.encoding, XmlEncoding::Utf8);
        assert_eq!(info.bom_len, 3);
        let info = detect(&[0xFF, 0xFE, b'<', 0], false, None).unwrap().unwrap();
        assert_eq!(info.encoding, XmlEncoding::Utf16Le);
        let info = detect(&[0x00, b'<', 0x00, b'?'], false, None).unwrap().unwrap();
        assert_eq!(info.encoding, XmlEncoding::Utf16Be);
        assert_eq!(info.source, EncodingSource::Heuristic);
    }

    #[test]
    fn test_detect_waits_for_declaration() {
        assert_eq!(detect(b"<?x", false, None).unwrap(), None);
        assert_eq!(detect(b"<?xml version='1.0'", false, None).unwrap(), None);
        let info = detect(b"<?xml version='1.0' encoding='latin1'?>", false, None)
            .unwrap()
            .unwrap();
        assert_eq!(info.encoding, XmlEncoding::Latin1);
        assert_eq!(info.source, EncodingSource::Declaration);
    }

    #[test]
    fn test_detect_rejects_utf16_declared_in_8bit() {
        let err = detect(b"<?xml version='1.0' encoding='UTF-16'?><a/>", false, None).unwrap_err();
        assert!(err.message.contains("incorrect encoding"));
    }

    #[test]
    fn test_unknown_override() {
        let err = detect(b"<a/>", true, Some("klingon")).unwrap_err();
        assert_eq!(err.byte_offset, 0);
    }

    #[test]
    fn test_utf8_split_sequence() {
        let bytes = "<a>é€😀</a>".as_bytes();
        let (out, _) = decode_all(&[&bytes[..4], &bytes[4..7], &bytes[7..]], None).unwrap();
        assert_eq!(out, "<a>é€😀</a>");
    }

    #[test]
    fn test_utf8_invalid_offset() {
        let err = decode_all(&[b"<a>ok", b"\xFF</a>"], None).unwrap_err();
        assert_eq!(err.byte_offset, 5);
    }

    #[test]
    fn test_utf16le_split_surrogate() {
        let text = "<a>😀</a>";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (out, info) = decode_all(&[&bytes[..9], &bytes[9..11], &bytes[11..]], None).unwrap();
        assert_eq!(out, text);
        assert_eq!(info.encoding, XmlEncoding::Utf16Le);
    }

    #[test]
    fn test_declared_latin1() {
        let (out, _) = decode_all(&[b"<?xml version='1.0' encoding='ISO-8859-1'?><a>caf\xE9</a>"], None).unwrap();
        assert!(out.ends_with("<a>café</a>"));
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        let err = decode_all(&[b"<a>\xC3</a>"], Some("US-ASCII")).unwrap_err();
        assert_eq!(err.byte_offset, 3);
    }

    #[test]
    fn test_encoding_rs_fallback() {
        // "日本" in Shift_JIS
        let (out, info) = decode_all(
            &[b"<?xml version='1.0' encoding='Shift_JIS'?><a>\x93", b"\xfa\x96\x7b</a>"],
            None,
        )
        .unwrap();
        assert!(out.ends_with("<a>日本</a>"));
        assert_eq!(info.encoding.name(), "Shift_JIS");
        assert_eq!(info.encoding.raw_width('日'), 2);
    }
}
