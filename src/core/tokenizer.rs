//! XML Tokenizer - resumable state machine for XML token extraction
//!
//! Decoded text is pushed in piece by piece with `push_str`; `next_token`
//! hands out every token completed so far. A token cut off at the end of
//! the buffered text stays in the partial-token builder until more input
//! arrives, so the token stream never depends on where chunks were split:
//! - Element start/end tags (attribute values kept as text/reference parts)
//! - Text runs, ending only at `<`, `&` or the end of input
//! - Character and entity references
//! - CDATA sections, comments, processing instructions
//! - XML/text declarations and DOCTYPE declarations
//!
//! Line ends are normalized (`\r\n` and `\r` become `\n`) before any state
//! sees them; positions are tracked on the raw characters.

use memchr::memmem;

use super::attributes::{normalize_value_char, RawAttribute, ValuePart};
use super::encoding::XmlEncoding;
use super::entities::char_from_reference;
use super::scanner::Scanner;
use super::unicode::{is_name_char, is_name_start_char, is_pubid_char, is_whitespace, is_xml_char};
use crate::error::ParseError;
use crate::parser::location::{ParseLocation, Position};

/// Significant digits past which a character reference is out of range
const MAX_CHAR_REF_DIGITS: usize = 7;

/// Pseudo-attributes of an XML or text declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlDeclToken {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// `<!DOCTYPE ...>` contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoctypeToken {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    /// Raw text between `[` and `]`
    pub internal_subset: Option<String>,
}

/// Type of XML token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    XmlDecl(XmlDeclToken),
    /// `<name ...>` or `<name .../>`
    StartTag {
        name: String,
        attributes: Vec<RawAttribute>,
        empty: bool,
    },
    EndTag {
        name: String,
    },
    Text(String),
    CharRef(char),
    EntityRef(String),
    CData(String),
    Comment(String),
    Pi {
        target: String,
        data: String,
    },
    Doctype(DoctypeToken),
}

/// A token and the span it covered
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub start: Position,
    pub end: Position,
}

impl Token {
    pub fn location(&self) -> ParseLocation {
        self.start.span_to(&self.end)
    }
}

/// What kind of entity is being tokenized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerMode {
    /// Document entity: XML declaration allowed at the very start
    Document,
    /// External parsed entity: text declaration allowed at the very start
    ExternalEntity,
    /// Replacement text of an internal entity: no declaration at all
    Replacement,
}

/// Where a reference appeared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefContext {
    Content,
    /// Inside an attribute value delimited by this quote
    Attribute(char),
}

/// Current parsing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    /// After `<`
    TagOpen,
    StartTagName,
    BeforeAttrName,
    AttrName,
    AfterAttrName,
    BeforeAttrValue,
    AttrValue(char),
    AfterAttrValue,
    /// After `/` in a start tag
    EmptyTagSlash,
    /// After `</`
    EndTagOpen,
    EndTagName,
    AfterEndTagName,
    /// After `&`
    RefStart(RefContext),
    /// After `&#`
    CharRefStart(RefContext),
    CharRef { ctx: RefContext, hex: bool },
    EntityRefName(RefContext),
    /// After `<!`, collecting `--`, `[CDATA[` or `DOCTYPE`
    MarkupDeclOpen,
    Comment,
    CommentDash,
    CommentDashDash,
    CData,
    CDataBracket,
    CDataBracketBracket,
    /// After `<?`
    PiTarget,
    PiAfterTarget,
    PiData,
    PiQuestion,
    Doctype(DoctypeState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DoctypeState {
    BeforeName,
    Name,
    AfterName,
    /// Reading `SYSTEM` or `PUBLIC`
    Keyword,
    BeforePublicLiteral,
    PublicLiteral(char),
    AfterPublicLiteral,
    BeforeSystemLiteral,
    SystemLiteral(char),
    AfterExternalId,
    Subset,
    SubsetLiteral(char),
    /// Comment in the internal subset; text length where its body starts
    SubsetComment(usize),
    SubsetPi(usize),
    AfterSubset,
}

/// Pieces of the token in progress
#[derive(Debug, Default)]
struct Partial {
    /// Character data, comment/CDATA/PI body, literal or internal subset
    text: String,
    /// Tag name or PI target
    name: String,
    attributes: Vec<RawAttribute>,
    attr_name: String,
    attr_value: Vec<ValuePart>,
    attr_text: String,
    /// Entity name of a reference
    reference: String,
    digits: String,
    /// Characters after `<!`, or a DOCTYPE keyword
    markup: String,
    /// Current PI is an XML or text declaration
    decl: bool,
    doctype: DoctypeToken,
    /// Required whitespace was seen
    space: bool,
    /// Inside a `<!...>` declaration of the internal subset
    subset_decl: bool,
}

enum Step {
    /// Consume the character, token still in progress
    Consume,
    /// Consume the character, token complete
    Emit(TokenKind),
    /// Token complete before this character; reprocess it
    EmitBefore(TokenKind),
}

/// XML tokenizer implementing a pull-parser pattern over pushed text
pub struct Tokenizer {
    mode: TokenizerMode,
    buf: String,
    /// Read position in `buf`
    pos: usize,
    state: State,
    cursor: Position,
    /// Raw byte offset of the first character (after any BOM)
    origin: u64,
    token_start: Position,
    partial: Partial,
    encoding: XmlEncoding,
    /// Previous raw character was `\r`
    after_cr: bool,
}

impl Tokenizer {
    pub fn new(mode: TokenizerMode) -> Self {
        Tokenizer {
            mode,
            buf: String::new(),
            pos: 0,
            state: State::Text,
            cursor: Position::start(0),
            origin: 0,
            token_start: Position::start(0),
            partial: Partial::default(),
            encoding: XmlEncoding::Utf8,
            after_cr: false,
        }
    }

    /// Set the raw encoding (for byte offsets) and where the first
    /// character sits; called once before any text is pushed
    pub fn configure(&mut self, encoding: XmlEncoding, origin: u64) {
        self.encoding = encoding;
        self.origin = origin;
        self.cursor = Position::start(origin);
        self.token_start = self.cursor;
    }

    /// Position of the next unread character
    pub fn position(&self) -> Position {
        self.cursor
    }

    /// Append decoded text
    pub fn push_str(&mut self, text: &str) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.push_str(text);
    }

    /// Next complete token, or `None` when the buffered text is used up
    pub fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        loop {
            if !self.after_cr {
                self.scan_run()?;
            }
            let Some(raw) = self.buf[self.pos..].chars().next() else {
                return Ok(None);
            };
            let width = self.encoding.raw_width(raw);

            if raw == '\n' && self.after_cr {
                self.after_cr = false;
                self.consume(raw, width);
                continue;
            }
            self.after_cr = raw == '\r';
            let c = if raw == '\r' { '\n' } else { raw };
            if !is_xml_char(c) {
                return Err(self.error_here("invalid character"));
            }
            if self.state == State::Text && self.partial.text.is_empty() {
                self.token_start = self.cursor;
            }

            match self.step(c)? {
                Step::Consume => self.consume(raw, width),
                Step::Emit(kind) => {
                    self.consume(raw, width);
                    return Ok(Some(self.token(kind)));
                }
                Step::EmitBefore(kind) => return Ok(Some(self.token(kind))),
            }
        }
    }

    /// End of input: flush trailing text, or fail on an unfinished token
    pub fn finish(&mut self) -> Result<Option<Token>, ParseError> {
        if self.state == State::Text {
            if self.partial.text.is_empty() {
                return Ok(None);
            }
            let text = std::mem::take(&mut self.partial.text);
            return Ok(Some(self.token(TokenKind::Text(text))));
        }
        let message = match self.state {
            State::Comment | State::CommentDash | State::CommentDashDash => "unterminated comment",
            State::CData | State::CDataBracket | State::CDataBracketBracket => {
                "unterminated CDATA section"
            }
            State::PiTarget | State::PiAfterTarget | State::PiData | State::PiQuestion => {
                "unterminated processing instruction"
            }
            State::Doctype(_) => "unterminated DOCTYPE declaration",
            State::RefStart(_)
            | State::CharRefStart(_)
            | State::CharRef { .. }
            | State::EntityRefName(_) => "unterminated reference",
            State::AttrValue(_) => "unterminated attribute value",
            _ => "unclosed tag",
        };
        Err(ParseError::syntax(message, self.token_start.location(0)))
    }

    #[inline]
    fn consume(&mut self, raw: char, width: usize) {
        self.pos += raw.len_utf8();
        self.cursor.advance(raw, width);
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            start: self.token_start,
            end: self.cursor,
        }
    }

    fn error_here(&self, message: &str) -> ParseError {
        ParseError::syntax(message, self.cursor.location(0))
    }

    /// Bulk-copy a run of plain characters for the body states
    fn scan_run(&mut self) -> Result<(), ParseError> {
        let (b1, b2, b3) = match self.state {
            State::Text => (b'<', b'&', b'\r'),
            State::Comment => (b'-', b'\r', b'-'),
            State::CData => (b']', b'\r', b']'),
            State::PiData => (b'?', b'\r', b'?'),
            _ => return Ok(()),
        };
        let start = self.pos;
        let len = Scanner::at(&self.buf, start).run_until3(b1, b2, b3);
        if len == 0 {
            return Ok(());
        }
        let end = start + len;
        let run = &self.buf[start..end];

        if let Some((i, _)) = run.char_indices().find(|(_, c)| !is_xml_char(*c)) {
            let mut at = self.cursor;
            advance_over(&mut at, self.encoding, &run[..i]);
            return Err(ParseError::syntax("invalid character", at.location(0)));
        }

        if self.state == State::Text {
            if self.partial.text.is_empty() {
                self.token_start = self.cursor;
            }
            let old_len = self.partial.text.len();
            let check_from = old_len.saturating_sub(2);
            self.partial.text.push_str(run);
            if let Some(i) = memmem::find(&self.partial.text.as_bytes()[check_from..], b"]]>") {
                let gt = check_from + i + 2 - old_len;
                let mut at = self.cursor;
                advance_over(&mut at, self.encoding, &run[..gt]);
                return Err(ParseError::syntax(
                    "']]>' not allowed in character data",
                    at.location(0),
                ));
            }
        } else {
            self.partial.text.push_str(run);
        }

        advance_over(&mut self.cursor, self.encoding, run);
        self.pos = end;
        Ok(())
    }

    fn step(&mut self, c: char) -> Result<Step, ParseError> {
        match self.state {
            State::Text => match c {
                '<' | '&' if !self.partial.text.is_empty() => {
                    let text = std::mem::take(&mut self.partial.text);
                    return Ok(Step::EmitBefore(TokenKind::Text(text)));
                }
                '<' => self.state = State::TagOpen,
                '&' => self.state = State::RefStart(RefContext::Content),
                '>' if self.partial.text.ends_with("]]") => {
                    return Err(self.error_here("']]>' not allowed in character data"));
                }
                _ => self.partial.text.push(c),
            },

            State::TagOpen => match c {
                '/' => self.state = State::EndTagOpen,
                '!' => self.state = State::MarkupDeclOpen,
                '?' => self.state = State::PiTarget,
                c if is_name_start_char(c) => {
                    self.partial.name.push(c);
                    self.state = State::StartTagName;
                }
                _ => return Err(self.error_here("invalid element name")),
            },

            State::StartTagName => match c {
                c if is_name_char(c) => self.partial.name.push(c),
                c if is_whitespace(c) => self.state = State::BeforeAttrName,
                '>' => return Ok(Step::Emit(self.take_start_tag(false))),
                '/' => self.state = State::EmptyTagSlash,
                _ => return Err(self.error_here("invalid character in element name")),
            },

            State::BeforeAttrName => match c {
                c if is_whitespace(c) => {}
                '>' => return Ok(Step::Emit(self.take_start_tag(false))),
                '/' => self.state = State::EmptyTagSlash,
                c if is_name_start_char(c) => {
                    self.partial.attr_name.push(c);
                    self.state = State::AttrName;
                }
                _ => return Err(self.error_here("invalid attribute name")),
            },

            State::AttrName => match c {
                c if is_name_char(c) => self.partial.attr_name.push(c),
                c if is_whitespace(c) => self.state = State::AfterAttrName,
                '=' => self.state = State::BeforeAttrValue,
                _ => return Err(self.error_here("'=' expected after attribute name")),
            },

            State::AfterAttrName => match c {
                c if is_whitespace(c) => {}
                '=' => self.state = State::BeforeAttrValue,
                _ => return Err(self.error_here("'=' expected after attribute name")),
            },

            State::BeforeAttrValue => match c {
                c if is_whitespace(c) => {}
                '"' | '\'' => self.state = State::AttrValue(c),
                _ => return Err(self.error_here("quoted attribute value expected")),
            },

            State::AttrValue(quote) => match c {
                c if c == quote => {
                    self.finish_attribute();
                    self.state = State::AfterAttrValue;
                }
                '<' => return Err(self.error_here("'<' not allowed in attribute value")),
                '&' => {
                    self.flush_attr_text();
                    self.state = State::RefStart(RefContext::Attribute(quote));
                }
                _ => self.partial.attr_text.push(normalize_value_char(c)),
            },

            State::AfterAttrValue => match c {
                c if is_whitespace(c) => self.state = State::BeforeAttrName,
                '>' => return Ok(Step::Emit(self.take_start_tag(false))),
                '/' => self.state = State::EmptyTagSlash,
                _ => return Err(self.error_here("whitespace required between attributes")),
            },

            State::EmptyTagSlash => match c {
                '>' => return Ok(Step::Emit(self.take_start_tag(true))),
                _ => return Err(self.error_here("'>' expected after '/'")),
            },

            State::EndTagOpen => match c {
                c if is_name_start_char(c) => {
                    self.partial.name.push(c);
                    self.state = State::EndTagName;
                }
                _ => return Err(self.error_here("invalid element name in end tag")),
            },

            State::EndTagName => match c {
                c if is_name_char(c) => self.partial.name.push(c),
                c if is_whitespace(c) => self.state = State::AfterEndTagName,
                '>' => return Ok(Step::Emit(self.take_end_tag())),
                _ => return Err(self.error_here("invalid character in end tag")),
            },

            State::AfterEndTagName => match c {
                c if is_whitespace(c) => {}
                '>' => return Ok(Step::Emit(self.take_end_tag())),
                _ => return Err(self.error_here("'>' expected in end tag")),
            },

            State::RefStart(ctx) => match c {
                '#' => self.state = State::CharRefStart(ctx),
                c if is_name_start_char(c) => {
                    self.partial.reference.push(c);
                    self.state = State::EntityRefName(ctx);
                }
                _ => return Err(self.error_here("invalid entity reference")),
            },

            State::CharRefStart(ctx) => match c {
                'x' => self.state = State::CharRef { ctx, hex: true },
                c if c.is_ascii_digit() => {
                    if c != '0' {
                        self.partial.digits.push(c);
                    }
                    self.state = State::CharRef { ctx, hex: false };
                }
                _ => return Err(self.error_here("invalid character reference")),
            },

            State::CharRef { ctx, hex } => match c {
                ';' => {
                    let digits = std::mem::take(&mut self.partial.digits);
                    let resolved = char_from_reference(&digits, hex)
                        .ok_or_else(|| self.error_here("invalid character reference"))?;
                    return Ok(self.complete_reference(ctx, ValuePart::CharRef(resolved)));
                }
                c if (hex && c.is_ascii_hexdigit()) || c.is_ascii_digit() => {
                    let leading_zero = c == '0' && self.partial.digits.is_empty();
                    if !leading_zero {
                        if self.partial.digits.len() >= MAX_CHAR_REF_DIGITS {
                            return Err(self.error_here("character reference out of range"));
                        }
                        self.partial.digits.push(c);
                    }
                }
                _ => return Err(self.error_here("invalid character reference")),
            },

            State::EntityRefName(ctx) => match c {
                ';' => {
                    let name = std::mem::take(&mut self.partial.reference);
                    return Ok(self.complete_reference(ctx, ValuePart::EntityRef(name)));
                }
                c if is_name_char(c) => self.partial.reference.push(c),
                _ => return Err(self.error_here("';' expected after entity name")),
            },

            State::MarkupDeclOpen => {
                self.partial.markup.push(c);
                match self.partial.markup.as_str() {
                    "--" => {
                        self.partial.markup.clear();
                        self.state = State::Comment;
                    }
                    "[CDATA[" => {
                        self.partial.markup.clear();
                        self.state = State::CData;
                    }
                    "DOCTYPE" => {
                        self.partial.markup.clear();
                        self.partial.space = false;
                        self.state = State::Doctype(DoctypeState::BeforeName);
                    }
                    m if "--".starts_with(m) || "[CDATA[".starts_with(m) || "DOCTYPE".starts_with(m) => {}
                    _ => return Err(self.error_here("invalid markup declaration")),
                }
            }

            State::Comment => match c {
                '-' => self.state = State::CommentDash,
                _ => self.partial.text.push(c),
            },

            State::CommentDash => match c {
                '-' => self.state = State::CommentDashDash,
                _ => {
                    self.partial.text.push('-');
                    self.partial.text.push(c);
                    self.state = State::Comment;
                }
            },

            State::CommentDashDash => match c {
                '>' => {
                    self.state = State::Text;
                    let body = std::mem::take(&mut self.partial.text);
                    return Ok(Step::Emit(TokenKind::Comment(body)));
                }
                _ => return Err(self.error_here("'--' not allowed in comment")),
            },

            State::CData => match c {
                ']' => self.state = State::CDataBracket,
                _ => self.partial.text.push(c),
            },

            State::CDataBracket => match c {
                ']' => self.state = State::CDataBracketBracket,
                _ => {
                    self.partial.text.push(']');
                    self.partial.text.push(c);
                    self.state = State::CData;
                }
            },

            State::CDataBracketBracket => match c {
                '>' => {
                    self.state = State::Text;
                    let body = std::mem::take(&mut self.partial.text);
                    return Ok(Step::Emit(TokenKind::CData(body)));
                }
                ']' => self.partial.text.push(']'),
                _ => {
                    self.partial.text.push_str("]]");
                    self.partial.text.push(c);
                    self.state = State::CData;
                }
            },

            State::PiTarget => {
                if self.partial.name.is_empty() {
                    if !is_name_start_char(c) {
                        return Err(self.error_here("invalid processing instruction target"));
                    }
                    self.partial.name.push(c);
                } else if is_name_char(c) {
                    self.partial.name.push(c);
                } else if is_whitespace(c) {
                    self.check_pi_target()?;
                    self.state = State::PiAfterTarget;
                } else if c == '?' {
                    self.check_pi_target()?;
                    self.state = State::PiQuestion;
                } else {
                    return Err(self.error_here("invalid processing instruction target"));
                }
            }

            State::PiAfterTarget => match c {
                c if is_whitespace(c) => {}
                '?' => self.state = State::PiQuestion,
                _ => {
                    self.partial.text.push(c);
                    self.state = State::PiData;
                }
            },

            State::PiData => match c {
                '?' => self.state = State::PiQuestion,
                _ => self.partial.text.push(c),
            },

            State::PiQuestion => match c {
                '>' => return self.take_pi().map(Step::Emit),
                '?' => self.partial.text.push('?'),
                _ => {
                    self.partial.text.push('?');
                    self.partial.text.push(c);
                    self.state = State::PiData;
                }
            },

            State::Doctype(ds) => return self.step_doctype(ds, c),
        }
        Ok(Step::Consume)
    }

    fn step_doctype(&mut self, ds: DoctypeState, c: char) -> Result<Step, ParseError> {
        use DoctypeState::*;

        let next = match ds {
            BeforeName => {
                if is_whitespace(c) {
                    self.partial.space = true;
                    BeforeName
                } else if self.partial.space && is_name_start_char(c) {
                    self.partial.doctype.name.push(c);
                    Name
                } else {
                    return Err(self.error_here("document type name expected"));
                }
            }
            Name => match c {
                c if is_name_char(c) => {
                    self.partial.doctype.name.push(c);
                    Name
                }
                c if is_whitespace(c) => AfterName,
                '[' => Subset,
                '>' => return Ok(self.take_doctype()),
                _ => return Err(self.error_here("invalid character in document type name")),
            },
            AfterName => match c {
                c if is_whitespace(c) => AfterName,
                '[' => Subset,
                '>' => return Ok(self.take_doctype()),
                'S' | 'P' => {
                    self.partial.markup.push(c);
                    Keyword
                }
                _ => return Err(self.error_here("invalid DOCTYPE declaration")),
            },
            Keyword => match c {
                c if c.is_ascii_uppercase() => {
                    self.partial.markup.push(c);
                    Keyword
                }
                c if is_whitespace(c) => match std::mem::take(&mut self.partial.markup).as_str() {
                    "SYSTEM" => BeforeSystemLiteral,
                    "PUBLIC" => BeforePublicLiteral,
                    _ => return Err(self.error_here("SYSTEM or PUBLIC expected")),
                },
                _ => return Err(self.error_here("SYSTEM or PUBLIC expected")),
            },
            BeforePublicLiteral => match c {
                c if is_whitespace(c) => BeforePublicLiteral,
                '"' | '\'' => PublicLiteral(c),
                _ => return Err(self.error_here("public identifier expected")),
            },
            PublicLiteral(quote) => {
                if c == quote {
                    self.partial.doctype.public_id = Some(std::mem::take(&mut self.partial.text));
                    self.partial.space = false;
                    AfterPublicLiteral
                } else if is_pubid_char(c) {
                    self.partial.text.push(c);
                    PublicLiteral(quote)
                } else {
                    return Err(self.error_here("invalid character in public identifier"));
                }
            }
            AfterPublicLiteral => match c {
                c if is_whitespace(c) => {
                    self.partial.space = true;
                    AfterPublicLiteral
                }
                '"' | '\'' if self.partial.space => SystemLiteral(c),
                _ => return Err(self.error_here("system literal expected")),
            },
            BeforeSystemLiteral => match c {
                c if is_whitespace(c) => BeforeSystemLiteral,
                '"' | '\'' => SystemLiteral(c),
                _ => return Err(self.error_here("system literal expected")),
            },
            SystemLiteral(quote) => {
                if c == quote {
                    self.partial.doctype.system_id = Some(std::mem::take(&mut self.partial.text));
                    AfterExternalId
                } else {
                    self.partial.text.push(c);
                    SystemLiteral(quote)
                }
            }
            AfterExternalId => match c {
                c if is_whitespace(c) => AfterExternalId,
                '[' => Subset,
                '>' => return Ok(self.take_doctype()),
                _ => return Err(self.error_here("'[' or '>' expected in DOCTYPE")),
            },
            Subset => {
                if c == ']' && !self.partial.subset_decl {
                    self.partial.doctype.internal_subset = Some(std::mem::take(&mut self.partial.text));
                    AfterSubset
                } else {
                    self.partial.text.push(c);
                    let text = &self.partial.text;
                    if self.partial.subset_decl && (c == '"' || c == '\'') {
                        SubsetLiteral(c)
                    } else if text.ends_with("<!--") {
                        self.partial.subset_decl = false;
                        SubsetComment(text.len())
                    } else if text.ends_with("<?") {
                        SubsetPi(text.len())
                    } else if text.ends_with("<!") {
                        self.partial.subset_decl = true;
                        Subset
                    } else {
                        if c == '>' {
                            self.partial.subset_decl = false;
                        }
                        Subset
                    }
                }
            }
            SubsetLiteral(quote) => {
                self.partial.text.push(c);
                if c == quote {
                    Subset
                } else {
                    SubsetLiteral(quote)
                }
            }
            SubsetComment(body) => {
                self.partial.text.push(c);
                let text = &self.partial.text;
                if text.len() >= body + 3 && text.ends_with("-->") {
                    Subset
                } else {
                    SubsetComment(body)
                }
            }
            SubsetPi(body) => {
                self.partial.text.push(c);
                let text = &self.partial.text;
                if text.len() >= body + 2 && text.ends_with("?>") {
                    Subset
                } else {
                    SubsetPi(body)
                }
            }
            AfterSubset => match c {
                c if is_whitespace(c) => AfterSubset,
                '>' => return Ok(self.take_doctype()),
                _ => return Err(self.error_here("'>' expected after internal subset")),
            },
        };
        self.state = State::Doctype(next);
        Ok(Step::Consume)
    }

    fn complete_reference(&mut self, ctx: RefContext, part: ValuePart) -> Step {
        match ctx {
            RefContext::Content => {
                self.state = State::Text;
                Step::Emit(match part {
                    ValuePart::CharRef(c) => TokenKind::CharRef(c),
                    ValuePart::EntityRef(name) => TokenKind::EntityRef(name),
                    ValuePart::Text(text) => TokenKind::Text(text),
                })
            }
            RefContext::Attribute(quote) => {
                self.partial.attr_value.push(part);
                self.state = State::AttrValue(quote);
                Step::Consume
            }
        }
    }

    fn flush_attr_text(&mut self) {
        if !self.partial.attr_text.is_empty() {
            let text = std::mem::take(&mut self.partial.attr_text);
            self.partial.attr_value.push(ValuePart::Text(text));
        }
    }

    fn finish_attribute(&mut self) {
        self.flush_attr_text();
        let attribute = RawAttribute {
            name: std::mem::take(&mut self.partial.attr_name),
            value: std::mem::take(&mut self.partial.attr_value),
        };
        self.partial.attributes.push(attribute);
    }

    fn take_start_tag(&mut self, empty: bool) -> TokenKind {
        self.state = State::Text;
        TokenKind::StartTag {
            name: std::mem::take(&mut self.partial.name),
            attributes: std::mem::take(&mut self.partial.attributes),
            empty,
        }
    }

    fn take_end_tag(&mut self) -> TokenKind {
        self.state = State::Text;
        TokenKind::EndTag {
            name: std::mem::take(&mut self.partial.name),
        }
    }

    fn take_doctype(&mut self) -> Step {
        self.state = State::Text;
        self.partial.subset_decl = false;
        Step::Emit(TokenKind::Doctype(std::mem::take(&mut self.partial.doctype)))
    }

    fn take_pi(&mut self) -> Result<TokenKind, ParseError> {
        self.state = State::Text;
        let target = std::mem::take(&mut self.partial.name);
        let data = std::mem::take(&mut self.partial.text);
        if std::mem::take(&mut self.partial.decl) {
            let text_decl = self.mode != TokenizerMode::Document;
            let decl = parse_xml_decl(&data, text_decl)
                .map_err(|message| ParseError::syntax(message, self.token_start.location(0)))?;
            return Ok(TokenKind::XmlDecl(decl));
        }
        Ok(TokenKind::Pi { target, data })
    }

    /// `xml` in any case is reserved; only the exact declaration at the
    /// very start of a document or external entity is allowed
    fn check_pi_target(&mut self) -> Result<(), ParseError> {
        if !self.partial.name.eq_ignore_ascii_case("xml") {
            return Ok(());
        }
        let at_start = self.token_start.byte_offset == self.origin;
        let location = self.token_start.location(0);
        if self.partial.name != "xml" {
            Err(ParseError::syntax("reserved processing instruction target", location))
        } else if at_start && self.mode != TokenizerMode::Replacement {
            self.partial.decl = true;
            Ok(())
        } else {
            Err(ParseError::syntax("XML declaration not at start of entity", location))
        }
    }
}

fn advance_over(cursor: &mut Position, encoding: XmlEncoding, run: &str) {
    for c in run.chars() {
        cursor.advance(c, encoding.raw_width(c));
    }
}

/// Parse the pseudo-attributes of `<?xml ...?>`.
///
/// A document declaration needs `version` first, then optional `encoding`
/// and `standalone`. A text declaration has an optional `version` and a
/// required `encoding`, and no `standalone`.
fn parse_xml_decl(data: &str, text_decl: bool) -> Result<XmlDeclToken, &'static str> {
    let mut scanner = Scanner::new(data);
    let mut decl = XmlDeclToken::default();
    let mut seen_any = false;

    loop {
        let spaced = scanner.skip_whitespace();
        if scanner.is_eof() {
            break;
        }
        if seen_any && !spaced {
            return Err("whitespace required between pseudo-attributes");
        }
        let name = scanner.read_name().ok_or("invalid XML declaration")?;
        scanner.skip_whitespace();
        if !scanner.eat("=") {
            return Err("'=' expected in XML declaration");
        }
        scanner.skip_whitespace();
        let value = scanner
            .read_quoted()
            .ok_or("quoted value expected in XML declaration")?;

        match name {
            "version" if !seen_any => {
                let digits = value.strip_prefix("1.").unwrap_or("");
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err("XML version must be '1.' followed by digits");
                }
                decl.version = Some(value.to_string());
            }
            "encoding" if decl.encoding.is_none() && decl.standalone.is_none() => {
                if !is_enc_name(value) {
                    return Err("invalid encoding name");
                }
                decl.encoding = Some(value.to_string());
            }
            "standalone" if !text_decl && decl.standalone.is_none() => {
                decl.standalone = Some(match value {
                    "yes" => true,
                    "no" => false,
                    _ => return Err("standalone value must be 'yes' or 'no'"),
                });
            }
            _ => return Err("unexpected pseudo-attribute in XML declaration"),
        }
        seen_any = true;
    }

    if !text_decl && decl.version.is_none() {
        return Err("XML declaration must have version attribute");
    }
    if text_decl && decl.encoding.is_none() {
        return Err("text declaration must have encoding attribute");
    }
    Ok(decl)
}

/// EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
fn is_enc_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => {
            bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        }
        _ => false,
    }
}
