//! Decoder for raw agent output into an [`ActionStream`].
//!
//! The stream is prose interleaved with tagged blocks:
//!
//! ```text
//! <boltArtifact id="todo" title="Todo app">
//!   <boltAction type="file" filePath="src/main.js">...</boltAction>
//!   <boltAction type="shell">npm install</boltAction>
//!   <boltAction type="modification" filePath="a.txt"><diff>...</diff></boltAction>
//! </boltArtifact>
//! <bolt_file_modifications>
//!   <diff path="a.txt">...</diff>
//!   <file path="b.txt">...</file>
//! </bolt_file_modifications>
//! ```
//!
//! Blocks never nest. [`parse_stream`] requires every block to be closed;
//! [`parse_partial`] tolerates a stream cut off at the end and reports what
//! was still open, which is what the continuation coordinator works from.

use crate::core::dedent::strip_common_indent;
use crate::core::error::ProtocolError;
use crate::core::grammar::Grammar;
use crate::core::types::{
    Action, ActionStream, ArtifactMeta, ModificationForm, ParsedAction, ProtocolConfig,
};
use crate::core::unified_diff::parse_unified_diff;

/// Path attribute of items inside the modifications section.
pub const ITEM_PATH_ATTRIBUTE: &str = "path";
pub const TYPE_ATTRIBUTE: &str = "type";

/// Parse a complete action stream.
pub fn parse_stream(text: &str, config: &ProtocolConfig) -> Result<ActionStream, ProtocolError> {
    let partial = parse_partial(text, config)?;
    if let Some(open) = &partial.open_block {
        return Err(ProtocolError::malformed(
            open.offset,
            format!("unclosed <{}> block", open.tag),
        ));
    }
    if let Some(offset) = partial.tag_fragment {
        return Err(ProtocolError::malformed(offset, "truncated tag"));
    }
    if let Some(container) = &partial.open_container {
        return Err(ProtocolError::malformed(
            container.offset,
            format!("unclosed <{}>", container.tag),
        ));
    }
    Ok(partial.stream)
}

/// Parse a stream that may have been cut off mid-block.
///
/// Structural errors (nesting, stray closing tags, bad attributes) are still
/// errors; only an unfinished tail is tolerated.
pub fn parse_partial(text: &str, config: &ProtocolConfig) -> Result<PartialStream, ProtocolError> {
    Scanner {
        text,
        grammar: &config.grammar,
        work_dir: &config.work_dir,
        pos: 0,
        container: None,
        out: PartialStream::default(),
    }
    .run()
}

/// Outcome of scanning a possibly truncated stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialStream {
    /// Every block that was closed.
    pub stream: ActionStream,
    /// A block whose closing tag never arrived.
    pub open_block: Option<OpenBlock>,
    /// An artifact or modifications section that was never closed.
    pub open_container: Option<OpenContainer>,
    /// Offset of a tag cut off before its name or header was complete.
    pub tag_fragment: Option<usize>,
}

impl PartialStream {
    /// True when nothing was left open at the end of the text.
    pub fn is_complete(&self) -> bool {
        self.open_block.is_none() && self.open_container.is_none() && self.tag_fragment.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBlock {
    pub offset: usize,
    pub tag: String,
    /// The opening tag was emitted in full (attributes are known).
    pub header_complete: bool,
    pub attributes: Vec<(String, String)>,
    /// Raw body emitted so far.
    pub body: String,
    /// Item of the modifications section rather than an action block.
    pub section_item: bool,
}

impl OpenBlock {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        attribute(&self.attributes, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenContainer {
    pub offset: usize,
    pub tag: String,
    /// Offset just past the opening tag.
    pub header_end: usize,
}

/// Normalize an action path to a clean relative path under `work_dir`.
pub fn normalize_path(raw: &str, work_dir: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    let root = work_dir.trim_end_matches('/');
    let relative = match trimmed.strip_prefix(root) {
        Some(rest) if !root.is_empty() && rest.starts_with('/') => &rest[1..],
        _ if trimmed.starts_with('/') => {
            return Err(format!(
                "path `{trimmed}` is outside the working directory {work_dir}"
            ));
        }
        _ => trimmed,
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(format!("path `{trimmed}` escapes the working directory"));
                }
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(format!("path `{trimmed}` does not name a file"));
    }
    Ok(segments.join("/"))
}

/// Drop the line break after the opening tag and the whitespace-only line
/// before the closing tag, then strip common indentation.
pub fn normalize_body(raw: &str) -> String {
    let mut body = raw;
    if let Some(newline) = body.find('\n')
        && body[..newline].trim().is_empty()
    {
        body = &body[newline + 1..];
    }
    if let Some(newline) = body.rfind('\n')
        && body[newline + 1..].trim().is_empty()
    {
        body = &body[..newline + 1];
    }
    strip_common_indent(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Artifact,
    Modifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Action,
    Item(ModificationForm),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Open(ContainerKind),
    Close(ContainerKind),
    Block(BlockKind),
    StrayClose,
    Fragment,
    Prose,
}

enum Flow {
    Continue,
    Stop,
}

struct Container {
    kind: ContainerKind,
    offset: usize,
    header_end: usize,
}

struct Scanner<'a> {
    text: &'a str,
    grammar: &'a Grammar,
    work_dir: &'a str,
    pos: usize,
    container: Option<Container>,
    out: PartialStream,
}

impl<'a> Scanner<'a> {
    fn run(mut self) -> Result<PartialStream, ProtocolError> {
        while let Some(rel) = self.text[self.pos..].find('<') {
            let at = self.pos + rel;
            let flow = match self.classify(at) {
                Tag::Prose => {
                    self.pos = at + 1;
                    Flow::Continue
                }
                Tag::Fragment => {
                    self.out.tag_fragment = Some(at);
                    Flow::Stop
                }
                Tag::Open(kind) => self.open_container(at, kind)?,
                Tag::Close(kind) => self.close_container(at, kind)?,
                Tag::Block(kind) => self.block(at, kind)?,
                Tag::StrayClose => {
                    return Err(ProtocolError::malformed(
                        at,
                        format!("unexpected </{}>", self.grammar.action_tag),
                    ));
                }
            };
            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        if let Some(container) = self.container.take() {
            self.out.open_container = Some(OpenContainer {
                offset: container.offset,
                tag: self.container_tag(container.kind).to_string(),
                header_end: container.header_end,
            });
        }
        Ok(self.out)
    }

    fn container_tag(&self, kind: ContainerKind) -> &'a str {
        match kind {
            ContainerKind::Artifact => &self.grammar.artifact_tag,
            ContainerKind::Modifications => &self.grammar.modifications_tag,
        }
    }

    fn block_tag(&self, kind: BlockKind) -> &'a str {
        match kind {
            BlockKind::Action => &self.grammar.action_tag,
            BlockKind::Item(ModificationForm::Diff) => &self.grammar.diff_tag,
            BlockKind::Item(ModificationForm::FullFile) => &self.grammar.file_tag,
        }
    }

    fn in_section(&self) -> bool {
        matches!(
            self.container,
            Some(Container {
                kind: ContainerKind::Modifications,
                ..
            })
        )
    }

    fn classify(&self, at: usize) -> Tag {
        let rest = &self.text[at..];
        let grammar = self.grammar;

        for kind in [ContainerKind::Artifact, ContainerKind::Modifications] {
            let tag = self.container_tag(kind);
            if closes_tag(rest, tag) {
                return Tag::Close(kind);
            }
            if opens_tag(rest, tag) {
                return Tag::Open(kind);
            }
        }
        if opens_tag(rest, &grammar.action_tag) {
            return Tag::Block(BlockKind::Action);
        }
        if closes_tag(rest, &grammar.action_tag) {
            return Tag::StrayClose;
        }

        let mut names = vec![
            format!("<{}", grammar.artifact_tag),
            format!("</{}>", grammar.artifact_tag),
            format!("<{}", grammar.modifications_tag),
            format!("</{}>", grammar.modifications_tag),
            format!("<{}", grammar.action_tag),
        ];
        if self.in_section() {
            for form in [ModificationForm::Diff, ModificationForm::FullFile] {
                let tag = self.block_tag(BlockKind::Item(form));
                if opens_tag(rest, tag) {
                    return Tag::Block(BlockKind::Item(form));
                }
                names.push(format!("<{tag}"));
            }
        }

        // The text ends partway through a known tag name, a lone `<` included.
        if names
            .iter()
            .any(|name| name.len() > rest.len() && name.starts_with(rest))
        {
            return Tag::Fragment;
        }
        Tag::Prose
    }

    fn open_container(&mut self, at: usize, kind: ContainerKind) -> Result<Flow, ProtocolError> {
        let tag = self.container_tag(kind);
        if let Some(current) = &self.container {
            return Err(ProtocolError::malformed(
                at,
                format!(
                    "<{tag}> cannot appear inside <{}>",
                    self.container_tag(current.kind)
                ),
            ));
        }
        let header = match parse_open_tag(self.text, at, tag) {
            Ok(header) => header,
            Err(TagError::Truncated) => {
                self.out.tag_fragment = Some(at);
                return Ok(Flow::Stop);
            }
            Err(TagError::Invalid(reason)) => return Err(ProtocolError::malformed(at, reason)),
        };

        if kind == ContainerKind::Artifact {
            self.out.stream.artifacts.push(ArtifactMeta {
                id: attribute(&header.attributes, "id").map(str::to_string),
                title: attribute(&header.attributes, "title").map(str::to_string),
            });
        }
        if !header.self_closing {
            self.container = Some(Container {
                kind,
                offset: at,
                header_end: header.end,
            });
        }
        self.pos = header.end;
        Ok(Flow::Continue)
    }

    fn close_container(&mut self, at: usize, kind: ContainerKind) -> Result<Flow, ProtocolError> {
        let tag = self.container_tag(kind);
        match &self.container {
            Some(current) if current.kind == kind => {
                self.container = None;
                self.pos = at + tag.len() + 3;
                Ok(Flow::Continue)
            }
            _ => Err(ProtocolError::malformed(at, format!("unexpected </{tag}>"))),
        }
    }

    fn block(&mut self, at: usize, kind: BlockKind) -> Result<Flow, ProtocolError> {
        let tag = self.block_tag(kind);
        if kind == BlockKind::Action && self.in_section() {
            return Err(ProtocolError::malformed(
                at,
                format!(
                    "<{tag}> cannot appear inside <{}>",
                    self.grammar.modifications_tag
                ),
            ));
        }
        let section_item = matches!(kind, BlockKind::Item(_));

        let header = match parse_open_tag(self.text, at, tag) {
            Ok(header) => header,
            Err(TagError::Truncated) => {
                self.out.open_block = Some(OpenBlock {
                    offset: at,
                    tag: tag.to_string(),
                    header_complete: false,
                    attributes: Vec::new(),
                    body: String::new(),
                    section_item,
                });
                return Ok(Flow::Stop);
            }
            Err(TagError::Invalid(reason)) => return Err(ProtocolError::malformed(at, reason)),
        };
        if header.self_closing {
            return Err(ProtocolError::malformed(
                at,
                format!("self-closing <{tag}> has no body"),
            ));
        }

        let close = format!("</{tag}>");
        let close_at = self.text[header.end..]
            .find(&close)
            .map(|rel| header.end + rel);
        let nested_at = find_open_tag(self.text, header.end, tag);

        match (close_at, nested_at) {
            (_, Some(nested)) if close_at.is_none_or(|close_at| nested < close_at) => {
                Err(ProtocolError::malformed(
                    at,
                    format!("<{tag}> opened before the previous block was closed"),
                ))
            }
            (Some(close_at), _) => {
                let body = &self.text[header.end..close_at];
                let end = close_at + close.len();
                self.emit(at, end, kind, &header.attributes, body)?;
                self.pos = end;
                Ok(Flow::Continue)
            }
            (None, _) => {
                self.out.open_block = Some(OpenBlock {
                    offset: at,
                    tag: tag.to_string(),
                    header_complete: true,
                    attributes: header.attributes,
                    body: self.text[header.end..].to_string(),
                    section_item,
                });
                Ok(Flow::Stop)
            }
        }
    }

    fn emit(
        &mut self,
        at: usize,
        end: usize,
        kind: BlockKind,
        attributes: &[(String, String)],
        body: &str,
    ) -> Result<(), ProtocolError> {
        let action = match kind {
            BlockKind::Item(form) => {
                let path = self.path(at, attributes, ITEM_PATH_ATTRIBUTE)?;
                let payload = normalize_body(body);
                self.check_payload(at, &path, form, &payload)?;
                Action::Modification {
                    path,
                    form,
                    payload,
                }
            }
            BlockKind::Action => {
                let Some(action_type) = attribute(attributes, TYPE_ATTRIBUTE) else {
                    return Err(ProtocolError::malformed(
                        at,
                        format!("<{}> is missing a `type` attribute", self.grammar.action_tag),
                    ));
                };
                match action_type {
                    "file" => Action::FileWrite {
                        path: self.path(at, attributes, &self.grammar.path_attribute)?,
                        content: normalize_body(body),
                    },
                    "shell" => {
                        let command = normalize_body(body).trim().to_string();
                        if command.is_empty() {
                            return Err(ProtocolError::malformed(at, "empty shell command"));
                        }
                        Action::Shell { command }
                    }
                    "modification" => {
                        let path = self.path(at, attributes, &self.grammar.path_attribute)?;
                        let (form, payload) = self.inner_payload(at, body)?;
                        self.check_payload(at, &path, form, &payload)?;
                        Action::Modification {
                            path,
                            form,
                            payload,
                        }
                    }
                    other => {
                        self.out.stream.warnings.push(format!(
                            "skipped <{}> with unknown type `{other}` at byte {at}",
                            self.grammar.action_tag
                        ));
                        return Ok(());
                    }
                }
            }
        };

        self.out.stream.actions.push(ParsedAction {
            offset: at,
            end,
            action,
        });
        Ok(())
    }

    fn path(
        &self,
        at: usize,
        attributes: &[(String, String)],
        name: &str,
    ) -> Result<String, ProtocolError> {
        let raw = attribute(attributes, name).ok_or_else(|| {
            ProtocolError::malformed(at, format!("missing `{name}` attribute"))
        })?;
        normalize_path(raw, self.work_dir).map_err(|reason| ProtocolError::malformed(at, reason))
    }

    /// Split a modification body into its `<diff>` / `<file>` marker payload.
    fn inner_payload(
        &self,
        at: usize,
        body: &str,
    ) -> Result<(ModificationForm, String), ProtocolError> {
        let inner = body.trim();
        for form in [ModificationForm::Diff, ModificationForm::FullFile] {
            let tag = self.block_tag(BlockKind::Item(form));
            if !opens_tag(inner, tag) {
                continue;
            }
            let header = parse_open_tag(inner, 0, tag).map_err(|_| {
                ProtocolError::malformed(at, format!("unterminated <{tag}> marker"))
            })?;
            let payload = inner[header.end..]
                .strip_suffix(&format!("</{tag}>"))
                .ok_or_else(|| {
                    ProtocolError::malformed(
                        at,
                        format!("<{tag}> marker must wrap the whole modification payload"),
                    )
                })?;
            return Ok((form, normalize_body(payload)));
        }
        Err(ProtocolError::malformed(
            at,
            format!(
                "modification needs a <{}> or <{}> marker",
                self.grammar.diff_tag, self.grammar.file_tag
            ),
        ))
    }

    fn check_payload(
        &self,
        at: usize,
        path: &str,
        form: ModificationForm,
        payload: &str,
    ) -> Result<(), ProtocolError> {
        if form == ModificationForm::Diff {
            parse_unified_diff(payload).map_err(|err| {
                ProtocolError::malformed(at, format!("invalid diff for {path}: {err}"))
            })?;
        }
        Ok(())
    }
}

struct TagHeader {
    attributes: Vec<(String, String)>,
    /// Offset just past `>`.
    end: usize,
    self_closing: bool,
}

enum TagError {
    /// The text ended inside the tag.
    Truncated,
    Invalid(String),
}

/// True when `rest` starts with `<name` followed by a tag boundary (or the end).
fn opens_tag(rest: &str, name: &str) -> bool {
    rest.strip_prefix('<')
        .and_then(|after| after.strip_prefix(name))
        .is_some_and(|after| {
            after
                .chars()
                .next()
                .is_none_or(|c| c.is_whitespace() || c == '>' || c == '/')
        })
}

fn closes_tag(rest: &str, name: &str) -> bool {
    rest.strip_prefix("</")
        .and_then(|after| after.strip_prefix(name))
        .is_some_and(|after| after.starts_with('>'))
}

fn find_open_tag(text: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("<{name}");
    let mut search = from;
    while let Some(rel) = text[search..].find(&needle) {
        let at = search + rel;
        if opens_tag(&text[at..], name) {
            return Some(at);
        }
        search = at + needle.len();
    }
    None
}

fn parse_open_tag(text: &str, at: usize, name: &str) -> Result<TagHeader, TagError> {
    let bytes = text.as_bytes();
    let skip_ws = |mut pos: usize| {
        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }
        pos
    };

    let mut attributes = Vec::new();
    let mut pos = at + 1 + name.len();
    loop {
        pos = skip_ws(pos);
        match bytes.get(pos) {
            None => return Err(TagError::Truncated),
            Some(b'>') => {
                return Ok(TagHeader {
                    attributes,
                    end: pos + 1,
                    self_closing: false,
                });
            }
            Some(b'/') => {
                return match bytes.get(pos + 1) {
                    None => Err(TagError::Truncated),
                    Some(b'>') => Ok(TagHeader {
                        attributes,
                        end: pos + 2,
                        self_closing: true,
                    }),
                    Some(_) => Err(TagError::Invalid(format!("unexpected `/` in <{name}>"))),
                };
            }
            Some(_) => {}
        }

        let name_start = pos;
        while bytes
            .get(pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.'))
        {
            pos += 1;
        }
        if pos == name_start {
            return Err(TagError::Invalid(format!(
                "unexpected character in <{name}> tag"
            )));
        }
        let attr = &text[name_start..pos];

        pos = skip_ws(pos);
        match bytes.get(pos) {
            None => return Err(TagError::Truncated),
            Some(b'=') => pos += 1,
            Some(_) => {
                return Err(TagError::Invalid(format!(
                    "attribute `{attr}` in <{name}> has no value"
                )));
            }
        }

        pos = skip_ws(pos);
        let quote = match bytes.get(pos) {
            None => return Err(TagError::Truncated),
            Some(quote @ (b'"' | b'\'')) => *quote as char,
            Some(_) => {
                return Err(TagError::Invalid(format!(
                    "attribute `{attr}` in <{name}> must be quoted"
                )));
            }
        };
        let value_start = pos + 1;
        let Some(len) = text[value_start..].find(quote) else {
            return Err(TagError::Truncated);
        };
        attributes.push((
            attr.to_string(),
            decode_entities(&text[value_start..value_start + len]),
        ));
        pos = value_start + len + 1;
    }
}

fn attribute<'v>(attributes: &'v [(String, String)], name: &str) -> Option<&'v str> {
    attributes
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
