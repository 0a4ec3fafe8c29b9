//! Resumption of action streams cut off by the generator's output limit.
//!
//! A truncated stream is described by a [`ContinuationMarker`]: how many
//! actions are committed (parsed and applied by the host), where the next turn
//! must pick up, and what was in flight. Partially emitted diffs and shell
//! commands cannot be applied piecemeal, so they are always re-emitted in
//! full; plain content can be spliced at the exact byte the text stopped.

use serde::Serialize;

use crate::core::error::ProtocolError;
use crate::core::grammar::Grammar;
use crate::core::parser::{
    ITEM_PATH_ATTRIBUTE, OpenBlock, PartialStream, TYPE_ATTRIBUTE, normalize_path, parse_partial,
};
use crate::core::types::{ActionStream, ProtocolConfig};

/// Where the next turn picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Resume {
    /// Continue the unfinished block at this byte (the end of the text).
    Splice { offset: usize },
    /// Drop everything from this byte and re-emit from there.
    Restart { offset: usize },
}

impl Resume {
    pub fn offset(self) -> usize {
        match self {
            Resume::Splice { offset } | Resume::Restart { offset } => offset,
        }
    }

    pub fn is_splice(self) -> bool {
        matches!(self, Resume::Splice { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightKind {
    FileWrite,
    Shell,
    DiffModification,
    FullFileModification,
    /// A modification whose `<diff>`/`<file>` marker has not arrived yet.
    PendingModification,
    /// The opening tag itself was cut off, or the type is unknown.
    Unknown,
}

impl InFlightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InFlightKind::FileWrite => "file write",
            InFlightKind::Shell => "shell command",
            InFlightKind::DiffModification => "diff modification",
            InFlightKind::FullFileModification => "full-file modification",
            InFlightKind::PendingModification => "modification",
            InFlightKind::Unknown => "block",
        }
    }

    /// Whether a partial body can be continued in place.
    fn spliceable(self) -> bool {
        matches!(
            self,
            InFlightKind::FileWrite | InFlightKind::FullFileModification
        )
    }
}

/// The block that was being emitted when the text stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlight {
    pub offset: usize,
    pub kind: InFlightKind,
    pub path: Option<String>,
    /// Item of the modifications section rather than an action block.
    pub section_item: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuationMarker {
    /// Actions that are parsed and applied; the next turn must not re-emit
    /// any of them.
    pub committed: usize,
    /// Actions fully parsed from the text so far.
    pub parsed: usize,
    pub resume: Resume,
    pub in_flight: Option<InFlight>,
    /// The artifact wrapper was opened before the resume point and is still
    /// open, so the next turn must not open it again.
    pub artifact_open: bool,
    /// Closing tags, innermost first, that finish a spliced block and every
    /// element still open around it. Empty for a restart.
    pub closing: Vec<String>,
}

impl ContinuationMarker {
    /// The closing tags as one string, e.g. `</file></boltAction>`.
    pub fn closing_sequence(&self) -> String {
        self.closing.iter().map(|tag| format!("</{tag}>")).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Complete(ActionStream),
    Incomplete(ContinuationMarker),
}

impl Assessment {
    pub fn is_complete(&self) -> bool {
        matches!(self, Assessment::Complete(_))
    }

    pub fn marker(&self) -> Option<&ContinuationMarker> {
        match self {
            Assessment::Complete(_) => None,
            Assessment::Incomplete(marker) => Some(marker),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    config: ProtocolConfig,
}

impl Coordinator {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Decide whether `emitted` is a complete stream, given that the host has
    /// applied the first `applied` actions.
    pub fn assess(&self, emitted: &str, applied: usize) -> Result<Assessment, ProtocolError> {
        let partial = parse_partial(emitted, &self.config)?;
        Ok(self.assess_partial(partial, emitted.len(), applied))
    }

    fn assess_partial(&self, partial: PartialStream, text_len: usize, applied: usize) -> Assessment {
        if partial.is_complete() {
            return Assessment::Complete(partial.stream);
        }

        let parsed = partial.stream.len();
        let committed = applied.min(parsed);
        let in_flight = match (&partial.open_block, partial.tag_fragment) {
            (Some(open), _) => Some(classify(open, &self.config)),
            (None, Some(offset)) => Some(InFlight {
                offset,
                kind: InFlightKind::Unknown,
                path: None,
                section_item: false,
            }),
            (None, None) => None,
        };

        // The first byte that is not yet committed.
        let target = if committed < parsed {
            partial.stream.actions[committed].offset
        } else {
            in_flight.as_ref().map_or(text_len, |flight| flight.offset)
        };
        let base = committed
            .checked_sub(1)
            .map_or(0, |last| partial.stream.actions[last].end);
        let header_end = partial
            .open_container
            .as_ref()
            .map(|container| container.header_end)
            .filter(|end| *end <= target);
        let boundary = header_end.map_or(base, |end| end.max(base));

        let resume = match &in_flight {
            Some(flight) if committed == parsed && flight.kind.spliceable() => {
                Resume::Splice { offset: text_len }
            }
            _ => Resume::Restart { offset: boundary },
        };
        let artifact_open = partial.open_container.as_ref().is_some_and(|container| {
            container.tag == self.config.grammar.artifact_tag
                && container.header_end <= resume.offset()
        });
        let closing = match &in_flight {
            Some(flight) if resume.is_splice() => {
                let mut tags = closing_tags(flight, &self.config.grammar);
                tags.extend(partial.open_container.map(|container| container.tag));
                tags
            }
            _ => Vec::new(),
        };

        Assessment::Incomplete(ContinuationMarker {
            committed,
            parsed,
            resume,
            in_flight,
            artifact_open,
            closing,
        })
    }
}

fn classify(open: &OpenBlock, config: &ProtocolConfig) -> InFlight {
    let grammar = &config.grammar;
    let path_attribute = if open.section_item {
        ITEM_PATH_ATTRIBUTE
    } else {
        grammar.path_attribute.as_str()
    };
    let path = open.attribute(path_attribute).map(|raw| {
        normalize_path(raw, &config.work_dir).unwrap_or_else(|_| raw.to_string())
    });

    let kind = if !open.header_complete {
        InFlightKind::Unknown
    } else if open.section_item {
        if open.tag == grammar.diff_tag {
            InFlightKind::DiffModification
        } else {
            InFlightKind::FullFileModification
        }
    } else {
        match open.attribute(TYPE_ATTRIBUTE) {
            Some("file") => InFlightKind::FileWrite,
            Some("shell") => InFlightKind::Shell,
            Some("modification") => modification_kind(&open.body, grammar),
            _ => InFlightKind::Unknown,
        }
    };

    InFlight {
        offset: open.offset,
        kind,
        path,
        section_item: open.section_item,
    }
}

/// Tags that close a spliceable block, innermost first.
fn closing_tags(flight: &InFlight, grammar: &Grammar) -> Vec<String> {
    match (flight.kind, flight.section_item) {
        (InFlightKind::FullFileModification, true) => vec![grammar.file_tag.clone()],
        (InFlightKind::FullFileModification, false) => {
            vec![grammar.file_tag.clone(), grammar.action_tag.clone()]
        }
        _ => vec![grammar.action_tag.clone()],
    }
}

fn modification_kind(body: &str, grammar: &Grammar) -> InFlightKind {
    let inner = body.trim_start();
    let opens = |tag: &str| {
        inner
            .strip_prefix('<')
            .and_then(|rest| rest.strip_prefix(tag))
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_whitespace() || c == '>'))
    };
    if opens(&grammar.diff_tag) {
        InFlightKind::DiffModification
    } else if opens(&grammar.file_tag) && inner.contains('>') {
        InFlightKind::FullFileModification
    } else {
        InFlightKind::PendingModification
    }
}

/// Result of stitching one more turn onto a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stitch {
    /// Bytes of the previous text dropped by a restart.
    pub discarded: usize,
    /// Index of an action the new turn re-emitted right after an identical
    /// one.
    pub duplicate: Option<usize>,
    pub assessment: Assessment,
}

/// Accumulates generator turns into one stream.
#[derive(Debug, Clone)]
pub struct Transcript {
    coordinator: Coordinator,
    text: String,
    /// Host progress; when unset every parsed action counts as committed.
    applied: Option<usize>,
    assessment: Option<Assessment>,
}

impl Transcript {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            coordinator: Coordinator::new(config),
            text: String::new(),
            applied: None,
            assessment: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Record how many actions the host has applied so far.
    pub fn record_applied(&mut self, applied: usize) {
        self.applied = Some(applied);
    }

    /// Marker for the next turn, if the stream is still incomplete.
    pub fn pending(&self) -> Option<&ContinuationMarker> {
        self.assessment.as_ref().and_then(Assessment::marker)
    }

    /// The full action stream once the transcript is complete.
    pub fn complete_actions(&self) -> Option<&ActionStream> {
        match &self.assessment {
            Some(Assessment::Complete(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Re-assess the current text against the host's progress.
    pub fn assess(&mut self) -> Result<&Assessment, ProtocolError> {
        let partial = parse_partial(&self.text, self.coordinator.config())?;
        let applied = self.applied.unwrap_or(partial.stream.len());
        let assessment = self
            .coordinator
            .assess_partial(partial, self.text.len(), applied);
        Ok(self.assessment.insert(assessment))
    }

    /// Stitch `turn` onto the transcript at the pending marker's resume point.
    pub fn accept(&mut self, turn: &str) -> Result<Stitch, ProtocolError> {
        let discarded = match self.pending().map(|marker| marker.resume) {
            Some(Resume::Restart { offset }) => {
                let discarded = self.text.len() - offset;
                self.text.truncate(offset);
                discarded
            }
            Some(Resume::Splice { .. }) | None => 0,
        };
        let join = self.text.len();
        self.text.push_str(turn);

        let partial = parse_partial(&self.text, self.coordinator.config())?;
        let duplicate = partial
            .stream
            .actions
            .iter()
            .position(|parsed| parsed.offset >= join)
            .filter(|idx| {
                idx.checked_sub(1).is_some_and(|prev| {
                    partial.stream.actions[prev].action == partial.stream.actions[*idx].action
                })
            });
        let applied = self.applied.unwrap_or(partial.stream.len());
        let assessment = self
            .coordinator
            .assess_partial(partial, self.text.len(), applied);
        self.assessment = Some(assessment.clone());

        Ok(Stitch {
            discarded,
            duplicate,
            assessment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, ModificationForm};

    const HEAD: &str = "Here is the change.\n<boltArtifact id=\"demo\" title=\"Demo\">\n";
    const WRITE: &str = "<boltAction type=\"file\" filePath=\"a.txt\">hello</boltAction>\n";
    const DIFF: &str = "<boltAction type=\"modification\" filePath=\"a.txt\"><diff>\n@@ -1 +1 @@\n-hello\n+hello world\n</diff></boltAction>\n";
    const TAIL: &str = "</boltArtifact>\n";

    fn coordinator() -> Coordinator {
        Coordinator::new(ProtocolConfig::default())
    }

    fn marker(assessment: Assessment) -> ContinuationMarker {
        match assessment {
            Assessment::Incomplete(marker) => marker,
            Assessment::Complete(stream) => panic!("expected incomplete, got {stream:?}"),
        }
    }

    #[test]
    fn closed_artifact_is_complete() {
        let text = format!("{HEAD}{WRITE}{DIFF}{TAIL}");
        let assessment = coordinator().assess(&text, 0).expect("assess");
        match assessment {
            Assessment::Complete(stream) => assert_eq!(stream.len(), 2),
            Assessment::Incomplete(marker) => panic!("unexpected marker {marker:?}"),
        }
    }

    #[test]
    fn truncated_diff_restarts_before_the_action() {
        let full = format!("{HEAD}{WRITE}{DIFF}{TAIL}");
        let cut = HEAD.len() + WRITE.len() + 70;
        let text = &full[..cut];
        let marker = marker(coordinator().assess(text, 1).expect("assess"));
        assert_eq!(marker.committed, 1);
        assert_eq!(
            marker.resume,
            Resume::Restart {
                offset: HEAD.len() + WRITE.len() - 1
            }
        );
        let flight = marker.in_flight.expect("in flight");
        assert_eq!(flight.kind, InFlightKind::DiffModification);
        assert_eq!(flight.path.as_deref(), Some("a.txt"));
        assert!(marker.artifact_open);
    }

    #[test]
    fn resuming_a_truncated_diff_re_emits_it_in_full() {
        let full = format!("{HEAD}{WRITE}{DIFF}{TAIL}");
        let cut = HEAD.len() + WRITE.len() + 70;
        let mut transcript = Transcript::new(ProtocolConfig::default());
        let first = transcript.accept(&full[..cut]).expect("first turn");
        assert!(!first.assessment.is_complete());

        let second = transcript
            .accept(&format!("\n{DIFF}{TAIL}"))
            .expect("second turn");
        assert_eq!(second.discarded, cut - (HEAD.len() + WRITE.len() - 1));
        assert_eq!(second.duplicate, None);
        let stream = transcript.complete_actions().expect("complete");
        assert_eq!(stream.len(), 2);
        assert_eq!(
            stream.actions[1].action,
            Action::Modification {
                path: "a.txt".to_string(),
                form: ModificationForm::Diff,
                payload: "@@ -1 +1 @@\n-hello\n+hello world\n".to_string(),
            }
        );
        assert!(transcript.pending().is_none());
    }

    #[test]
    fn truncated_file_write_is_spliced() {
        let text = format!("{HEAD}{WRITE}<boltAction type=\"file\" filePath=\"b.txt\">line one\nline t");
        let marker = marker(coordinator().assess(&text, 1).expect("assess"));
        assert_eq!(marker.resume, Resume::Splice { offset: text.len() });
        assert_eq!(
            marker.in_flight.map(|flight| flight.kind),
            Some(InFlightKind::FileWrite)
        );

        let mut transcript = Transcript::new(ProtocolConfig::default());
        transcript.accept(&text).expect("first turn");
        let stitch = transcript
            .accept(&format!("wo\n</boltAction>\n{TAIL}"))
            .expect("second turn");
        assert_eq!(stitch.discarded, 0);
        let stream = transcript.complete_actions().expect("complete");
        assert_eq!(
            stream.actions[1].action,
            Action::FileWrite {
                path: "b.txt".to_string(),
                content: "line one\nline two\n".to_string(),
            }
        );
    }

    #[test]
    fn wrapped_full_file_splice_closes_every_open_tag() {
        let text = format!(
            "{HEAD}<boltAction type=\"modification\" filePath=\"a.txt\"><file>line one\nline t"
        );
        let marker = marker(coordinator().assess(&text, 0).expect("assess"));
        assert_eq!(marker.resume, Resume::Splice { offset: text.len() });
        let flight = marker.in_flight.as_ref().expect("in flight");
        assert_eq!(flight.kind, InFlightKind::FullFileModification);
        assert!(!flight.section_item);
        assert_eq!(
            marker.closing_sequence(),
            "</file></boltAction></boltArtifact>"
        );

        let mut transcript = Transcript::new(ProtocolConfig::default());
        transcript.accept(&text).expect("first turn");
        let stitch = transcript
            .accept(&format!("wo\n{}\n", marker.closing_sequence()))
            .expect("second turn");
        assert!(stitch.assessment.is_complete());
        assert_eq!(
            transcript.complete_actions().expect("complete").actions[0].action,
            Action::Modification {
                path: "a.txt".to_string(),
                form: ModificationForm::FullFile,
                payload: "line one\nline two\n".to_string(),
            }
        );
    }

    #[test]
    fn section_item_splice_closes_the_section() {
        let text = "<bolt_file_modifications>\n<file path=\"a.txt\">new bo";
        let marker = marker_for(text, 0);
        assert!(marker.resume.is_splice());
        assert!(marker.in_flight.as_ref().is_some_and(|flight| flight.section_item));
        assert!(!marker.artifact_open);
        assert_eq!(
            marker.closing_sequence(),
            "</file></bolt_file_modifications>"
        );

        let mut transcript = Transcript::new(ProtocolConfig::default());
        transcript.accept(text).expect("first turn");
        let stitch = transcript
            .accept(&format!("dy{}", marker.closing_sequence()))
            .expect("second turn");
        assert!(stitch.assessment.is_complete());
    }

    #[test]
    fn restart_has_no_closing_tags() {
        let text = format!("{HEAD}<boltAction type=\"shell\">npm ins");
        assert!(marker_for(&text, 0).closing.is_empty());
    }

    #[test]
    fn lagging_host_restarts_at_first_unapplied_action() {
        let text = format!("{HEAD}{WRITE}{WRITE}<boltAction type=\"file\" filePath=\"c\">x");
        let marker = marker(coordinator().assess(&text, 1).expect("assess"));
        assert_eq!(marker.parsed, 2);
        assert_eq!(marker.committed, 1);
        assert_eq!(
            marker.resume,
            Resume::Restart {
                offset: HEAD.len() + WRITE.len() - 1
            }
        );

        let marker = marker_for(&text, 0);
        assert_eq!(marker.resume, Resume::Restart { offset: HEAD.len() - 1 });
    }

    fn marker_for(text: &str, applied: usize) -> ContinuationMarker {
        marker(coordinator().assess(text, applied).expect("assess"))
    }

    #[test]
    fn cut_off_tags_and_pending_markers_restart() {
        let text = format!("{HEAD}{WRITE}<boltAc");
        let marker = marker_for(&text, 1);
        assert_eq!(
            marker.in_flight.map(|flight| flight.kind),
            Some(InFlightKind::Unknown)
        );
        assert!(!marker.resume.is_splice());

        let text = format!("{HEAD}<boltAction type=\"modification\" filePath=\"a.txt\">\n  ");
        let marker = marker_for(&text, 0);
        assert_eq!(
            marker.in_flight.map(|flight| flight.kind),
            Some(InFlightKind::PendingModification)
        );
        assert_eq!(marker.resume, Resume::Restart { offset: HEAD.len() - 1 });

        let text = format!("{HEAD}<boltAction type=\"shell\">npm ins");
        let marker = marker_for(&text, 0);
        assert_eq!(
            marker.in_flight.map(|flight| flight.kind),
            Some(InFlightKind::Shell)
        );
        assert!(!marker.resume.is_splice());
    }

    #[test]
    fn open_artifact_without_open_block_restarts_after_last_action() {
        let text = format!("{HEAD}{WRITE}Now run it");
        let marker = marker_for(&text, 1);
        assert!(marker.in_flight.is_none());
        assert_eq!(
            marker.resume,
            Resume::Restart {
                offset: HEAD.len() + WRITE.len() - 1
            }
        );
    }

    #[test]
    fn repeated_action_at_the_seam_is_reported() {
        let mut transcript = Transcript::new(ProtocolConfig::default());
        transcript
            .accept(&format!("{HEAD}{WRITE}<boltAction type=\"shell\">npm"))
            .expect("first turn");
        let stitch = transcript
            .accept(&format!("{WRITE}{TAIL}"))
            .expect("second turn");
        assert_eq!(stitch.duplicate, Some(1));
        assert!(stitch.assessment.is_complete());
    }
}
