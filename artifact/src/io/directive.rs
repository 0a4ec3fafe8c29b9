//! Resumption directive sent to the generator after a truncated response.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::continuation::ContinuationMarker;
use crate::core::grammar::Grammar;

const CONTINUE_TEMPLATE: &str = include_str!("prompts/continue.md");

/// Template engine wrapper around minijinja.
pub struct DirectiveRenderer {
    env: Environment<'static>,
    grammar: Grammar,
}

impl DirectiveRenderer {
    pub fn new(grammar: Grammar) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("continue", CONTINUE_TEMPLATE)
            .context("load continue template")?;
        Ok(Self { env, grammar })
    }

    pub fn render(&self, marker: &ContinuationMarker) -> Result<String> {
        let template = self.env.get_template("continue")?;
        let in_flight = marker.in_flight.as_ref();
        let mut rendered = template.render(context! {
            committed => marker.committed,
            splice => marker.resume.is_splice(),
            in_flight_kind => in_flight.map(|flight| flight.kind.as_str()),
            path => in_flight.and_then(|flight| flight.path.as_deref()),
            artifact_open => marker.artifact_open,
            artifact_tag => &self.grammar.artifact_tag,
            closing => marker.closing_sequence(),
        })?;
        rendered.push('\n');
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::continuation::{InFlight, InFlightKind, Resume};

    fn renderer() -> DirectiveRenderer {
        DirectiveRenderer::new(Grammar::default()).expect("renderer")
    }

    #[test]
    fn restart_directive_names_the_discarded_block() {
        let marker = ContinuationMarker {
            committed: 2,
            parsed: 2,
            resume: Resume::Restart { offset: 120 },
            in_flight: Some(InFlight {
                offset: 121,
                kind: InFlightKind::DiffModification,
                path: Some("src/app.js".to_string()),
                section_item: false,
            }),
            artifact_open: true,
            closing: Vec::new(),
        };
        let text = renderer().render(&marker).expect("render");
        assert!(text.starts_with("Continue your prior response."));
        assert!(text.contains("Actions 1 to 2 have already been applied."));
        assert!(text.contains("The diff modification for `src/app.js` was cut off"));
        assert!(text.contains("Continue with action 3."));
        assert!(text.contains("do not open it again"));
    }

    #[test]
    fn splice_directive_asks_to_continue_in_place() {
        let marker = ContinuationMarker {
            committed: 0,
            parsed: 0,
            resume: Resume::Splice { offset: 40 },
            in_flight: Some(InFlight {
                offset: 10,
                kind: InFlightKind::FileWrite,
                path: Some("index.html".to_string()),
                section_item: false,
            }),
            artifact_open: false,
            closing: vec!["boltAction".to_string()],
        };
        let text = renderer().render(&marker).expect("render");
        assert!(!text.contains("already been applied"));
        assert!(text.contains("stopped inside the file write for `index.html`"));
        assert!(text.contains("close it with `</boltAction>`"));
        assert!(!text.contains("Continue with action"));
    }

    #[test]
    fn splice_directive_lists_every_closing_tag() {
        let marker = ContinuationMarker {
            committed: 0,
            parsed: 0,
            resume: Resume::Splice { offset: 90 },
            in_flight: Some(InFlight {
                offset: 50,
                kind: InFlightKind::FullFileModification,
                path: Some("a.txt".to_string()),
                section_item: false,
            }),
            artifact_open: true,
            closing: vec![
                "file".to_string(),
                "boltAction".to_string(),
                "boltArtifact".to_string(),
            ],
        };
        let text = renderer().render(&marker).expect("render");
        assert!(text.contains("then close it with `</file></boltAction></boltArtifact>`."));
    }
}
