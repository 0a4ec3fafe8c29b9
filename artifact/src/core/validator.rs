//! Sandbox constraint checks over parsed actions.
//!
//! Rules are stateless predicates, so each action is judged on its own and the
//! verdicts do not depend on stream order. Shell commands are split into
//! segments first, so a forbidden command chained behind an allowed one is
//! still caught.

use regex::Regex;

use crate::core::error::{ManifestError, ProtocolError};
use crate::core::manifest::{CapabilityManifest, Policy, ResolvedRule};
use crate::core::types::{Action, ActionStream, ConstraintKind, ConstraintWarning};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Matched a rule with the `warn` policy.
    Flagged { kind: ConstraintKind, reason: String },
    Rejected { kind: ConstraintKind, reason: String },
}

pub trait ConstraintRule: Send + Sync {
    fn kind(&self) -> ConstraintKind;
    fn check(&self, action: &Action) -> Verdict;
}

/// Regex-driven rule compiled from a manifest entry.
#[derive(Debug)]
pub struct PatternRule {
    kind: ConstraintKind,
    policy: Policy,
    commands: Vec<Regex>,
    paths: Vec<Regex>,
    contents: Vec<Regex>,
}

impl PatternRule {
    pub fn compile(rule: &ResolvedRule) -> Result<Self, ManifestError> {
        let compile_all = |list: &[String]| -> Result<Vec<Regex>, ManifestError> {
            list.iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| ManifestError::InvalidPattern {
                        rule: rule.kind,
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect()
        };
        Ok(Self {
            kind: rule.kind,
            policy: rule.policy,
            commands: compile_all(&rule.command_patterns)?,
            paths: compile_all(&rule.path_patterns)?,
            contents: compile_all(&rule.content_patterns)?,
        })
    }

    fn first_match(&self, action: &Action) -> Option<String> {
        match action {
            Action::Shell { command } => command_segments(command).into_iter().find_map(|segment| {
                self.commands
                    .iter()
                    .find(|re| re.is_match(&segment))
                    .map(|re| format!("`{segment}` matches `{}`", re.as_str()))
            }),
            Action::FileWrite { path, content } => {
                if let Some(re) = self.paths.iter().find(|re| re.is_match(path)) {
                    return Some(format!("path {path} matches `{}`", re.as_str()));
                }
                self.contents
                    .iter()
                    .find(|re| re.is_match(content))
                    .map(|re| format!("content of {path} matches `{}`", re.as_str()))
            }
            // Modifications record edits the user already made.
            Action::Modification { .. } => None,
        }
    }
}

impl ConstraintRule for PatternRule {
    fn kind(&self) -> ConstraintKind {
        self.kind
    }

    fn check(&self, action: &Action) -> Verdict {
        let Some(detail) = self.first_match(action) else {
            return Verdict::Allowed;
        };
        let reason = format!("{}: {detail}", self.kind.hint());
        match self.policy {
            Policy::Reject => Verdict::Rejected {
                kind: self.kind,
                reason,
            },
            Policy::Warn => Verdict::Flagged {
                kind: self.kind,
                reason,
            },
        }
    }
}

pub struct Validator {
    rules: Vec<Box<dyn ConstraintRule>>,
}

impl Validator {
    pub fn from_manifest(manifest: &CapabilityManifest) -> Result<Self, ManifestError> {
        let rules = manifest
            .rules()
            .iter()
            .map(|rule| PatternRule::compile(rule).map(|rule| Box::new(rule) as Box<dyn ConstraintRule>))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn with_rules(rules: Vec<Box<dyn ConstraintRule>>) -> Self {
        Self { rules }
    }

    /// A validator that allows everything.
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn kinds(&self) -> Vec<ConstraintKind> {
        self.rules.iter().map(|rule| rule.kind()).collect()
    }

    /// Any rejection wins over flags; the first flag is reported otherwise.
    pub fn check(&self, action: &Action) -> Verdict {
        let mut flagged = None;
        for rule in &self.rules {
            match rule.check(action) {
                Verdict::Allowed => {}
                rejected @ Verdict::Rejected { .. } => return rejected,
                flag @ Verdict::Flagged { .. } => {
                    flagged.get_or_insert(flag);
                }
            }
        }
        flagged.unwrap_or(Verdict::Allowed)
    }

    /// Check every action; the first rejection aborts with its stream index.
    pub fn validate_stream(
        &self,
        stream: &ActionStream,
    ) -> Result<Vec<ConstraintWarning>, ProtocolError> {
        let mut warnings = Vec::new();
        for (index, action) in stream.actions().enumerate() {
            match self.check(action) {
                Verdict::Allowed => {}
                Verdict::Flagged { kind, reason } => {
                    warnings.push(ConstraintWarning {
                        index,
                        kind,
                        reason,
                    });
                }
                Verdict::Rejected { kind, reason } => {
                    return Err(ProtocolError::ConstraintRejected {
                        index,
                        kind,
                        reason,
                    });
                }
            }
        }
        Ok(warnings)
    }
}

/// Split a shell command line into simple commands.
///
/// Separators are `&&`, `||`, `;`, `|`, `&` and newlines outside quotes and
/// substitutions; `2>&1`-style redirections are not separators. Each segment
/// is reduced to the command itself: leading `VAR=value` assignments,
/// wrappers such as `sudo -H`/`env`, subshell parentheses and the directory
/// part of the program path are removed. Scripts passed to `sh -c`/`bash -c`
/// or `eval`, and `$(...)`/backtick substitutions, are split the same way and
/// their commands follow the segment that carries them.
pub fn command_segments(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    collect_segments(command, 0, &mut out);
    out
}

const MAX_NESTING: usize = 8;

fn collect_segments(command: &str, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_NESTING {
        return;
    }
    for raw in split_commands(command) {
        let head = command_head(&raw);
        if !head.is_empty() {
            let script = inline_script(&head);
            out.push(head);
            if let Some(script) = script {
                collect_segments(&script, depth + 1, out);
            }
        }
        for inner in substitutions(&raw) {
            collect_segments(&inner, depth + 1, out);
        }
    }
}

fn split_commands(command: &str) -> Vec<String> {
    let mut raw: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    // Open `$(` substitutions and whether a backtick one is open.
    let mut nested = 0usize;
    let mut backtick = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            current.push(c);
            if c == open {
                quote = None;
            } else if c == '\\'
                && open == '"'
                && let Some(next) = chars.next()
            {
                current.push(next);
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '`' => {
                backtick = !backtick;
                current.push(c);
            }
            '$' if chars.peek() == Some(&'(') => {
                nested += 1;
                current.push(c);
                if let Some(paren) = chars.next() {
                    current.push(paren);
                }
            }
            '(' if nested > 0 => {
                nested += 1;
                current.push(c);
            }
            ')' if nested > 0 => {
                nested -= 1;
                current.push(c);
            }
            _ if nested > 0 || backtick => current.push(c),
            ';' | '\n' => raw.push(std::mem::take(&mut current)),
            '&' | '|' => {
                let redirect = current.ends_with(['>', '<']) || chars.peek() == Some(&'>');
                if redirect {
                    current.push(c);
                } else {
                    if chars.peek() == Some(&c) {
                        chars.next();
                    }
                    raw.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    raw.push(current);
    raw
}

/// Bodies of the `$(...)` and backtick substitutions in `segment`, outermost
/// only. Single quotes suppress substitution; double quotes do not.
fn substitutions(segment: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut single = false;
    let mut double = false;
    let mut chars = segment.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\'' if !double => single = !single,
            _ if single => {}
            '"' => double = !double,
            '\\' => {
                chars.next();
            }
            '$' if chars.peek().is_some_and(|(_, next)| *next == '(') => {
                chars.next();
                let body_start = idx + 2;
                let mut depth = 1usize;
                let mut body_end = segment.len();
                for (at, inner) in chars.by_ref() {
                    match inner {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                body_end = at;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                found.push(segment[body_start..body_end].to_string());
            }
            '`' => {
                let body_start = idx + 1;
                let body_end = chars
                    .by_ref()
                    .find(|(_, inner)| *inner == '`')
                    .map_or(segment.len(), |(at, _)| at);
                found.push(segment[body_start..body_end].to_string());
            }
            _ => {}
        }
    }
    found
}

const WRAPPERS: &[&str] = &[
    "sudo", "doas", "env", "exec", "command", "nohup", "time", "nice", "timeout",
];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Wrapper options that consume the following word.
fn option_takes_value(wrapper: &str, option: &str) -> bool {
    match wrapper {
        "sudo" => matches!(
            option,
            "-u" | "-g" | "-C" | "-D" | "-h" | "-p" | "-r" | "-t" | "-T" | "-U"
        ),
        "doas" => matches!(option, "-u" | "-C"),
        "env" => matches!(option, "-u" | "-C" | "--unset" | "--chdir"),
        "exec" => option == "-a",
        "time" => matches!(option, "-f" | "-o"),
        "nice" => option == "-n",
        "timeout" => matches!(option, "-s" | "-k" | "--signal" | "--kill-after"),
        _ => false,
    }
}

fn command_head(segment: &str) -> String {
    let mut rest = segment
        .trim_start_matches(['(', '{', ' ', '\t'])
        .trim_end_matches([')', '}', ' ', '\t']);
    let mut wrapper: Option<&str> = None;
    // `timeout` takes its duration as a plain word.
    let mut operand_pending = false;
    loop {
        let (word, after) = split_word(rest);
        if word.is_empty() {
            return String::new();
        }
        rest = after.trim_start();
        if let Some(name) = wrapper
            && word.starts_with('-')
        {
            // `command -v git` looks a program up without running it.
            if name == "command" && matches!(word, "-v" | "-V") {
                return String::new();
            }
            if option_takes_value(name, word) {
                rest = split_word(rest).1.trim_start();
            }
            continue;
        }
        if operand_pending {
            operand_pending = false;
            continue;
        }
        if is_assignment(word) {
            continue;
        }
        let program = word.rsplit('/').next().unwrap_or(word);
        if WRAPPERS.contains(&program) {
            wrapper = Some(program);
            operand_pending = program == "timeout";
            continue;
        }
        return format!("{program}{after}");
    }
}

/// Script run by `sh -c '...'` or `eval ...`, with its quoting removed.
fn inline_script(head: &str) -> Option<String> {
    let (program, mut rest) = split_word(head);
    if program == "eval" {
        let mut words = Vec::new();
        loop {
            let (word, after) = split_word(rest.trim_start());
            if word.is_empty() {
                break;
            }
            words.push(unquote(word));
            rest = after;
        }
        return Some(words.join(" "));
    }
    if !SHELLS.contains(&program) {
        return None;
    }
    loop {
        let (word, after) = split_word(rest.trim_start());
        if !word.starts_with('-') || word == "--" {
            return None;
        }
        rest = after;
        let short_flags = !word.starts_with("--");
        if short_flags && word.contains('c') {
            let (script, _) = split_word(rest.trim_start());
            return (!script.is_empty()).then(|| unquote(script));
        }
    }
}

/// Strip shell quoting from one word.
fn unquote(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut quote: Option<char> = None;
    let mut chars = word.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (Some('"') | None, '\\') => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// First word of `text` (quotes keep spaces together) and the remainder.
fn split_word(text: &str) -> (&str, &str) {
    let mut quote: Option<char> = None;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => return (&text[..idx], &text[idx..]),
            None => {}
        }
    }
    (text, "")
}

fn is_assignment(word: &str) -> bool {
    word.find('=').is_some_and(|eq| {
        eq > 0
            && word[..eq]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ParsedAction;

    fn validator() -> Validator {
        Validator::from_manifest(&CapabilityManifest::webcontainer()).expect("default manifest")
    }

    fn shell(command: &str) -> Action {
        Action::Shell {
            command: command.to_string(),
        }
    }

    fn write(path: &str, content: &str) -> Action {
        Action::FileWrite {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn rejected_kind(verdict: Verdict) -> Option<ConstraintKind> {
        match verdict {
            Verdict::Rejected { kind, .. } => Some(kind),
            _ => None,
        }
    }

    #[test]
    fn pip_install_is_rejected_as_python_stdlib_only() {
        let verdict = validator().check(&shell("pip install numpy"));
        assert_eq!(
            rejected_kind(verdict),
            Some(ConstraintKind::PythonStdlibOnly)
        );
    }

    #[test]
    fn chained_commands_are_checked_per_segment() {
        let validator = validator();
        assert_eq!(
            rejected_kind(validator.check(&shell("npm install && python3 -m pip install x"))),
            Some(ConstraintKind::PythonStdlibOnly)
        );
        assert_eq!(
            rejected_kind(validator.check(&shell("FOO=1 sudo /usr/bin/git init"))),
            Some(ConstraintKind::NoVcs)
        );
        assert_eq!(
            rejected_kind(validator.check(&shell("(cd native && make)"))),
            Some(ConstraintKind::NoNativeBinaries)
        );
        assert_eq!(
            rejected_kind(validator.check(&shell("g++ -o app main.cpp"))),
            Some(ConstraintKind::NoNativeBinaries)
        );
    }

    #[test]
    fn wrapped_installers_are_rejected() {
        let validator = validator();
        for (command, kind) in [
            ("sh -c \"pip install numpy\"", ConstraintKind::PythonStdlibOnly),
            ("bash -lc 'git init'", ConstraintKind::NoVcs),
            ("/bin/bash --login -c 'cd app && make'", ConstraintKind::NoNativeBinaries),
            ("eval \"git commit -m wip\"", ConstraintKind::NoVcs),
            ("sudo -H pip install numpy", ConstraintKind::PythonStdlibOnly),
            ("sudo -u root -E apt-get install gcc", ConstraintKind::NoNativeBinaries),
            ("timeout 30 git clone repo", ConstraintKind::NoVcs),
            ("pip -q install numpy", ConstraintKind::PythonStdlibOnly),
            ("pip --quiet install numpy", ConstraintKind::PythonStdlibOnly),
            ("python3 -u -m pip --user install x", ConstraintKind::PythonStdlibOnly),
            ("echo $(pip install numpy)", ConstraintKind::PythonStdlibOnly),
            ("echo \"$(git rev-parse HEAD)\"", ConstraintKind::NoVcs),
            ("VERSION=`git describe` npm run build", ConstraintKind::NoVcs),
        ] {
            assert_eq!(
                rejected_kind(validator.check(&shell(command))),
                Some(kind),
                "{command}"
            );
        }
    }

    #[test]
    fn quoted_text_is_not_a_command() {
        let validator = validator();
        for command in [
            "echo 'pip install numpy'",
            "echo '$(git init)'",
            "bash ./scripts/setup.sh",
            "command -v git || echo missing",
            "pipx --version",
        ] {
            assert_eq!(validator.check(&shell(command)), Verdict::Allowed, "{command}");
        }
    }

    #[test]
    fn inline_scripts_and_substitutions_become_segments() {
        assert_eq!(
            command_segments("bash -c 'npm i && pip install x'"),
            vec!["bash -c 'npm i && pip install x'", "npm i", "pip install x"]
        );
        assert_eq!(
            command_segments("echo $(a && b) done; c"),
            vec!["echo $(a && b) done", "a", "b", "c"]
        );
        assert_eq!(command_segments("sudo -u app -H env X=1 node s.js"), vec!["node s.js"]);
    }

    #[test]
    fn ordinary_commands_are_allowed() {
        let validator = validator();
        for command in [
            "npm install && npm run dev",
            "node index.js 2>&1 | tee out.log",
            "echo \"git push && pip install x\"",
            "npx degit user/repo app",
            "python3 main.py",
        ] {
            assert_eq!(validator.check(&shell(command)), Verdict::Allowed, "{command}");
        }
    }

    #[test]
    fn segments_split_on_operators_outside_quotes() {
        assert_eq!(
            command_segments("a && b || c; d | e\nf & g"),
            vec!["a", "b", "c", "d", "e", "f", "g"]
        );
        assert_eq!(
            command_segments("cmd > out 2>&1 && echo 'x; y'"),
            vec!["cmd > out 2>&1", "echo 'x; y'"]
        );
        assert_eq!(
            command_segments("LANG=C TZ=\"a b\" env sudo ./bin/tool --flag"),
            vec!["tool --flag"]
        );
    }

    #[test]
    fn database_server_files_are_flagged() {
        let validator = validator();
        match validator.check(&write("docker-compose.yml", "services: {}\n")) {
            Verdict::Flagged { kind, reason } => {
                assert_eq!(kind, ConstraintKind::EmbeddedDbOnly);
                assert!(reason.contains("docker-compose.yml"));
            }
            other => panic!("expected flag, got {other:?}"),
        }
        assert!(matches!(
            validator.check(&write(".env", "DATABASE_URL=postgres://db:5432/app\n")),
            Verdict::Flagged { .. }
        ));
        assert_eq!(
            validator.check(&write("db.js", "new Database('app.sqlite')\n")),
            Verdict::Allowed
        );
    }

    #[test]
    fn modifications_are_not_checked() {
        let action = Action::Modification {
            path: "docker-compose.yml".to_string(),
            form: crate::core::types::ModificationForm::FullFile,
            payload: "services: {}".to_string(),
        };
        assert_eq!(validator().check(&action), Verdict::Allowed);
    }

    #[test]
    fn disabled_rules_and_reject_policy_follow_the_manifest() {
        let manifest: CapabilityManifest = toml::from_str(
            r#"
[no_vcs]
enabled = false

[embedded_db_only]
policy = "reject"
"#,
        )
        .expect("manifest");
        let validator = Validator::from_manifest(&manifest).expect("compile");
        assert_eq!(validator.check(&shell("git status")), Verdict::Allowed);
        assert_eq!(
            rejected_kind(validator.check(&write("compose.yaml", ""))),
            Some(ConstraintKind::EmbeddedDbOnly)
        );
    }

    #[test]
    fn invalid_pattern_is_a_manifest_error() {
        let manifest: CapabilityManifest = toml::from_str(
            r#"
[no_vcs]
command_patterns = ["^(git"]
"#,
        )
        .expect("manifest");
        let err = Validator::from_manifest(&manifest)
            .err()
            .expect("invalid pattern");
        assert!(err.to_string().starts_with("no_vcs: invalid pattern `^(git`"));
    }

    #[test]
    fn validate_stream_reports_first_rejection_index() {
        let actions = [
            write("docker-compose.yml", "services: {}\n"),
            shell("npm install"),
            shell("pip install numpy"),
            shell("git init"),
        ];
        let stream = ActionStream {
            actions: actions
                .into_iter()
                .map(|action| ParsedAction {
                    offset: 0,
                    end: 0,
                    action,
                })
                .collect(),
            ..ActionStream::default()
        };
        let err = validator().validate_stream(&stream).expect_err("rejected");
        assert!(matches!(
            err,
            ProtocolError::ConstraintRejected {
                index: 2,
                kind: ConstraintKind::PythonStdlibOnly,
                ..
            }
        ));

        let allowed = ActionStream {
            actions: stream.actions[..2].to_vec(),
            ..ActionStream::default()
        };
        let warnings = validator().validate_stream(&allowed).expect("warnings only");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].index, 0);
    }

    struct NoLargeFiles;

    impl ConstraintRule for NoLargeFiles {
        fn kind(&self) -> ConstraintKind {
            ConstraintKind::EmbeddedDbOnly
        }

        fn check(&self, action: &Action) -> Verdict {
            match action {
                Action::FileWrite { path, .. } if path.ends_with(".sqlite") => Verdict::Rejected {
                    kind: self.kind(),
                    reason: format!("{path} must be created at runtime"),
                },
                _ => Verdict::Allowed,
            }
        }
    }

    #[test]
    fn custom_rules_plug_into_the_validator() {
        let validator = Validator::with_rules(vec![Box::new(NoLargeFiles)]);
        assert_eq!(validator.kinds(), vec![ConstraintKind::EmbeddedDbOnly]);
        assert_eq!(validator.check(&shell("git init")), Verdict::Allowed);
        assert_eq!(
            rejected_kind(validator.check(&write("data/app.sqlite", ""))),
            Some(ConstraintKind::EmbeddedDbOnly)
        );
        assert_eq!(Validator::permissive().check(&shell("git init")), Verdict::Allowed);
    }
}
