//! Common-indent stripping for block bodies.

/// Remove the longest leading-whitespace run shared by every non-blank line.
///
/// Whitespace-only lines are emptied (their terminator is kept) and do not take
/// part in computing the shared prefix. Line terminators are preserved, so
/// relative indentation and the trailing newline survive unchanged.
pub fn strip_common_indent(text: &str) -> String {
    let prefix_len = common_indent(text).len();
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let (body, ending) = split_ending(line);
        if !body.trim().is_empty() {
            // Every non-blank line starts with the shared ASCII prefix.
            out.push_str(&body[prefix_len..]);
        }
        out.push_str(ending);
    }
    out
}

/// Leading whitespace (spaces and tabs) shared by all non-blank lines.
pub fn common_indent(text: &str) -> &str {
    let mut prefix: Option<&str> = None;
    for line in text.split_inclusive('\n') {
        let (body, _) = split_ending(line);
        if body.trim().is_empty() {
            continue;
        }
        let indent_len = body.len() - body.trim_start_matches([' ', '\t']).len();
        let indent = &body[..indent_len];
        let shared = match prefix {
            None => indent,
            Some(current) => shared_prefix(current, indent),
        };
        if shared.is_empty() {
            return "";
        }
        prefix = Some(shared);
    }
    prefix.unwrap_or("")
}

fn shared_prefix<'a>(left: &'a str, right: &str) -> &'a str {
    let len = left
        .bytes()
        .zip(right.bytes())
        .take_while(|(l, r)| l == r)
        .count();
    &left[..len]
}

fn split_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_shared_indent_and_keeps_relative_indent() {
        let text = "    fn main() {\n        run();\n    }\n";
        assert_eq!(strip_common_indent(text), "fn main() {\n    run();\n}\n");
    }

    #[test]
    fn blank_lines_do_not_limit_the_prefix() {
        let text = "    a\n\n  \n    b";
        assert_eq!(strip_common_indent(text), "a\n\n\nb");
    }

    #[test]
    fn mixed_tabs_and_spaces_share_only_the_identical_prefix() {
        let text = "\t  a\n\t b\n";
        assert_eq!(common_indent(text), "\t ");
        assert_eq!(strip_common_indent(text), " a\nb\n");
    }

    #[test]
    fn unindented_text_is_unchanged() {
        let text = "a\n  b\r\nc";
        assert_eq!(strip_common_indent(text), text);
    }

    #[test]
    fn crlf_terminators_survive() {
        let text = "  a\r\n  b\r\n";
        assert_eq!(strip_common_indent(text), "a\r\nb\r\n");
    }

    #[test]
    fn empty_text_stays_empty() {
        assert_eq!(strip_common_indent(""), "");
        assert_eq!(common_indent("   \n"), "");
    }
}
