//! Static analysis for script payloads.
//!
//! Script-executing actions carry their source code through here before the
//! gate lets them anywhere near an interpreter. The payload is parsed into
//! a small statement/expression tree and checked against the capability
//! denylists. A payload that cannot be parsed is rejected, never treated
//! as safe.

/// Module roots whose import enables process spawning, file deletion, raw
/// sockets, or native code loading.
const DENYLISTED_MODULES: &[&str] = &["os", "subprocess", "shutil", "socket", "ctypes", "importlib"];

/// Builtins that evaluate code dynamically.
const DANGEROUS_BUILTINS: &[&str] = &["eval", "exec", "compile", "__import__"];

/// Fully-qualified call paths that spawn processes or delete trees.
const DANGEROUS_CALLS: &[&str] = &["os.system", "os.popen", "shutil.rmtree"];

/// Names that, imported bare, smuggle in the capabilities above.
const DANGEROUS_IMPORT_NAMES: &[&str] = &["system", "popen", "call", "run", "Popen", "rmtree"];

/// Attribute probes used to reach `__import__` through the object graph.
const DANGEROUS_ATTRIBUTES: &[&str] = &["__import__", "__class__", "__bases__", "__subclasses__"];

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str,
    Num,
    Punct(char),
    Newline,
}

#[derive(Debug)]
struct ParseError(String);

/// Tokenize the payload. Strings and comments are consumed here so that a
/// quoted "import os" never trips the analyzer, while an unterminated
/// string or unbalanced bracket is a hard parse error.
#[allow(clippy::too_many_lines)]
fn tokenize(source: &str) -> Result<Vec<Tok>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut depth_stack: Vec<char> = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let triple = i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote;
                i += if triple { 3 } else { 1 };
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if triple {
                        if chars[i] == quote
                            && i + 2 < chars.len()
                            && chars[i + 1] == quote
                            && chars[i + 2] == quote
                        {
                            i += 3;
                            closed = true;
                            break;
                        }
                    } else if chars[i] == quote {
                        i += 1;
                        closed = true;
                        break;
                    } else if chars[i] == '\n' {
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    return Err(ParseError("unterminated string literal".into()));
                }
                tokens.push(Tok::Str);
            }
            '\\' if i + 1 < chars.len() && chars[i + 1] == '\n' => {
                // Explicit line continuation
                i += 2;
            }
            '\n' => {
                if depth_stack.is_empty() {
                    tokens.push(Tok::Newline);
                }
                i += 1;
            }
            '(' | '[' | '{' => {
                depth_stack.push(c);
                tokens.push(Tok::Punct(c));
                i += 1;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if depth_stack.pop() != Some(expected) {
                    return Err(ParseError(format!("unbalanced bracket '{c}'")));
                }
                tokens.push(Tok::Punct(c));
                i += 1;
            }
            c if c.is_whitespace() => {
                i += 1;
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Tok::Num);
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                tokens.push(Tok::Punct(other));
                i += 1;
            }
        }
    }

    if !depth_stack.is_empty() {
        return Err(ParseError("unclosed bracket at end of input".into()));
    }

    Ok(tokens)
}

/// Split a token stream into logical statements (newlines and `;` at the
/// top level).
fn split_statements(tokens: &[Tok]) -> Vec<&[Tok]> {
    let mut statements = Vec::new();
    let mut start = 0;
    for (idx, tok) in tokens.iter().enumerate() {
        if matches!(tok, Tok::Newline | Tok::Punct(';')) {
            if idx > start {
                statements.push(&tokens[start..idx]);
            }
            start = idx + 1;
        }
    }
    if start < tokens.len() {
        statements.push(&tokens[start..]);
    }
    statements
}

fn ident_at(tokens: &[Tok], idx: usize) -> Option<&str> {
    match tokens.get(idx) {
        Some(Tok::Ident(name)) => Some(name.as_str()),
        _ => None,
    }
}

/// Collect the root names of a comma-separated dotted import list.
fn import_roots(tokens: &[Tok]) -> Vec<String> {
    let mut roots = Vec::new();
    let mut expect_root = true;
    for tok in tokens {
        match tok {
            Tok::Ident(name) if expect_root && name != "as" => {
                roots.push(name.clone());
                expect_root = false;
            }
            Tok::Punct(',') => expect_root = true,
            _ => {}
        }
    }
    roots
}

fn check_import_statement(tokens: &[Tok], violations: &mut Vec<String>) {
    for root in import_roots(&tokens[1..]) {
        if DENYLISTED_MODULES.contains(&root.as_str()) {
            violations.push(format!("import of denylisted module: {root}"));
        }
    }
}

fn check_from_import_statement(tokens: &[Tok], violations: &mut Vec<String>) {
    let module = ident_at(tokens, 1).unwrap_or("");
    if DENYLISTED_MODULES.contains(&module) {
        violations.push(format!("import of denylisted module: {module}"));
        return;
    }

    // `from x import system` smuggles the capability under a bare name.
    let import_pos = tokens
        .iter()
        .position(|t| matches!(t, Tok::Ident(name) if name == "import"));
    if let Some(pos) = import_pos {
        for tok in &tokens[pos + 1..] {
            if let Tok::Ident(name) = tok {
                if DANGEROUS_IMPORT_NAMES.contains(&name.as_str()) {
                    violations.push(format!("import of dangerous name: {module}.{name}"));
                }
            }
        }
    }
}

/// Scan a statement for call expressions and dunder attribute probes.
fn check_expressions(tokens: &[Tok], violations: &mut Vec<String>) {
    let mut i = 0;
    while i < tokens.len() {
        if let Tok::Ident(first) = &tokens[i] {
            // Assemble the maximal dotted path starting here.
            let mut path = vec![first.clone()];
            let mut j = i + 1;
            while j + 1 < tokens.len()
                && tokens[j] == Tok::Punct('.')
                && matches!(tokens[j + 1], Tok::Ident(_))
            {
                if let Tok::Ident(seg) = &tokens[j + 1] {
                    path.push(seg.clone());
                }
                j += 2;
            }

            for segment in &path {
                if DANGEROUS_ATTRIBUTES.contains(&segment.as_str()) {
                    violations.push(format!("dangerous attribute access: {segment}"));
                }
            }

            let is_call = tokens.get(j) == Some(&Tok::Punct('('));
            if is_call {
                let full = path.join(".");
                if path.len() == 1 && DANGEROUS_BUILTINS.contains(&full.as_str()) {
                    violations.push(format!("dangerous builtin call: {full}()"));
                } else if DANGEROUS_CALLS.contains(&full.as_str())
                    || full.starts_with("subprocess.")
                {
                    violations.push(format!("dangerous call: {full}()"));
                }
            }

            i = j;
        } else {
            i += 1;
        }
    }
}

/// Validate a script payload. `Err` carries the violations — a parse
/// failure is reported the same way, never treated as safe.
pub fn validate_source(source: &str) -> Result<(), Vec<String>> {
    let tokens = match tokenize(source) {
        Ok(tokens) => tokens,
        Err(ParseError(detail)) => return Err(vec![format!("parse error: {detail}")]),
    };

    let mut violations = Vec::new();
    for statement in split_statements(&tokens) {
        match ident_at(statement, 0) {
            Some("import") => check_import_statement(statement, &mut violations),
            Some("from") => check_from_import_statement(statement, &mut violations),
            _ => {}
        }
        check_expressions(statement, &mut violations);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_script_passes() {
        let code = "import math\nprint(math.sqrt(16))\nx = [i for i in range(3)]\n";
        assert!(validate_source(code).is_ok());
    }

    #[test]
    fn import_os_is_rejected() {
        let violations = validate_source("import os\nprint('hi')").unwrap_err();
        assert!(violations[0].contains("denylisted module: os"));
    }

    #[test]
    fn import_list_checks_every_module() {
        let violations = validate_source("import json, subprocess").unwrap_err();
        assert!(violations[0].contains("subprocess"));
    }

    #[test]
    fn from_import_of_denylisted_module_is_rejected() {
        let violations = validate_source("from shutil import rmtree").unwrap_err();
        assert!(violations[0].contains("shutil"));
    }

    #[test]
    fn from_import_of_dangerous_name_is_rejected() {
        let violations = validate_source("from helpers import system").unwrap_err();
        assert!(violations[0].contains("helpers.system"));
    }

    #[test]
    fn eval_call_is_rejected() {
        let violations = validate_source("eval('2 + 2')").unwrap_err();
        assert!(violations[0].contains("eval()"));
    }

    #[test]
    fn os_system_rm_rf_is_rejected() {
        let violations = validate_source("os.system('rm -rf /')").unwrap_err();
        assert!(violations[0].contains("os.system()"));
    }

    #[test]
    fn any_subprocess_call_is_rejected() {
        for code in [
            "subprocess.run(['ls'])",
            "subprocess.Popen('x')",
            "subprocess.check_output('x')",
        ] {
            assert!(validate_source(code).is_err(), "expected rejection: {code}");
        }
    }

    #[test]
    fn dunder_probing_is_rejected() {
        let violations = validate_source("().__class__.__bases__").unwrap_err();
        assert!(violations.iter().any(|v| v.contains("__class__")));
    }

    #[test]
    fn eval_named_in_a_string_is_fine() {
        assert!(validate_source("print('eval is a word')").is_ok());
        assert!(validate_source("note = \"import os\"").is_ok());
    }

    #[test]
    fn eval_in_a_comment_is_fine() {
        assert!(validate_source("# eval('x') would be bad\nprint(1)").is_ok());
    }

    #[test]
    fn unterminated_string_fails_closed() {
        let violations = validate_source("print('unclosed").unwrap_err();
        assert!(violations[0].contains("parse error"));
    }

    #[test]
    fn unbalanced_brackets_fail_closed() {
        let violations = validate_source("print((1, 2)").unwrap_err();
        assert!(violations[0].contains("parse error"));

        let violations = validate_source("print(1))").unwrap_err();
        assert!(violations[0].contains("parse error"));
    }

    #[test]
    fn multiline_call_inside_brackets_is_one_statement() {
        let code = "result = sum(\n    [1, 2, 3]\n)\n";
        assert!(validate_source(code).is_ok());
    }

    #[test]
    fn dunder_import_builtin_is_rejected() {
        let violations = validate_source("__import__('os')").unwrap_err();
        assert!(violations[0].contains("__import__"));
    }

    #[test]
    fn triple_quoted_strings_are_consumed() {
        let code = "doc = \"\"\"contains import os and eval() text\"\"\"\nprint(doc)";
        assert!(validate_source(code).is_ok());
    }
}
