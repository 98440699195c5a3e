//! Line-oriented tokenizer for the structural checks.
//!
//! Only the syntax the checks care about is recognized: group braces,
//! `\begin{..}`/`\end{..}` markers, unescaped `$`, comments, `\verb` and the
//! verbatim-like environments whose bodies are not TeX.

/// Environments whose body is skipped until the matching `\end`.
pub const VERBATIM_ENVS: &[&str] = &[
    "verbatim",
    "verbatim*",
    "Verbatim",
    "lstlisting",
    "minted",
    "comment",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open { line: usize },
    Close { line: usize },
    Begin { name: String, line: usize },
    End { name: String, line: usize },
}

#[derive(Debug, Default)]
pub struct Scan {
    pub tokens: Vec<Token>,
    /// Comment-stripped text per line, empty inside verbatim bodies.
    pub code: Vec<String>,
    pub odd_dollar_lines: Vec<usize>,
}

/// Parse `{name}` after `\begin`/`\end`, allowing spaces before the brace.
fn env_name(raw: &str, from: usize) -> Option<(&str, usize)> {
    let bytes = raw.as_bytes();
    let mut k = from;
    while k < bytes.len() && bytes[k] == b' ' {
        k += 1;
    }
    if bytes.get(k) != Some(&b'{') {
        return None;
    }
    let close = k + 1 + raw[k + 1..].find('}')?;
    let name = &raw[k + 1..close];
    if name.is_empty() || name.contains(&['{', '\\', '%'][..]) {
        return None;
    }
    Some((name, close + 1))
}

pub fn scan(text: &str) -> Scan {
    let mut scan = Scan::default();
    let mut verbatim: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let bytes = raw.as_bytes();
        let mut code = String::new();
        let mut seg_start = if verbatim.is_some() { None } else { Some(0) };
        let mut code_end = bytes.len();
        let mut dollars = 0usize;
        let mut i = 0;

        while i < bytes.len() {
            if let Some(env) = verbatim.as_deref() {
                let closing = format!("\\end{{{}}}", env);
                match raw[i..].find(&closing) {
                    Some(pos) => {
                        scan.tokens.push(Token::End {
                            name: env.to_string(),
                            line,
                        });
                        seg_start = Some(i + pos);
                        i += pos + closing.len();
                        verbatim = None;
                        continue;
                    }
                    None => {
                        i = bytes.len();
                        break;
                    }
                }
            }

            match bytes[i] {
                b'%' => {
                    code_end = i;
                    break;
                }
                b'{' => {
                    scan.tokens.push(Token::Open { line });
                    i += 1;
                }
                b'}' => {
                    scan.tokens.push(Token::Close { line });
                    i += 1;
                }
                b'$' => {
                    dollars += 1;
                    i += 1;
                }
                b'\\' => {
                    let name_start = i + 1;
                    let mut j = name_start;
                    while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                        j += 1;
                    }
                    if j == name_start {
                        // Control symbol such as \{ \% \$ \\: never structural.
                        i += 2;
                        continue;
                    }
                    match &raw[name_start..j] {
                        "begin" | "end" => {
                            let is_begin = &raw[name_start..j] == "begin";
                            let Some((name, after)) = env_name(raw, j) else {
                                i = j;
                                continue;
                            };
                            let name = name.to_string();
                            i = after;
                            if is_begin {
                                if VERBATIM_ENVS.contains(&name.as_str()) {
                                    if let Some(start) = seg_start.take() {
                                        code.push_str(&raw[start..after]);
                                    }
                                    verbatim = Some(name.clone());
                                }
                                scan.tokens.push(Token::Begin { name, line });
                            } else {
                                scan.tokens.push(Token::End { name, line });
                            }
                        }
                        "verb" => {
                            if bytes.get(j) == Some(&b'*') {
                                j += 1;
                            }
                            match bytes.get(j) {
                                Some(&delim) => {
                                    i = bytes[j + 1..]
                                        .iter()
                                        .position(|&b| b == delim)
                                        .map(|p| j + 1 + p + 1)
                                        .unwrap_or(bytes.len());
                                }
                                None => i = j,
                            }
                        }
                        _ => i = j,
                    }
                }
                _ => i += 1,
            }
        }

        if let Some(start) = seg_start {
            if start < code_end {
                code.push_str(&raw[start..code_end]);
            }
        }
        if dollars % 2 == 1 {
            scan.odd_dollar_lines.push(line);
        }
        scan.code.push(code);
    }

    scan
}
