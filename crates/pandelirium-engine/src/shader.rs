//! Operator bodies as opaque GLSL fragments.
//!
//! The engine never compiles a body. The only inspection it does is a lexical scan for free
//! identifiers so a definition's parameter list can be checked against what the body uses.

use std::collections::BTreeSet;

/// Uniforms every generated program exposes to operator bodies.
pub const AMBIENT_UNIFORMS: &[&str] = &["time", "resolution"];

const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "int", "uint", "float", "double", "vec2", "vec3", "vec4", "bvec2", "bvec3",
    "bvec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3", "uvec4", "mat2", "mat3", "mat4",
    "sampler2D",
];

const OTHER_KEYWORDS: &[&str] = &[
    "return", "if", "else", "for", "while", "do", "break", "continue", "discard", "const", "in",
    "out", "inout", "uniform", "highp", "mediump", "lowp", "precision", "struct", "true", "false",
];

/// GLSL source fragment carried by an operator definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderSource(String);

impl ShaderSource {
    pub fn new(src: impl Into<String>) -> Self {
        Self(src.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifiers the body reads but never declares.
    ///
    /// Ignored: keywords and type names, `gl_*` builtins, anything called like a function,
    /// member/swizzle access after `.`, `#define`d names, `implicit` inputs and
    /// [`AMBIENT_UNIFORMS`]. A local only hides reads that come after its declaration and sit
    /// inside its block, so a parameter read before a same-named local is still free.
    pub fn free_identifiers(&self, implicit: &[&str]) -> BTreeSet<String> {
        let tokens = tokenize(&self.0);
        let mut scopes: Vec<BTreeSet<String>> = vec![BTreeSet::new()];
        let mut used = BTreeSet::new();

        // Declaration tracking: after a type keyword, identifiers at the same paren depth that
        // directly follow the type or a comma are being declared.
        let mut decl_depth: Option<i32> = None;
        let mut expect_decl = false;
        let mut depth = 0i32;

        for (i, tok) in tokens.iter().enumerate() {
            match tok {
                Token::Macro(name) => {
                    scopes[0].insert(name.clone());
                    decl_depth = None;
                    expect_decl = false;
                }
                Token::Punct(c) => {
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if decl_depth.map_or(false, |d| depth < d) {
                                decl_depth = None;
                            }
                        }
                        '{' => {
                            scopes.push(BTreeSet::new());
                            decl_depth = None;
                        }
                        '}' => {
                            if scopes.len() > 1 {
                                scopes.pop();
                            }
                            decl_depth = None;
                        }
                        ';' => decl_depth = None,
                        ',' => {
                            if decl_depth == Some(depth) {
                                expect_decl = true;
                                continue;
                            }
                        }
                        _ => {}
                    }
                    expect_decl = false;
                }
                Token::Ident(name) => {
                    let next_is_call = matches!(tokens.get(i + 1), Some(Token::Punct('(')));
                    let after_dot = i > 0 && matches!(tokens[i - 1], Token::Punct('.'));

                    if TYPE_KEYWORDS.contains(&name.as_str()) {
                        if !next_is_call {
                            decl_depth = Some(depth);
                            expect_decl = true;
                        }
                        continue;
                    }
                    if expect_decl {
                        if let Some(top) = scopes.last_mut() {
                            top.insert(name.clone());
                        }
                        expect_decl = false;
                        continue;
                    }
                    if after_dot
                        || next_is_call
                        || OTHER_KEYWORDS.contains(&name.as_str())
                        || name.starts_with("gl_")
                        || scopes.iter().any(|s| s.contains(name))
                    {
                        continue;
                    }
                    used.insert(name.clone());
                }
            }
        }

        used.into_iter()
            .filter(|n| !implicit.contains(&n.as_str()))
            .filter(|n| !AMBIENT_UNIFORMS.contains(&n.as_str()))
            .collect()
    }
}

impl From<&str> for ShaderSource {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ShaderSource {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Punct(char),
    /// Name introduced by a `#define` line.
    Macro(String),
}

fn tokenize(src: &str) -> Vec<Token> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line_start = true;

    while i < chars.len() {
        let c = chars[i];

        if c == '#' && line_start {
            i = skip_directive(&chars, i + 1, &mut out);
        } else if c.is_whitespace() {
            if c == '\n' {
                line_start = true;
            }
            i += 1;
            continue;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit()))
        {
            // numeric literal, including exponents and suffixes (1.0e-3, 2u, .5f)
            while i < chars.len() {
                let d = chars[i];
                let exp_sign = (d == '-' || d == '+')
                    && i > 0
                    && matches!(chars[i - 1], 'e' | 'E');
                if d.is_ascii_alphanumeric() || d == '.' || exp_sign {
                    i += 1;
                } else {
                    break;
                }
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let (name, next) = read_ident(&chars, i);
            out.push(Token::Ident(name));
            i = next;
        } else {
            out.push(Token::Punct(c));
            i += 1;
        }
        line_start = false;
    }

    out
}

fn read_ident(chars: &[char], mut i: usize) -> (String, usize) {
    let start = i;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

fn skip_blanks(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
        i += 1;
    }
    i
}

/// Consumes a preprocessor line (with `\` continuations) starting after the `#`.
fn skip_directive(chars: &[char], i: usize, out: &mut Vec<Token>) -> usize {
    let (directive, i) = read_ident(chars, skip_blanks(chars, i));
    let mut i = i;
    if directive == "define" {
        let (name, next) = read_ident(chars, skip_blanks(chars, i));
        if !name.is_empty() {
            out.push(Token::Macro(name));
        }
        i = next;
    }
    while i < chars.len() && chars[i] != '\n' {
        if chars[i] == '\\' && chars.get(i + 1) == Some(&'\n') {
            i += 1;
        }
        i += 1;
    }
    i
}
