//! Template parser using nom.
//!
//! Templates are SQL text with `{{ … }}` actions:
//!
//! ```text
//! SELECT id, name FROM users
//! WHERE active = {{ .active }}
//! {{- if .ids }} AND id IN ({{ .ids }}){{ end }}
//! ─┬─────────  ─┬────────────────────  ─┬──
//!  │            │                       └── end of block
//!  │            └── output action (bound as placeholder)
//!  └── condition (not emitted)
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped, tag, take_until, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, none_of, one_of, satisfy},
    combinator::{map, map_res, not, opt, peek, recognize, rest, value, verify},
    multi::{many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{FaylError, FaylResult};
use crate::value::Value;

/// A node of the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

/// An expression inside an action.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// `.a.b`: a parameter, optionally descending into object fields.
    Field(Vec<String>),
    Literal(Value),
    Call(Func, Vec<Expr>),
}

/// Built-in template functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Len,
    Sub,
    IsTimeZero,
    IsTimeNotZero,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "not" => Func::Not,
            "and" => Func::And,
            "or" => Func::Or,
            "eq" => Func::Eq,
            "ne" => Func::Ne,
            "lt" => Func::Lt,
            "le" => Func::Le,
            "gt" => Func::Gt,
            "ge" => Func::Ge,
            "len" => Func::Len,
            "sub" => Func::Sub,
            "IsTimeZero" => Func::IsTimeZero,
            "IsTimeNotZero" => Func::IsTimeNotZero,
            _ => return None,
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Func::Not => "not",
            Func::And => "and",
            Func::Or => "or",
            Func::Eq => "eq",
            Func::Ne => "ne",
            Func::Lt => "lt",
            Func::Le => "le",
            Func::Gt => "gt",
            Func::Ge => "ge",
            Func::Len => "len",
            Func::Sub => "sub",
            Func::IsTimeZero => "IsTimeZero",
            Func::IsTimeNotZero => "IsTimeNotZero",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Output(Expr),
    If(Expr),
    ElseIf(Expr),
    Else,
    End,
    Comment,
}

#[derive(Debug)]
enum Token {
    Text(String),
    Action {
        action: Action,
        trim_left: bool,
        trim_right: bool,
        position: usize,
    },
}

/// Parse a complete template into its node tree.
pub(crate) fn parse(input: &str) -> FaylResult<Vec<Node>> {
    let tokens = tokenize(input)?;
    let mut tokens = trim_markers(tokens).into_iter();

    let (nodes, terminator) = build(&mut tokens)?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        Terminator::End(pos) => Err(syntax(pos, "unexpected {{ end }}")),
        Terminator::Else(pos) | Terminator::ElseIf(_, pos) => {
            Err(syntax(pos, "unexpected {{ else }} outside of {{ if }}"))
        }
    }
}

fn syntax(position: usize, message: impl Into<String>) -> FaylError {
    FaylError::compile("", format!("template syntax error at byte {}: {}", position, message.into()))
}

/// Split the template into text and actions.
fn tokenize(input: &str) -> FaylResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut remaining = input;

    while !remaining.is_empty() {
        let position = input.len() - remaining.len();

        if remaining.starts_with("{{") {
            match parse_action(remaining) {
                Ok((next, (trim_left, action, trim_right))) => {
                    tokens.push(Token::Action {
                        action,
                        trim_left,
                        trim_right,
                        position,
                    });
                    remaining = next;
                }
                Err(_) => return Err(syntax(position, format!("invalid action '{}'", snippet(remaining)))),
            }
        } else {
            let (next, text) = parse_text(remaining)
                .map_err(|_| syntax(position, "unterminated text"))?;
            tokens.push(Token::Text(text.to_string()));
            remaining = next;
        }
    }

    Ok(tokens)
}

fn snippet(input: &str) -> &str {
    let end = input.find("}}").map(|i| i + 2).unwrap_or(input.len());
    &input[..end.min(input.len())]
}

/// Apply `{{-` and `-}}` whitespace trimming to neighbouring text.
fn trim_markers(mut tokens: Vec<Token>) -> Vec<Token> {
    for i in 0..tokens.len() {
        let (trim_left, trim_right) = match &tokens[i] {
            Token::Action {
                trim_left,
                trim_right,
                ..
            } => (*trim_left, *trim_right),
            Token::Text(_) => continue,
        };

        if trim_left && i > 0 {
            if let Token::Text(text) = &mut tokens[i - 1] {
                text.truncate(text.trim_end().len());
            }
        }
        if trim_right && i + 1 < tokens.len() {
            if let Token::Text(text) = &mut tokens[i + 1] {
                *text = text.trim_start().to_string();
            }
        }
    }
    tokens
}

enum Terminator {
    Eof,
    End(usize),
    Else(usize),
    ElseIf(Expr, usize),
}

/// Build nodes until the end of input or a block terminator.
fn build(tokens: &mut std::vec::IntoIter<Token>) -> FaylResult<(Vec<Node>, Terminator)> {
    let mut nodes = Vec::new();

    while let Some(token) = tokens.next() {
        let (action, position) = match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    nodes.push(Node::Text(text));
                }
                continue;
            }
            Token::Action { action, position, .. } => (action, position),
        };

        match action {
            Action::Comment => {}
            Action::Output(expr) => nodes.push(Node::Output(expr)),
            Action::End => return Ok((nodes, Terminator::End(position))),
            Action::Else => return Ok((nodes, Terminator::Else(position))),
            Action::ElseIf(expr) => return Ok((nodes, Terminator::ElseIf(expr, position))),
            Action::If(cond) => nodes.push(build_if(tokens, cond, position)?),
        }
    }

    Ok((nodes, Terminator::Eof))
}

fn build_if(tokens: &mut std::vec::IntoIter<Token>, cond: Expr, position: usize) -> FaylResult<Node> {
    let mut branches = Vec::new();
    let mut cond = cond;

    loop {
        let (body, terminator) = build(tokens)?;
        branches.push((cond, body));

        match terminator {
            Terminator::End(_) => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                });
            }
            Terminator::ElseIf(next, _) => cond = next,
            Terminator::Else(_) => {
                let (otherwise, terminator) = build(tokens)?;
                return match terminator {
                    Terminator::End(_) => Ok(Node::If { branches, otherwise }),
                    Terminator::Eof => Err(syntax(position, "{{ if }} without {{ end }}")),
                    Terminator::Else(pos) | Terminator::ElseIf(_, pos) => {
                        Err(syntax(pos, "{{ else }} after {{ else }}"))
                    }
                };
            }
            Terminator::Eof => return Err(syntax(position, "{{ if }} without {{ end }}")),
        }
    }
}

/// Parse raw text up to the next action.
fn parse_text(input: &str) -> IResult<&str, &str> {
    verify(alt((take_until("{{"), rest)), |s: &str| !s.is_empty())(input)
}

/// Parse `{{ … }}` including trim markers.
fn parse_action(input: &str) -> IResult<&str, (bool, Action, bool)> {
    let (input, _) = tag("{{")(input)?;
    let (input, trim_left) = map(opt(terminated(char('-'), multispace1)), |m| m.is_some())(input)?;
    let (input, _) = multispace0(input)?;
    let (input, action) = parse_action_body(input)?;
    let (input, _) = multispace0(input)?;
    let (input, trim_right) = map(opt(char('-')), |m| m.is_some())(input)?;
    let (input, _) = tag("}}")(input)?;

    Ok((input, (trim_left, action, trim_right)))
}

fn parse_action_body(input: &str) -> IResult<&str, Action> {
    alt((
        value(
            Action::Comment,
            delimited(tag("/*"), take_until("*/"), tag("*/")),
        ),
        map(
            preceded(tuple((keyword("else"), multispace1, keyword("if"), multispace1)), parse_expr),
            Action::ElseIf,
        ),
        map(preceded(pair(keyword("if"), multispace1), parse_expr), Action::If),
        value(Action::Else, keyword("else")),
        value(Action::End, keyword("end")),
        map(parse_expr, Action::Output),
    ))(input)
}

/// Match a keyword that is not the prefix of a longer identifier.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(peek(satisfy(is_ident_char))))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(is_ident_char)(input)
}

/// Parse an expression: a function call or a single operand.
fn parse_expr(input: &str) -> IResult<&str, Expr> {
    alt((parse_call, parse_operand))(input)
}

fn parse_call(input: &str) -> IResult<&str, Expr> {
    let (input, func) = map_res(parse_identifier, |name| Func::from_name(name).ok_or(()))(input)?;
    let (input, args) = many1(preceded(multispace1, parse_operand))(input)?;
    Ok((input, Expr::Call(func, args)))
}

fn parse_operand(input: &str) -> IResult<&str, Expr> {
    alt((
        parse_field,
        map(parse_string, |s| Expr::Literal(Value::Text(s))),
        map(parse_number, Expr::Literal),
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        value(Expr::Literal(Value::Null), keyword("nil")),
        delimited(
            pair(char('('), multispace0),
            parse_expr,
            pair(multispace0, char(')')),
        ),
    ))(input)
}

/// Parse `.name` or `.a.b.c`.
fn parse_field(input: &str) -> IResult<&str, Expr> {
    map(
        preceded(char('.'), separated_list1(char('.'), parse_identifier)),
        |parts: Vec<&str>| Expr::Field(parts.into_iter().map(str::to_string).collect()),
    )(input)
}

fn parse_string(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            opt(escaped(none_of("\\\""), '\\', one_of("\"\\nt"))),
            char('"'),
        ),
        |s: Option<&str>| unescape(s.unwrap_or_default()),
    )(input)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    let (input, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    let value = if text.contains('.') {
        text.parse::<f64>().map(Value::Float).ok()
    } else {
        text.parse::<i64>().map(Value::Int).ok()
    };

    match value {
        Some(v) => Ok((input, v)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Expr {
        Expr::Field(name.split('.').map(str::to_string).collect())
    }

    #[test]
    fn test_plain_text() {
        let nodes = parse("SELECT 1").unwrap();
        assert_eq!(nodes, vec![Node::Text("SELECT 1".into())]);
    }

    #[test]
    fn test_output_action() {
        let nodes = parse("WHERE id = {{.id}} AND x = {{ .a.b }}").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("WHERE id = ".into()),
                Node::Output(field("id")),
                Node::Text(" AND x = ".into()),
                Node::Output(field("a.b")),
            ]
        );
    }

    #[test]
    fn test_if_else_chain() {
        let nodes = parse("{{ if .a }}A{{ else if not .b }}B{{ else }}C{{ end }}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::If {
                branches: vec![
                    (field("a"), vec![Node::Text("A".into())]),
                    (
                        Expr::Call(Func::Not, vec![field("b")]),
                        vec![Node::Text("B".into())]
                    ),
                ],
                otherwise: vec![Node::Text("C".into())],
            }]
        );
    }

    #[test]
    fn test_call_with_literals() {
        let nodes = parse(r#"{{ if eq .status "active" }}x{{ end }}{{ if gt (len .ids) 2 }}y{{ end }}"#).unwrap();
        let Node::If { branches, .. } = &nodes[0] else {
            panic!("expected if");
        };
        assert_eq!(
            branches[0].0,
            Expr::Call(Func::Eq, vec![field("status"), Expr::Literal(Value::Text("active".into()))])
        );
        let Node::If { branches, .. } = &nodes[1] else {
            panic!("expected if");
        };
        assert_eq!(
            branches[0].0,
            Expr::Call(
                Func::Gt,
                vec![
                    Expr::Call(Func::Len, vec![field("ids")]),
                    Expr::Literal(Value::Int(2))
                ]
            )
        );
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let nodes = parse("SELECT 1\n  {{- /* note */ -}}\n  FROM t").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Text("SELECT 1".into()), Node::Text("FROM t".into())]
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("{{ if .a }}missing end").is_err());
        assert!(parse("{{ end }}").is_err());
        assert!(parse("{{ .a ").is_err());
        assert!(parse("{{ bogus .a }}").is_err());
        assert!(parse("{{ if .a }}{{ else }}{{ else }}{{ end }}").is_err());
    }
}
