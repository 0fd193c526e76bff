//! Template compiler: named template + parameters → driver-ready SQL.
//!
//! Values are never spliced into the SQL text. Every output action becomes a
//! placeholder in the configured dialect and its value is appended to the
//! argument list, so the result is safe to hand to the driver as-is.
//!
//! ```
//! use fayl::template::compile;
//! use fayl::{Params, Placeholder, Value};
//!
//! let mut params = Params::new();
//! params.insert("ids".into(), Value::from(vec![1i64, 2, 3]));
//!
//! let stmt = compile("SELECT * FROM users WHERE id IN ({{ .ids }})", &params, Placeholder::Dollar).unwrap();
//! assert_eq!(stmt.sql, "SELECT * FROM users WHERE id IN ($1, $2, $3)");
//! assert_eq!(stmt.args.len(), 3);
//! ```

mod parser;

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::dialect::Placeholder;
use crate::error::{FaylError, FaylResult};
use crate::value::{Params, Value};

use parser::{Expr, Func, Node};

/// A compiled statement: SQL text plus positional arguments in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

/// A parsed template, reusable across parameter sets.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template text.
    pub fn parse(text: &str) -> FaylResult<Self> {
        Ok(Self {
            nodes: parser::parse(text)?,
        })
    }

    /// Render with `params`, numbering placeholders in `placeholder` style.
    pub fn render(&self, params: &Params, placeholder: Placeholder) -> FaylResult<Statement> {
        let mut renderer = Renderer {
            params,
            placeholder,
            sql: String::new(),
            args: Vec::new(),
        };
        renderer.render_nodes(&self.nodes)?;

        Ok(Statement {
            sql: renderer.sql.trim().to_string(),
            args: renderer.args,
        })
    }
}

/// Parse and render in one step.
pub fn compile(template: &str, params: &Params, placeholder: Placeholder) -> FaylResult<Statement> {
    Template::parse(template)?.render(params, placeholder)
}

struct Renderer<'p> {
    params: &'p Params,
    placeholder: Placeholder,
    sql: String,
    args: Vec<Value>,
}

impl Renderer<'_> {
    fn render_nodes(&mut self, nodes: &[Node]) -> FaylResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => self.sql.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr, true)?;
                    self.bind(value, expr)?;
                }
                Node::If { branches, otherwise } => {
                    let mut taken = None;
                    for (cond, body) in branches {
                        if self.eval(cond, false)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    self.render_nodes(taken.unwrap_or(otherwise))?;
                }
            }
        }
        Ok(())
    }

    /// Emit placeholders for `value`, expanding lists.
    fn bind(&mut self, value: Value, expr: &Expr) -> FaylResult<()> {
        match value {
            Value::List(items) => {
                if items.is_empty() {
                    return Err(FaylError::bind(
                        "",
                        format!("empty list passed to {}", describe(expr)),
                    ));
                }
                let mut marks = Vec::with_capacity(items.len());
                for item in items {
                    if matches!(item, Value::List(_)) {
                        return Err(FaylError::bind(
                            "",
                            format!("nested list passed to {}", describe(expr)),
                        ));
                    }
                    marks.push(self.push_arg(item));
                }
                self.sql.push_str(&marks.join(", "));
            }
            other => {
                let mark = self.push_arg(other);
                self.sql.push_str(&mark);
            }
        }
        Ok(())
    }

    fn push_arg(&mut self, value: Value) -> String {
        self.args.push(value);
        self.placeholder.render(self.args.len())
    }

    /// Evaluate an expression. In strict mode undefined variables are errors,
    /// otherwise they evaluate to null.
    fn eval(&self, expr: &Expr, strict: bool) -> FaylResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field(path) => match self.lookup(path) {
                Some(v) => Ok(v),
                None if strict => Err(FaylError::compile(
                    "",
                    format!("undefined template variable '.{}'", path.join(".")),
                )),
                None => Ok(Value::Null),
            },
            Expr::Call(func, args) => self.call(*func, args, strict),
        }
    }

    fn lookup(&self, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.params.get(first)?.clone();
        for name in rest {
            current = current.field(name)?;
        }
        Some(current)
    }

    fn call(&self, func: Func, args: &[Expr], strict: bool) -> FaylResult<Value> {
        let arity = |n: usize| -> FaylResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(FaylError::compile(
                    "",
                    format!("'{}' expects {} argument(s), got {}", func.name(), n, args.len()),
                ))
            }
        };

        match func {
            Func::Not => {
                arity(1)?;
                Ok(Value::Bool(!self.eval(&args[0], strict)?.is_truthy()))
            }
            Func::And => {
                let mut last = Value::Bool(true);
                for arg in args {
                    last = self.eval(arg, strict)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Func::Or => {
                let mut last = Value::Bool(false);
                for arg in args {
                    last = self.eval(arg, strict)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Func::Eq | Func::Ne => {
                arity(2)?;
                let equal = self.eval(&args[0], strict)?.loose_eq(&self.eval(&args[1], strict)?);
                Ok(Value::Bool(if func == Func::Eq { equal } else { !equal }))
            }
            Func::Lt | Func::Le | Func::Gt | Func::Ge => {
                arity(2)?;
                let a = self.eval(&args[0], strict)?;
                let b = self.eval(&args[1], strict)?;
                let ord = a.loose_cmp(&b).ok_or_else(|| {
                    FaylError::compile(
                        "",
                        format!("'{}' cannot compare {} with {}", func.name(), a, b),
                    )
                })?;
                let result = match func {
                    Func::Lt => ord == Ordering::Less,
                    Func::Le => ord != Ordering::Greater,
                    Func::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                Ok(Value::Bool(result))
            }
            Func::Len => {
                arity(1)?;
                let v = self.eval(&args[0], strict)?;
                match v {
                    Value::Null => Ok(Value::Int(0)),
                    other => other.len().map(|n| Value::Int(n as i64)).ok_or_else(|| {
                        FaylError::compile("", format!("'len' of {} is undefined", other))
                    }),
                }
            }
            Func::Sub => {
                let (x, y) = match args {
                    [x] => (self.eval(x, strict)?, Value::Int(1)),
                    [x, y] => (self.eval(x, strict)?, self.eval(y, strict)?),
                    _ => {
                        return Err(FaylError::compile(
                            "",
                            format!("'sub' expects 1 or 2 argument(s), got {}", args.len()),
                        ));
                    }
                };
                match (&x, &y) {
                    (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(|| {
                        FaylError::compile("", format!("'sub' overflows for {} - {}", a, b))
                    }),
                    _ => Err(FaylError::compile(
                        "",
                        format!("'sub' expects integers, got {} and {}", x, y),
                    )),
                }
            }
            Func::IsTimeZero | Func::IsTimeNotZero => {
                arity(1)?;
                let v = self.eval(&args[0], strict)?;
                let zero = time_is_zero(&v).ok_or_else(|| {
                    FaylError::compile("", format!("'{}' expects a time, got {}", func.name(), v))
                })?;
                Ok(Value::Bool(if func == Func::IsTimeZero { zero } else { !zero }))
            }
        }
    }
}

/// Whether a time parameter is unset: null, empty text, or the
/// `0001-01-01T00:00:00Z` / Unix epoch instant. `None` when `v` is not a time.
fn time_is_zero(v: &Value) -> Option<bool> {
    let seconds = match v {
        Value::Null => return Some(true),
        Value::Int(secs) => *secs,
        Value::Text(text) if text.trim().is_empty() => return Some(true),
        Value::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                dt.timestamp()
            } else if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
                dt.and_utc().timestamp()
            } else {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()?
                    .and_hms_opt(0, 0, 0)?
                    .and_utc()
                    .timestamp()
            }
        }
        _ => return None,
    };
    Some(seconds == 0 || seconds == ZERO_TIME_SECONDS)
}

/// Unix seconds of `0001-01-01T00:00:00Z`.
const ZERO_TIME_SECONDS: i64 = -62_135_596_800;

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Field(path) => format!("'.{}'", path.join(".")),
        Expr::Call(func, _) => format!("'{}' call", func.name()),
        Expr::Literal(v) => format!("literal {}", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_simple_binding() {
        let p = params(&[("id", Value::Int(7))]);
        let stmt = compile("SELECT id, name FROM users WHERE id = {{.id}}", &p, Placeholder::Question).unwrap();
        assert_eq!(stmt.sql, "SELECT id, name FROM users WHERE id = ?");
        assert_eq!(stmt.args, vec![Value::Int(7)]);
    }

    #[test]
    fn test_dialects_number_in_order() {
        let p = params(&[("a", Value::Int(1)), ("b", Value::Text("x".into()))]);
        let tpl = "WHERE a = {{ .a }} AND b = {{ .b }} AND c = {{ .a }}";

        assert_eq!(
            compile(tpl, &p, Placeholder::Dollar).unwrap().sql,
            "WHERE a = $1 AND b = $2 AND c = $3"
        );
        assert_eq!(
            compile(tpl, &p, Placeholder::Colon).unwrap().sql,
            "WHERE a = :1 AND b = :2 AND c = :3"
        );
        assert_eq!(
            compile(tpl, &p, Placeholder::AtP).unwrap().sql,
            "WHERE a = @p1 AND b = @p2 AND c = @p3"
        );
    }

    #[test]
    fn test_list_expansion() {
        let p = params(&[("ids", Value::from(vec![3i64, 4, 5])), ("name", Value::from("Ann"))]);
        let stmt = compile(
            "SELECT * FROM t WHERE id IN ({{ .ids }}) AND name = {{ .name }}",
            &p,
            Placeholder::Dollar,
        )
        .unwrap();

        assert_eq!(stmt.sql, "SELECT * FROM t WHERE id IN ($1, $2, $3) AND name = $4");
        assert_eq!(
            stmt.args,
            vec![Value::Int(3), Value::Int(4), Value::Int(5), Value::Text("Ann".into())]
        );
    }

    #[test]
    fn test_empty_list_is_bind_error() {
        let p = params(&[("ids", Value::List(vec![]))]);
        let err = compile("WHERE id IN ({{ .ids }})", &p, Placeholder::Question).unwrap_err();
        assert!(matches!(err, FaylError::Bind { .. }));
    }

    #[test]
    fn test_undefined_variable() {
        let err = compile("WHERE id = {{ .id }}", &Params::new(), Placeholder::Question).unwrap_err();
        assert!(matches!(err, FaylError::Compile { ref message, .. } if message.contains(".id")));
    }

    #[test]
    fn test_conditionals() {
        let tpl = "SELECT * FROM users WHERE 1 = 1
            {{- if .name }} AND name = {{ .name }}{{ end }}
            {{- if and .min (gt .min 0) }} AND age >= {{ .min }}{{ end }}
            {{- if eq .status \"all\" }}{{ else }} AND status = {{ .status }}{{ end }}";

        let all = compile(
            tpl,
            &params(&[("status", Value::from("all"))]),
            Placeholder::Question,
        )
        .unwrap();
        assert_eq!(all.sql, "SELECT * FROM users WHERE 1 = 1");
        assert!(all.args.is_empty());

        let filtered = compile(
            tpl,
            &params(&[
                ("name", Value::from("Ann")),
                ("min", Value::Int(18)),
                ("status", Value::from("active")),
            ]),
            Placeholder::Dollar,
        )
        .unwrap();
        assert_eq!(
            filtered.sql,
            "SELECT * FROM users WHERE 1 = 1 AND name = $1 AND age >= $2 AND status = $3"
        );
    }

    #[test]
    fn test_nested_field() {
        let p = params(&[("user", Value::from(serde_json::json!({"id": 9})))]);
        let stmt = compile("WHERE id = {{ .user.id }}", &p, Placeholder::Question).unwrap();
        assert_eq!(stmt.args, vec![Value::Int(9)]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let p = params(&[
            ("a", Value::Int(1)),
            ("b", Value::from(vec!["x", "y"])),
            ("c", Value::Bool(true)),
        ]);
        let tpl = "SELECT {{ .a }} WHERE b IN ({{ .b }}) {{ if .c }}AND c = {{ .c }}{{ end }}";

        let first = compile(tpl, &p, Placeholder::Dollar).unwrap();
        for _ in 0..5 {
            assert_eq!(compile(tpl, &p, Placeholder::Dollar).unwrap(), first);
        }
    }

    #[test]
    fn test_time_zero_helpers() {
        let p = params(&[
            ("unset", Value::Text("0001-01-01T00:00:00Z".into())),
            ("epoch", Value::Text("1970-01-01 00:00:00".into())),
            ("empty", Value::Text(String::new())),
            ("since", Value::Text("2024-03-01T08:30:00+07:00".into())),
            ("day", Value::Text("2024-03-01".into())),
        ]);
        let tpl = "{{ if IsTimeZero .unset }}a{{ end }}\
                   {{ if IsTimeZero .epoch }}b{{ end }}\
                   {{ if IsTimeZero .empty }}c{{ end }}\
                   {{ if IsTimeZero .missing }}d{{ end }}\
                   {{ if IsTimeNotZero .since }}e{{ end }}\
                   {{ if IsTimeNotZero .day }}f{{ end }}\
                   {{ if IsTimeZero .since }}x{{ end }}";
        let stmt = compile(tpl, &p, Placeholder::Question).unwrap();
        assert_eq!(stmt.sql, "abcdef");

        let p = params(&[("since", Value::Text("yesterday".into()))]);
        let err = compile("{{ if IsTimeZero .since }}x{{ end }}", &p, Placeholder::Question).unwrap_err();
        assert!(err.to_string().contains("'IsTimeZero' expects a time"));
    }

    #[test]
    fn test_time_helpers_with_chrono_values() {
        use chrono::{TimeZone, Utc};

        let p = params(&[("since", Value::from(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()))]);
        let stmt = compile(
            "SELECT * FROM t{{ if IsTimeNotZero .since }} WHERE created_at >= {{ .since }}{{ end }}",
            &p,
            Placeholder::Dollar,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM t WHERE created_at >= $1");
    }

    #[test]
    fn test_sub() {
        let p = params(&[("n", Value::Int(3)), ("ids", Value::from(vec![1i64, 2]))]);
        let stmt = compile(
            "{{ if eq (sub .n) 2 }}a{{ end }}{{ if eq (sub .n 3) 0 }}b{{ end }}{{ if eq (sub (len .ids)) 1 }}c{{ end }}",
            &p,
            Placeholder::Question,
        )
        .unwrap();
        assert_eq!(stmt.sql, "abc");

        let stmt = compile("LIMIT {{ sub .n }}", &p, Placeholder::Question).unwrap();
        assert_eq!(stmt.args, vec![Value::Int(2)]);

        let p = params(&[("n", Value::Int(i64::MIN)), ("s", Value::Text("x".into()))]);
        assert!(compile("{{ sub .n }}", &p, Placeholder::Question).is_err());
        assert!(compile("{{ sub .s }}", &p, Placeholder::Question).is_err());
        assert!(compile("{{ sub }}", &p, Placeholder::Question).is_err());
    }

    #[test]
    fn test_len_and_comparison_errors() {
        let p = params(&[("ids", Value::from(vec![1i64]))]);
        let stmt = compile("{{ if ge (len .ids) 1 }}ok{{ end }}", &p, Placeholder::Question).unwrap();
        assert_eq!(stmt.sql, "ok");

        let err = compile("{{ if lt .ids 1 }}x{{ end }}", &p, Placeholder::Question).unwrap_err();
        assert!(matches!(err, FaylError::Compile { .. }));
    }
}
