//! Reference-expression and predicate evaluation (§4.5), plus the minimal boolean
//! grammar backing `skipCondition`/`preflightCheck`. Resolves `@(request.field)` and
//! `@(kind.field("actionID"))` directly against the request-scoped stores — the real
//! evaluation engine behind the seam `manifest::ConfigEvaluator` leaves opaque.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::resource::ResourceKind;
use crate::store::ResourceStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("reference unresolved: {0}")]
    ReferenceUnresolved(String),
    #[error("malformed expression: {0}")]
    MalformedExpression(String),
}

/// The incoming HTTP request, exposed to `@(request.*)` references (§4.5, §6.3).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn field(&self, path: &str) -> Option<String> {
        let mut parts = path.splitn(2, '.');
        match parts.next()? {
            "method" => Some(self.method.clone()),
            "path" => Some(self.path.clone()),
            "headers" => self.headers.get(parts.next()?).cloned(),
            "params" => self.params.get(parts.next()?).cloned(),
            "body" => match parts.next() {
                None => self.body.as_ref().map(value_to_string),
                Some(leaf) => self.body.as_ref()?.get(leaf).map(value_to_string),
            },
            _ => None,
        }
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_kind(s: &str) -> Result<ResourceKind, EvalError> {
    match s {
        "exec" => Ok(ResourceKind::Exec),
        "python" => Ok(ResourceKind::Python),
        "httpclient" => Ok(ResourceKind::HttpClient),
        "client" => Ok(ResourceKind::HttpClient),
        "llm" => Ok(ResourceKind::Llm),
        "chat" => Ok(ResourceKind::Llm),
        "apiresponse" => Ok(ResourceKind::ApiResponse),
        other => Err(EvalError::MalformedExpression(format!("unknown kind: {other}"))),
    }
}

/// Splits `field("actionID")` into `(field, actionID)`, unquoting the argument.
fn parse_field_call(s: &str) -> Result<(String, String), EvalError> {
    let open = s
        .find('(')
        .ok_or_else(|| EvalError::MalformedExpression(s.to_string()))?;
    let close = s
        .rfind(')')
        .ok_or_else(|| EvalError::MalformedExpression(s.to_string()))?;
    if close < open {
        return Err(EvalError::MalformedExpression(s.to_string()));
    }
    let field = s[..open].to_string();
    let arg = s[open + 1..close]
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_string();
    Ok((field, arg))
}

/// Resolves `@(...)` references in `run`-block text against the request-scoped
/// resource store and the incoming HTTP request (§4.5).
pub struct ReferenceEvaluator<'a> {
    pub store: &'a ResourceStore,
    pub request_id: &'a str,
    pub request: &'a RequestContext,
}

impl<'a> ReferenceEvaluator<'a> {
    /// Replaces every `@(...)` occurrence in `text` with its resolved value, leaving
    /// surrounding text untouched. Handles nested parentheses in field calls.
    pub async fn resolve_text(&self, text: &str) -> Result<String, EvalError> {
        let mut out = String::new();
        let mut rest = text;
        loop {
            match rest.find("@(") {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some(idx) => {
                    out.push_str(&rest[..idx]);
                    let after = &rest[idx + 2..];
                    let mut depth = 0i32;
                    let mut end = None;
                    for (i, c) in after.char_indices() {
                        match c {
                            '(' => depth += 1,
                            ')' => {
                                if depth == 0 {
                                    end = Some(i);
                                    break;
                                }
                                depth -= 1;
                            }
                            _ => {}
                        }
                    }
                    let end = end
                        .ok_or_else(|| EvalError::MalformedExpression(text.to_string()))?;
                    let expr = &after[..end];
                    let value = self.resolve_expr(expr).await?;
                    out.push_str(&value);
                    rest = &after[end + 1..];
                }
            }
        }
        Ok(out)
    }

    async fn resolve_expr(&self, expr: &str) -> Result<String, EvalError> {
        let expr = expr.trim();
        if let Some(field) = expr.strip_prefix("request.") {
            return self
                .request
                .field(field)
                .ok_or_else(|| EvalError::ReferenceUnresolved(expr.to_string()));
        }

        let (kind_part, rest) = expr
            .split_once('.')
            .ok_or_else(|| EvalError::MalformedExpression(expr.to_string()))?;
        let kind = parse_kind(kind_part)?;
        let (field, action_id) = parse_field_call(rest)?;
        let record = self
            .store
            .get(self.request_id, kind, &action_id)
            .await
            .ok_or_else(|| EvalError::ReferenceUnresolved(expr.to_string()))?;
        let value = record
            .payload
            .field(&field)
            .ok_or_else(|| EvalError::ReferenceUnresolved(expr.to_string()))?;
        Ok(value_to_string(&value))
    }

    /// Recursively resolves `@(...)` references inside every string leaf of a JSON
    /// value, leaving numbers/bools/null untouched (§4.3's `APIResponse` `properties`
    /// and `data`, which "typically contain `@(...)` references to other results").
    pub fn resolve_value<'f>(
        &'f self,
        value: &'f Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, EvalError>> + Send + 'f>>
    {
        Box::pin(async move {
            match value {
                Value::String(s) => Ok(Value::String(self.resolve_text(s).await?)),
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_value(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (k, v) in map {
                        out.insert(k.clone(), self.resolve_value(v).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        })
    }

    /// Evaluates a `skipCondition`/`preflightCheck` entry (§4.2, §9): resolves any
    /// `@(...)` references first, then parses `true`/`false` or a binary comparison
    /// `<lhs> <op> <rhs>` with `op` in `{==, !=, <, <=, >, >=}` and operands either
    /// numeric or quoted strings.
    pub async fn evaluate_predicate(&self, raw: &str) -> Result<bool, EvalError> {
        let resolved = self.resolve_text(raw).await?;
        let resolved = resolved.trim();

        if resolved.eq_ignore_ascii_case("true") {
            return Ok(true);
        }
        if resolved.eq_ignore_ascii_case("false") {
            return Ok(false);
        }

        const OPS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];
        for op in OPS {
            if let Some(idx) = resolved.find(op) {
                let lhs = parse_operand(resolved[..idx].trim());
                let rhs = parse_operand(resolved[idx + op.len()..].trim());
                return Ok(compare(&lhs, &rhs, op));
            }
        }
        Err(EvalError::MalformedExpression(raw.to_string()))
    }
}

enum Operand {
    Num(f64),
    Str(String),
}

fn parse_operand(s: &str) -> Operand {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return Operand::Str(s[1..s.len() - 1].to_string());
    }
    match s.parse::<f64>() {
        Ok(n) => Operand::Num(n),
        Err(_) => Operand::Str(s.to_string()),
    }
}

fn compare(lhs: &Operand, rhs: &Operand, op: &str) -> bool {
    if let (Operand::Num(a), Operand::Num(b)) = (lhs, rhs) {
        return match op {
            "==" => a == b,
            "!=" => a != b,
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            _ => false,
        };
    }
    let a = match lhs {
        Operand::Num(n) => n.to_string(),
        Operand::Str(s) => s.clone(),
    };
    let b = match rhs {
        Operand::Num(n) => n.to_string(),
        Operand::Str(s) => s.clone(),
    };
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}
