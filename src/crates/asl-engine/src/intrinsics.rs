//! The Intrinsic Evaluator (C2, §4.2): the named functions callable from inside a
//! `.$`-suffixed template string, conventionally written `States.Name(arg, …)`.
//!
//! Call strings are parsed with a small hand-written recursive-descent parser —
//! operator-free, just names, dots, quotes, commas, and nested calls — and dispatched
//! through a static name→function table. There is no runtime reflection here.

use crate::error::{AslError, Result};
use crate::path::{select, Path};
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::str::Chars;

/// Parse and evaluate an intrinsic call string (with or without the conventional
/// `States.` prefix) against a document and execution context.
pub fn evaluate(expr: &str, doc: &Value, ctx: &Value) -> Result<Value> {
    let mut parser = Parser::new(expr);
    let call = parser.parse_call()?;
    parser.expect_end()?;
    apply(&call, doc, ctx)
}

#[derive(Debug, Clone)]
enum Arg {
    Literal(Value),
    Path(String),
    Call(Call),
}

#[derive(Debug, Clone)]
struct Call {
    name: String,
    args: Vec<Arg>,
}

struct Parser<'a> {
    chars: std::iter::Peekable<Chars<'a>>,
    source: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), source, pos: 0 }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if let Some(c) = c {
            self.pos += c.len_utf8();
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn fail(&self, msg: impl Into<String>) -> AslError {
        AslError::IntrinsicFailure(format!("{} (in '{}')", msg.into(), self.source))
    }

    fn parse_call(&mut self) -> Result<Call> {
        self.skip_ws();
        let mut name = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '.' || *c == '_') {
            name.push(self.bump().unwrap());
        }
        if name.is_empty() {
            return Err(self.fail("expected a function name"));
        }
        let name = name.strip_prefix("States.").map(str::to_string).unwrap_or(name);

        self.skip_ws();
        if self.bump() != Some('(') {
            return Err(self.fail("expected '(' after function name"));
        }

        let mut args = Vec::new();
        self.skip_ws();
        if self.chars.peek() != Some(&')') {
            loop {
                args.push(self.parse_arg()?);
                self.skip_ws();
                match self.chars.peek() {
                    Some(',') => {
                        self.bump();
                        self.skip_ws();
                    }
                    Some(')') => break,
                    _ => return Err(self.fail("expected ',' or ')'")),
                }
            }
        }
        if self.bump() != Some(')') {
            return Err(self.fail("expected ')'"));
        }

        Ok(Call { name, args })
    }

    fn parse_arg(&mut self) -> Result<Arg> {
        self.skip_ws();
        match self.chars.peek() {
            Some('\'') | Some('"') => self.parse_string_literal().map(|s| Arg::Literal(json!(s))),
            Some('$') => self.parse_path(),
            Some(c) if c.is_ascii_digit() || *c == '-' => self.parse_number(),
            _ => self.parse_keyword_or_call(),
        }
    }

    fn parse_string_literal(&mut self) -> Result<String> {
        let quote = self.bump().unwrap();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some(c) => out.push(c),
                None => return Err(self.fail("unterminated string literal")),
            }
        }
        Ok(out)
    }

    fn parse_path(&mut self) -> Result<Arg> {
        let mut out = String::new();
        out.push(self.bump().unwrap()); // first '$'
        if self.chars.peek() == Some(&'$') {
            out.push(self.bump().unwrap());
        }
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '.' || *c == '_' || *c == '[' || *c == ']' || *c == '*') {
            out.push(self.bump().unwrap());
        }
        Ok(Arg::Path(out))
    }

    fn parse_number(&mut self) -> Result<Arg> {
        let mut out = String::new();
        if self.chars.peek() == Some(&'-') {
            out.push(self.bump().unwrap());
        }
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            out.push(self.bump().unwrap());
        }
        let num: f64 = out.parse().map_err(|_| self.fail(format!("invalid number literal '{out}'")))?;
        Ok(Arg::Literal(json!(num)))
    }

    fn parse_keyword_or_call(&mut self) -> Result<Arg> {
        let start = self.pos;
        let mut ident = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '.' || *c == '_') {
            ident.push(self.bump().unwrap());
        }
        if ident.is_empty() {
            return Err(self.fail("expected an argument"));
        }

        self.skip_ws();
        if self.chars.peek() == Some(&'(') {
            // Backtrack and reparse as a nested call.
            let rest_start = start;
            let remainder = &self.source[rest_start..];
            let mut nested = Parser::new(remainder);
            let call = nested.parse_call()?;
            for _ in 0..nested.pos {
                self.bump();
            }
            return Ok(Arg::Call(call));
        }

        match ident.as_str() {
            "true" => Ok(Arg::Literal(json!(true))),
            "false" => Ok(Arg::Literal(json!(false))),
            "null" => Ok(Arg::Literal(Value::Null)),
            other => Err(self.fail(format!("unrecognized argument '{other}'"))),
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        self.skip_ws();
        if self.chars.peek().is_some() {
            return Err(self.fail("unexpected trailing input"));
        }
        Ok(())
    }
}

fn eval_arg(arg: &Arg, doc: &Value, ctx: &Value) -> Result<Value> {
    match arg {
        Arg::Literal(v) => Ok(v.clone()),
        Arg::Path(expr) => {
            let path = Path::parse(expr)?;
            let root = if path.is_context { ctx } else { doc };
            select(root, &path).cloned().ok_or_else(|| AslError::parameter_path_failure(expr.clone()))
        }
        Arg::Call(call) => apply(call, doc, ctx),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn as_array<'a>(value: &'a Value, ctx_name: &str) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| AslError::IntrinsicFailure(format!("{ctx_name}: expected an array")))
}

fn as_number(value: &Value, ctx_name: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| AslError::IntrinsicFailure(format!("{ctx_name}: expected a number")))
}

fn as_object<'a>(value: &'a Value, ctx_name: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| AslError::IntrinsicFailure(format!("{ctx_name}: expected an object")))
}

fn apply(call: &Call, doc: &Value, ctx: &Value) -> Result<Value> {
    let args: Result<Vec<Value>> = call.args.iter().map(|a| eval_arg(a, doc, ctx)).collect();
    let args = args?;

    match call.name.as_str() {
        "Format" => {
            let (fmt, rest) = args.split_first().ok_or_else(|| AslError::IntrinsicFailure("Format: requires a format string".into()))?;
            let fmt = fmt.as_str().ok_or_else(|| AslError::IntrinsicFailure("Format: first argument must be a string".into()))?;
            let mut out = String::new();
            let mut rest_iter = rest.iter();
            let mut chars = fmt.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '{' && chars.peek() == Some(&'}') {
                    chars.next();
                    let value = rest_iter.next().ok_or_else(|| AslError::IntrinsicFailure("Format: not enough arguments for placeholders".into()))?;
                    out.push_str(&stringify(value));
                } else {
                    out.push(c);
                }
            }
            Ok(json!(out))
        }
        "StringToJson" => {
            let s = args.first().and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("StringToJson: requires a string".into()))?;
            serde_json::from_str(s).map_err(|e| AslError::IntrinsicFailure(format!("StringToJson: {e}")))
        }
        "JsonToString" => {
            let v = args.first().ok_or_else(|| AslError::IntrinsicFailure("JsonToString: requires a value".into()))?;
            Ok(json!(serde_json::to_string(v).map_err(|e| AslError::IntrinsicFailure(e.to_string()))?))
        }
        "Array" => Ok(Value::Array(args)),
        "ArrayLength" => {
            let array = as_array(args.first().unwrap_or(&Value::Null), "ArrayLength")?;
            Ok(json!(array.len()))
        }
        "ArrayPartition" => {
            let array = as_array(args.first().ok_or_else(|| AslError::IntrinsicFailure("ArrayPartition: requires an array".into()))?, "ArrayPartition")?;
            let size = as_number(args.get(1).ok_or_else(|| AslError::IntrinsicFailure("ArrayPartition: requires a chunk size".into()))?, "ArrayPartition")? as usize;
            if size == 0 {
                return Err(AslError::IntrinsicFailure("ArrayPartition: chunk size must be positive".into()));
            }
            let chunks: Vec<Value> = array.chunks(size).map(|chunk| Value::Array(chunk.to_vec())).collect();
            Ok(Value::Array(chunks))
        }
        "ArrayContains" => {
            let array = as_array(args.first().ok_or_else(|| AslError::IntrinsicFailure("ArrayContains: requires an array".into()))?, "ArrayContains")?;
            let needle = args.get(1).ok_or_else(|| AslError::IntrinsicFailure("ArrayContains: requires a value".into()))?;
            Ok(json!(array.contains(needle)))
        }
        "ArrayUnique" => {
            let array = as_array(args.first().ok_or_else(|| AslError::IntrinsicFailure("ArrayUnique: requires an array".into()))?, "ArrayUnique")?;
            let mut out: Vec<Value> = Vec::new();
            for item in array {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        "ArrayConcat" => {
            let mut out = Vec::new();
            for arg in &args {
                out.extend(as_array(arg, "ArrayConcat")?.clone());
            }
            Ok(Value::Array(out))
        }
        "MathAdd" => {
            let mut sum = 0.0;
            for arg in &args {
                sum += as_number(arg, "MathAdd")?;
            }
            Ok(json!(sum))
        }
        "MathSubtract" => {
            let x = as_number(args.first().ok_or_else(|| AslError::IntrinsicFailure("MathSubtract: requires two numbers".into()))?, "MathSubtract")?;
            let y = as_number(args.get(1).ok_or_else(|| AslError::IntrinsicFailure("MathSubtract: requires two numbers".into()))?, "MathSubtract")?;
            Ok(json!(x - y))
        }
        "MathMultiply" => {
            let x = as_number(args.first().ok_or_else(|| AslError::IntrinsicFailure("MathMultiply: requires two numbers".into()))?, "MathMultiply")?;
            let y = as_number(args.get(1).ok_or_else(|| AslError::IntrinsicFailure("MathMultiply: requires two numbers".into()))?, "MathMultiply")?;
            Ok(json!(x * y))
        }
        "MathRandom" => Ok(json!(rand::random::<f64>())),
        "Hash" => {
            let s = args.first().and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("Hash: requires a string".into()))?;
            let algo = args.get(1).and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("Hash: requires an algorithm name".into()))?;
            Ok(json!(hash_hex(s, algo)?))
        }
        "Base64Encode" => {
            let s = args.first().and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("Base64Encode: requires a string".into()))?;
            Ok(json!(base64::engine::general_purpose::STANDARD.encode(s)))
        }
        "Base64Decode" => {
            let s = args.first().and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("Base64Decode: requires a string".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| AslError::IntrinsicFailure(format!("Base64Decode: {e}")))?;
            let decoded = String::from_utf8(bytes).map_err(|e| AslError::IntrinsicFailure(format!("Base64Decode: {e}")))?;
            Ok(json!(decoded))
        }
        "UUID" => Ok(json!(uuid::Uuid::new_v4().to_string())),
        "Merge" => {
            let mut out = Map::new();
            for arg in &args {
                for (k, v) in as_object(arg, "Merge")? {
                    out.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Object(out))
        }
        "Pick" => {
            let obj = as_object(args.first().ok_or_else(|| AslError::IntrinsicFailure("Pick: requires an object".into()))?, "Pick")?;
            let mut out = Map::new();
            for key in args.iter().skip(1) {
                let key = key.as_str().ok_or_else(|| AslError::IntrinsicFailure("Pick: key arguments must be strings".into()))?;
                if let Some(v) = obj.get(key) {
                    out.insert(key.to_string(), v.clone());
                }
            }
            Ok(Value::Object(out))
        }
        "Omit" => {
            let obj = as_object(args.first().ok_or_else(|| AslError::IntrinsicFailure("Omit: requires an object".into()))?, "Omit")?;
            let drop: Vec<&str> = args.iter().skip(1).filter_map(Value::as_str).collect();
            let mut out = Map::new();
            for (k, v) in obj {
                if !drop.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Object(out))
        }
        "TokenCount" => {
            let s = args.first().and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("TokenCount: requires a string".into()))?;
            let count = s.split_whitespace().count().max(1);
            Ok(json!(count))
        }
        "Truncate" => {
            let s = args.first().and_then(Value::as_str).ok_or_else(|| AslError::IntrinsicFailure("Truncate: requires a string".into()))?;
            let limit = as_number(args.get(1).ok_or_else(|| AslError::IntrinsicFailure("Truncate: requires a word limit".into()))?, "Truncate")? as usize;
            let words: Vec<&str> = s.split_whitespace().collect();
            if words.len() <= limit {
                Ok(json!(s))
            } else {
                Ok(json!(format!("{}...", words[..limit].join(" "))))
            }
        }
        "CurrentCost" => {
            let cost = ctx.get("Execution").and_then(|e| e.get("Cost")).cloned().unwrap_or(json!(0.0));
            Ok(cost)
        }
        "CurrentTokens" => {
            let tokens = ctx.get("Execution").and_then(|e| e.get("TokensUsed")).cloned().unwrap_or(json!(0));
            Ok(tokens)
        }
        other => Err(AslError::IntrinsicFailure(format!("unknown intrinsic function '{other}'"))),
    }
}

fn hash_hex(input: &str, algo: &str) -> Result<String> {
    use sha2::Digest;
    match algo {
        "sha256" => {
            let digest = sha2::Sha256::digest(input.as_bytes());
            Ok(hex::encode(digest))
        }
        "sha1" => {
            use sha1::Sha1;
            let digest = Sha1::digest(input.as_bytes());
            Ok(hex::encode(digest))
        }
        "md5" => {
            let digest = md5::Md5::digest(input.as_bytes());
            Ok(hex::encode(digest))
        }
        other => Err(AslError::IntrinsicFailure(format!("Hash: unsupported algorithm '{other}'"))),
    }
}
