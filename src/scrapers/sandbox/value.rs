//! Runtime values and the loose type coercions the challenge scripts lean on.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::ast::FunctionDef;

pub type ScopeRef = Rc<RefCell<Scope>>;

/// One function-level variable environment.
#[derive(Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }

    pub fn declare(scope: &ScopeRef, name: &str, value: Value) {
        scope.borrow_mut().vars.insert(name.to_string(), value);
    }

    pub fn has_own(scope: &ScopeRef, name: &str) -> bool {
        scope.borrow().vars.contains_key(name)
    }

    pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            if let Some(v) = s.borrow().vars.get(name) {
                return Some(v.clone());
            }
            current = s.borrow().parent.clone();
        }
        None
    }

    /// Assign to the nearest binding, or create a global one.
    pub fn assign(scope: &ScopeRef, name: &str, value: Value) {
        let mut current = scope.clone();
        loop {
            if current.borrow().vars.contains_key(name) {
                current.borrow_mut().vars.insert(name.to_string(), value);
                return;
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => {
                    current.borrow_mut().vars.insert(name.to_string(), value);
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    /// `document`: writes to `cookie` are collected instead of stored.
    Document,
}

pub struct Object {
    pub kind: ObjectKind,
    pub props: Vec<(String, Value)>,
}

impl Object {
    pub fn plain(props: Vec<(String, Value)>) -> Self {
        Self {
            kind: ObjectKind::Plain,
            props,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.props.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.props.push((key.to_string(), value)),
        }
    }
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: ScopeRef,
}

/// Host functions exposed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    GetElementById,
    CreateElement,
    Reload,
    FromCharCode,
    ParseInt,
    ParseFloat,
    IsNaN,
    Atob,
    Eval,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathPow,
}

pub struct JsRegex {
    pub source: String,
    pub flags: String,
    pub regex: regex::Regex,
}

impl JsRegex {
    pub fn global(&self) -> bool {
        self.flags.contains('g')
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Closure>),
    Native(Native),
    Regex(Rc<JsRegex>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Num(n) => write!(f, "{}", number_to_string(*n)),
            other => write!(f, "<{}>", other.type_of()),
        }
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Regex(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Num(_) | Value::Str(_)
        )
    }

    /// Objects collapse to their string form; there is no `valueOf` override.
    pub fn to_primitive(&self) -> Value {
        if self.is_primitive() {
            self.clone()
        } else {
            Value::Str(self.to_js_string())
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Num(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(_) => string_to_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_js_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) | Value::Native(_) => {
                "function () { [native code] }".to_string()
            }
            Value::Regex(re) => format!("/{}/{}", re.source, re.flags),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (a, b) if a.is_primitive() && b.is_primitive() => {
                if let (Value::Str(x), Value::Str(y)) = (a, b) {
                    x == y
                } else {
                    a.to_number() == b.to_number()
                }
            }
            (a, b) if a.is_primitive() || b.is_primitive() => {
                a.to_primitive().loose_equals(&b.to_primitive())
            }
            (a, b) => a.strict_equals(b),
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            // Rust accepts "inf"/"nan" spellings that JS does not.
            if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                f64::NAN
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
    }
}

/// `Number.prototype.toString()` for radix 10.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

/// `Number.prototype.toFixed(digits)`.
pub fn to_fixed(n: f64, digits: usize) -> String {
    if n.is_nan() || n.abs() >= 1e21 {
        return number_to_string(n);
    }
    format!("{:.*}", digits, n)
}

/// `parseInt(s, radix)`.
pub fn parse_int(s: &str, radix: Option<f64>) -> f64 {
    let mut text = s.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = text.strip_prefix('-') {
        sign = -1.0;
        text = rest;
    } else if let Some(rest) = text.strip_prefix('+') {
        text = rest;
    }

    let mut radix = match radix {
        Some(r) if r.is_finite() && r != 0.0 => Some(r.trunc() as u32),
        _ => None,
    };
    if radix.map_or(false, |r| !(2..=36).contains(&r)) {
        return f64::NAN;
    }
    if (text.starts_with("0x") || text.starts_with("0X")) && matches!(radix, None | Some(16)) {
        radix = Some(16);
        text = &text[2..];
    }
    let radix = radix.unwrap_or(10);

    let mut result = 0.0f64;
    let mut any = false;
    for c in text.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                result = result * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if any {
        sign * result
    } else {
        f64::NAN
    }
}

/// `parseFloat(s)`: the longest numeric prefix.
pub fn parse_float(s: &str) -> f64 {
    let text = s.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if text.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let mut end = 0;
    let mut best = None;
    let bytes: Vec<char> = text.chars().collect();
    while end < bytes.len() {
        end += 1;
        let candidate: String = bytes[..end].iter().collect();
        if candidate.ends_with(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
            break;
        }
        if let Ok(v) = candidate.parse::<f64>() {
            best = Some(v);
        }
    }
    best.unwrap_or(f64::NAN)
}
