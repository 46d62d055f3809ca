//! Tree-walking evaluator with a wall-clock deadline and a step budget.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::Engine;
use regex::Regex;

use super::ast::{BinOp, Expr, FunctionDef, Stmt, UnaryOp};
use super::parser::parse_program;
use super::value::{
    number_to_string, parse_float, parse_int, to_fixed, Closure, JsRegex, Native, Object,
    ObjectKind, Scope, ScopeRef, Value,
};
use super::{SandboxError, StubEnv};

const MAX_CALL_DEPTH: usize = 64;

enum Flow {
    /// Completion value of the statement, if it produced one.
    Normal(Option<Value>),
    Return(Value),
}

pub struct Interpreter<'a> {
    env: &'a StubEnv,
    timeout: Duration,
    deadline: Instant,
    max_steps: u64,
    steps: u64,
    depth: usize,
    cookies: Vec<String>,
    elements: HashMap<String, Value>,
    globals: ScopeRef,
}

impl<'a> Interpreter<'a> {
    pub fn new(env: &'a StubEnv, timeout: Duration, max_steps: u64) -> Self {
        let globals = Scope::root();
        let interp = Self {
            env,
            timeout,
            deadline: Instant::now() + timeout,
            max_steps,
            steps: 0,
            depth: 0,
            cookies: Vec::new(),
            elements: HashMap::new(),
            globals,
        };
        interp.install_globals();
        interp
    }

    fn install_globals(&self) {
        let native = |n| Value::Native(n);
        let document = Object {
            kind: ObjectKind::Document,
            props: vec![
                ("getElementById".into(), native(Native::GetElementById)),
                ("createElement".into(), native(Native::CreateElement)),
            ],
        };
        let location = Object::plain(vec![
            ("reload".into(), native(Native::Reload)),
            ("href".into(), Value::Str(self.env.href.clone())),
            ("hostname".into(), Value::Str(self.env.hostname.clone())),
            ("hash".into(), Value::Str(String::new())),
        ]);
        let string = Object::plain(vec![("fromCharCode".into(), native(Native::FromCharCode))]);
        let math = Object::plain(vec![
            ("floor".into(), native(Native::MathFloor)),
            ("ceil".into(), native(Native::MathCeil)),
            ("round".into(), native(Native::MathRound)),
            ("abs".into(), native(Native::MathAbs)),
            ("pow".into(), native(Native::MathPow)),
        ]);

        let g = &self.globals;
        Scope::declare(g, "document", Value::object(document));
        Scope::declare(g, "location", Value::object(location));
        Scope::declare(g, "window", Value::object(Object::plain(Vec::new())));
        Scope::declare(g, "String", Value::object(string));
        Scope::declare(g, "Math", Value::object(math));
        Scope::declare(g, "parseInt", native(Native::ParseInt));
        Scope::declare(g, "parseFloat", native(Native::ParseFloat));
        Scope::declare(g, "isNaN", native(Native::IsNaN));
        Scope::declare(g, "atob", native(Native::Atob));
        Scope::declare(g, "eval", native(Native::Eval));
        Scope::declare(g, "undefined", Value::Undefined);
        Scope::declare(g, "NaN", Value::Num(f64::NAN));
        Scope::declare(g, "Infinity", Value::Num(f64::INFINITY));
    }

    /// Run a whole program and return its completion value.
    pub fn run(&mut self, program: &[Stmt]) -> Result<Value, SandboxError> {
        let globals = self.globals.clone();
        self.run_in(program, &globals)
    }

    /// Cookies written by the script, and the `value` assigned to each
    /// element fetched through `getElementById`.
    pub fn finish(self) -> (Vec<String>, HashMap<String, String>) {
        let values = self
            .elements
            .iter()
            .filter_map(|(id, element)| match element {
                Value::Object(obj) => obj
                    .borrow()
                    .get("value")
                    .map(|v| (id.clone(), v.to_js_string())),
                _ => None,
            })
            .collect();
        (self.cookies, values)
    }

    fn run_in(&mut self, program: &[Stmt], scope: &ScopeRef) -> Result<Value, SandboxError> {
        self.hoist(program, scope);
        let mut completion = Value::Undefined;
        for stmt in program {
            match self.exec(stmt, scope)? {
                Flow::Normal(Some(v)) => completion = v,
                Flow::Normal(None) => {}
                Flow::Return(v) => return Ok(v),
            }
        }
        Ok(completion)
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(SandboxError::StepLimit(self.max_steps));
        }
        if self.steps % 256 == 0 && Instant::now() >= self.deadline {
            return Err(SandboxError::Timeout(self.timeout));
        }
        Ok(())
    }

    fn hoist(&self, body: &[Stmt], scope: &ScopeRef) {
        for stmt in body {
            match stmt {
                Stmt::Function(name, def) => {
                    let closure = Value::Function(Rc::new(Closure {
                        def: def.clone(),
                        env: scope.clone(),
                    }));
                    Scope::declare(scope, name, closure);
                }
                Stmt::Var(decls) => {
                    for (name, _) in decls {
                        if !Scope::has_own(scope, name) {
                            Scope::declare(scope, name, Value::Undefined);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn exec(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Flow, SandboxError> {
        self.tick()?;
        match stmt {
            Stmt::Empty | Stmt::Function(..) => Ok(Flow::Normal(None)),
            Stmt::Var(decls) => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        let value = self.eval(init, scope)?;
                        Scope::declare(scope, name, value);
                    } else if !Scope::has_own(scope, name) {
                        Scope::declare(scope, name, Value::Undefined);
                    }
                }
                Ok(Flow::Normal(None))
            }
            Stmt::Expr(expr) => Ok(Flow::Normal(Some(self.eval(expr, scope)?))),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If(test, then, otherwise) => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal(None))
                }
            }
            Stmt::Block(body) => {
                self.hoist(body, scope);
                let mut completion = None;
                for stmt in body {
                    match self.exec(stmt, scope)? {
                        Flow::Normal(Some(v)) => completion = Some(v),
                        Flow::Normal(None) => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal(completion))
            }
        }
    }

    fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, SandboxError> {
        self.tick()?;
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Regex { pattern, flags } => compile_regex(pattern, flags).map(Value::Regex),
            Expr::Ident(name) => {
                if name == "this" {
                    return Ok(Value::Undefined);
                }
                Scope::lookup(scope, name).ok_or_else(|| SandboxError::Reference(name.clone()))
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::array(values))
            }
            Expr::Object(props) => {
                let mut object = Object::plain(Vec::with_capacity(props.len()));
                for (key, value) in props {
                    let value = self.eval(value, scope)?;
                    object.set(key, value);
                }
                Ok(Value::object(object))
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure {
                def: def.clone(),
                env: scope.clone(),
            }))),
            Expr::Member(object, key) => {
                let object = self.eval(object, scope)?;
                let key = self.eval(key, scope)?.to_js_string();
                self.get_member(&object, &key)
            }
            Expr::Call(callee, args) => {
                if let Expr::Member(object, key) = callee.as_ref() {
                    let receiver = self.eval(object, scope)?;
                    let key = self.eval(key, scope)?.to_js_string();
                    let args = self.eval_args(args, scope)?;
                    self.call_method(&receiver, &key, args, scope)
                } else {
                    let function = self.eval(callee, scope)?;
                    let args = self.eval_args(args, scope)?;
                    self.call(&function, args, scope)
                }
            }
            Expr::Unary(UnaryOp::Typeof, operand) => {
                if let Expr::Ident(name) = operand.as_ref() {
                    if Scope::lookup(scope, name).is_none() {
                        return Ok(Value::Str("undefined".into()));
                    }
                }
                let value = self.eval(operand, scope)?;
                Ok(Value::Str(value.type_of().into()))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Plus => Value::Num(value.to_number()),
                    UnaryOp::Minus => Value::Num(-value.to_number()),
                    UnaryOp::Typeof => Value::Str(value.type_of().into()),
                })
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::And(left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    self.eval(right, scope)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional(test, then, otherwise) => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign(op, target, value) => self.assign(*op, target, value, scope),
            Expr::Update {
                prefix,
                delta,
                target,
            } => {
                let reference = self.reference(target, scope)?;
                let old = self.read(&reference, scope)?.to_number();
                let new = old + delta;
                self.write(&reference, Value::Num(new), scope)?;
                Ok(Value::Num(if *prefix { new } else { old }))
            }
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &ScopeRef) -> Result<Vec<Value>, SandboxError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        Ok(values)
    }

    fn assign(
        &mut self,
        op: Option<BinOp>,
        target: &Expr,
        value: &Expr,
        scope: &ScopeRef,
    ) -> Result<Value, SandboxError> {
        let reference = self.reference(target, scope)?;
        let new = match op {
            Some(op) => {
                let current = self.read(&reference, scope)?;
                let rhs = self.eval(value, scope)?;
                binary(op, &current, &rhs)
            }
            None => self.eval(value, scope)?,
        };
        self.write(&reference, new.clone(), scope)?;
        Ok(new)
    }

    fn reference(&mut self, target: &Expr, scope: &ScopeRef) -> Result<Reference, SandboxError> {
        match target {
            Expr::Ident(name) => Ok(Reference::Binding(name.clone())),
            Expr::Member(object, key) => {
                let object = self.eval(object, scope)?;
                let key = self.eval(key, scope)?.to_js_string();
                Ok(Reference::Property(object, key))
            }
            _ => Err(SandboxError::Syntax {
                pos: 0,
                message: "invalid assignment target".to_string(),
            }),
        }
    }

    fn read(&mut self, reference: &Reference, scope: &ScopeRef) -> Result<Value, SandboxError> {
        match reference {
            Reference::Binding(name) => {
                Scope::lookup(scope, name).ok_or_else(|| SandboxError::Reference(name.clone()))
            }
            Reference::Property(object, key) => self.get_member(object, key),
        }
    }

    fn write(
        &mut self,
        reference: &Reference,
        value: Value,
        scope: &ScopeRef,
    ) -> Result<(), SandboxError> {
        match reference {
            Reference::Binding(name) => {
                Scope::assign(scope, name, value);
                Ok(())
            }
            Reference::Property(object, key) => self.set_member(object, key, value),
        }
    }

    fn get_member(&mut self, object: &Value, key: &str) -> Result<Value, SandboxError> {
        match object {
            Value::Undefined | Value::Null => Err(SandboxError::Type(format!(
                "cannot read property '{}' of {}",
                key,
                object.to_js_string()
            ))),
            Value::Str(s) => Ok(match key {
                "length" => Value::Num(s.chars().count() as f64),
                _ => match array_index(key) {
                    Some(i) => s
                        .chars()
                        .nth(i)
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or(Value::Undefined),
                    None => Value::Undefined,
                },
            }),
            Value::Array(items) => {
                let items = items.borrow();
                Ok(match key {
                    "length" => Value::Num(items.len() as f64),
                    _ => array_index(key)
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Undefined),
                })
            }
            Value::Object(obj) => {
                let obj = obj.borrow();
                if obj.kind == ObjectKind::Document && key == "cookie" {
                    return Ok(Value::Str(self.cookies.join("; ")));
                }
                Ok(obj.get(key).unwrap_or(Value::Undefined))
            }
            Value::Regex(re) => Ok(match key {
                "source" => Value::Str(re.source.clone()),
                "global" => Value::Bool(re.global()),
                _ => Value::Undefined,
            }),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_member(&mut self, object: &Value, key: &str, value: Value) -> Result<(), SandboxError> {
        match object {
            Value::Undefined | Value::Null => Err(SandboxError::Type(format!(
                "cannot set property '{}' of {}",
                key,
                object.to_js_string()
            ))),
            Value::Object(obj) => {
                let mut obj = obj.borrow_mut();
                if obj.kind == ObjectKind::Document && key == "cookie" {
                    self.cookies.push(value.to_js_string());
                } else {
                    obj.set(key, value);
                }
                Ok(())
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len >= 0.0 && len.is_finite() {
                        items.resize(len as usize, Value::Undefined);
                    }
                } else if let Some(i) = array_index(key) {
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[i] = value;
                }
                Ok(())
            }
            // Writes to primitives are silently dropped in sloppy mode.
            _ => Ok(()),
        }
    }

    fn call(
        &mut self,
        function: &Value,
        args: Vec<Value>,
        scope: &ScopeRef,
    ) -> Result<Value, SandboxError> {
        match function {
            Value::Function(closure) => self.call_closure(closure.clone(), args),
            Value::Native(native) => self.call_native(*native, args, scope),
            other => Err(SandboxError::Type(format!(
                "{} is not a function",
                other.to_js_string()
            ))),
        }
    }

    fn call_closure(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, SandboxError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(SandboxError::Type("maximum call stack size exceeded".into()));
        }
        let def: &FunctionDef = &closure.def;
        let scope = Scope::child(&closure.env);
        let mut args = args.into_iter();
        for param in &def.params {
            Scope::declare(&scope, param, args.next().unwrap_or(Value::Undefined));
        }

        self.depth += 1;
        let result = self.run_function_body(&def.body, &scope);
        self.depth -= 1;
        result
    }

    fn run_function_body(&mut self, body: &[Stmt], scope: &ScopeRef) -> Result<Value, SandboxError> {
        self.hoist(body, scope);
        for stmt in body {
            if let Flow::Return(v) = self.exec(stmt, scope)? {
                return Ok(v);
            }
        }
        Ok(Value::Undefined)
    }

    fn call_method(
        &mut self,
        receiver: &Value,
        key: &str,
        args: Vec<Value>,
        scope: &ScopeRef,
    ) -> Result<Value, SandboxError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        match receiver {
            Value::Object(_) => {
                let function = self.get_member(receiver, key)?;
                self.call(&function, args, scope)
            }
            Value::Str(s) => string_method(s, key, &args),
            Value::Num(n) => match key {
                "toFixed" => {
                    let digits = arg(0).to_number();
                    let digits = if digits.is_nan() { 0.0 } else { digits };
                    if !(0.0..=100.0).contains(&digits) {
                        return Err(SandboxError::Type("toFixed() digits out of range".into()));
                    }
                    Ok(Value::Str(to_fixed(*n, digits as usize)))
                }
                "toString" => match arg(0) {
                    Value::Undefined => Ok(Value::Str(number_to_string(*n))),
                    radix => Ok(Value::Str(integer_to_radix(*n, radix.to_number() as u32)?)),
                },
                "valueOf" => Ok(Value::Num(*n)),
                _ => Err(not_a_function(key)),
            },
            Value::Bool(b) => match key {
                "toString" => Ok(Value::Str(b.to_string())),
                "valueOf" => Ok(Value::Bool(*b)),
                _ => Err(not_a_function(key)),
            },
            Value::Array(items) => match key {
                "join" => {
                    let sep = match arg(0) {
                        Value::Undefined => ",".to_string(),
                        other => other.to_js_string(),
                    };
                    let joined = items
                        .borrow()
                        .iter()
                        .map(|v| match v {
                            Value::Undefined | Value::Null => String::new(),
                            other => other.to_js_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(&sep);
                    Ok(Value::Str(joined))
                }
                "push" => {
                    let mut items = items.borrow_mut();
                    items.extend(args);
                    Ok(Value::Num(items.len() as f64))
                }
                "indexOf" => {
                    let needle = arg(0);
                    let position = items.borrow().iter().position(|v| v.strict_equals(&needle));
                    Ok(Value::Num(position.map(|p| p as f64).unwrap_or(-1.0)))
                }
                "toString" => Ok(Value::Str(receiver.to_js_string())),
                _ => Err(not_a_function(key)),
            },
            Value::Regex(re) => match key {
                "test" => Ok(Value::Bool(re.regex.is_match(&arg(0).to_js_string()))),
                "toString" => Ok(Value::Str(receiver.to_js_string())),
                _ => Err(not_a_function(key)),
            },
            Value::Function(_) | Value::Native(_) => match key {
                "call" => {
                    let rest = args.into_iter().skip(1).collect();
                    self.call(receiver, rest, scope)
                }
                _ => Err(not_a_function(key)),
            },
            Value::Undefined | Value::Null => Err(SandboxError::Type(format!(
                "cannot read property '{}' of {}",
                key,
                receiver.to_js_string()
            ))),
        }
    }

    fn call_native(
        &mut self,
        native: Native,
        args: Vec<Value>,
        scope: &ScopeRef,
    ) -> Result<Value, SandboxError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let num = |i: usize| arg(i).to_number();
        match native {
            Native::GetElementById => Ok(self.element_by_id(&arg(0).to_js_string())),
            Native::CreateElement => {
                let anchor = Object::plain(vec![("href".into(), Value::Str(self.env.href.clone()))]);
                Ok(Value::object(Object::plain(vec![
                    ("innerHTML".into(), Value::Str(String::new())),
                    ("firstChild".into(), Value::object(anchor)),
                ])))
            }
            Native::Reload => Ok(Value::Undefined),
            Native::FromCharCode => {
                let text = args
                    .iter()
                    .map(|v| {
                        let code = v.to_number();
                        let code = if code.is_finite() { code as i64 as u32 & 0xffff } else { 0 };
                        char::from_u32(code).unwrap_or('\u{fffd}')
                    })
                    .collect();
                Ok(Value::Str(text))
            }
            Native::ParseInt => {
                let radix = match arg(1) {
                    Value::Undefined => None,
                    other => Some(other.to_number()),
                };
                Ok(Value::Num(parse_int(&arg(0).to_js_string(), radix)))
            }
            Native::ParseFloat => Ok(Value::Num(parse_float(&arg(0).to_js_string()))),
            Native::IsNaN => Ok(Value::Bool(num(0).is_nan())),
            Native::Atob => {
                let encoded: String = arg(0)
                    .to_js_string()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .or_else(|_| {
                        base64::engine::general_purpose::STANDARD_NO_PAD
                            .decode(encoded.trim_end_matches('=').as_bytes())
                    })
                    .map_err(|_| SandboxError::Type("atob: invalid base64".into()))?;
                // atob yields a binary string: one char per byte.
                Ok(Value::Str(bytes.into_iter().map(char::from).collect()))
            }
            Native::Eval => match arg(0) {
                Value::Str(source) => {
                    let program = parse_program(&source)?;
                    self.run_in(&program, scope)
                }
                other => Ok(other),
            },
            Native::MathFloor => Ok(Value::Num(num(0).floor())),
            Native::MathCeil => Ok(Value::Num(num(0).ceil())),
            Native::MathRound => Ok(Value::Num((num(0) + 0.5).floor())),
            Native::MathAbs => Ok(Value::Num(num(0).abs())),
            Native::MathPow => Ok(Value::Num(num(0).powf(num(1)))),
        }
    }

    /// `document.getElementById`: a regex lookup over the page body.
    fn element_by_id(&mut self, id: &str) -> Value {
        if let Some(element) = self.elements.get(id) {
            return element.clone();
        }
        let pattern = format!(r#" id=['"]?{}[^>]*>([^<]*)"#, regex::escape(id));
        let inner = Regex::new(&pattern)
            .ok()
            .and_then(|re| re.captures(&self.env.body))
            .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()));
        match inner {
            Some(inner) => {
                let element = Value::object(Object::plain(vec![(
                    "innerHTML".into(),
                    Value::Str(inner),
                )]));
                self.elements.insert(id.to_string(), element.clone());
                element
            }
            None => Value::Null,
        }
    }
}

enum Reference {
    Binding(String),
    Property(Value, String),
}

fn not_a_function(key: &str) -> SandboxError {
    SandboxError::Type(format!("{} is not a function", key))
}

fn array_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

fn compile_regex(pattern: &str, flags: &str) -> Result<Rc<JsRegex>, SandboxError> {
    let mut prefix = String::new();
    for (flag, inline) in [('i', "i"), ('m', "m"), ('s', "s")] {
        if flags.contains(flag) {
            prefix.push_str(inline);
        }
    }
    let translated = pattern.replace(r"\/", "/");
    let source = if prefix.is_empty() {
        translated
    } else {
        format!("(?{}){}", prefix, translated)
    };
    let regex = Regex::new(&source)
        .map_err(|_| SandboxError::Unsupported(format!("regex /{}/", pattern)))?;
    Ok(Rc::new(JsRegex {
        source: pattern.to_string(),
        flags: flags.to_string(),
        regex,
    }))
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Value {
    match op {
        BinOp::Add => {
            let (l, r) = (left.to_primitive(), right.to_primitive());
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                Value::Str(l.to_js_string() + &r.to_js_string())
            } else {
                Value::Num(l.to_number() + r.to_number())
            }
        }
        BinOp::Sub => Value::Num(left.to_number() - right.to_number()),
        BinOp::Mul => Value::Num(left.to_number() * right.to_number()),
        BinOp::Div => Value::Num(left.to_number() / right.to_number()),
        BinOp::Rem => Value::Num(left.to_number() % right.to_number()),
        BinOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinOp::Eq => Value::Bool(left.loose_equals(right)),
        BinOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => {
            let (l, r) = (left.to_primitive(), right.to_primitive());
            let ordering = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            let result = match ordering {
                None => false,
                Some(o) => match op {
                    BinOp::Lt => o.is_lt(),
                    BinOp::Gt => o.is_gt(),
                    BinOp::LtEq => o.is_le(),
                    _ => o.is_ge(),
                },
            };
            Value::Bool(result)
        }
    }
}

fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if let Value::Undefined = value {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn clamped_index(value: &Value, len: usize, default: usize) -> usize {
    if let Value::Undefined = value {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() || n < 0.0 {
        0
    } else {
        (n.trunc() as usize).min(len)
    }
}

fn string_method(s: &str, key: &str, args: &[Value]) -> Result<Value, SandboxError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let slice = |from: usize, to: usize| -> Value {
        if from >= to {
            Value::Str(String::new())
        } else {
            Value::Str(chars[from..to].iter().collect())
        }
    };

    match key {
        "charCodeAt" => {
            let i = clamped_index(&arg(0), usize::MAX, 0);
            Ok(Value::Num(
                chars.get(i).map(|c| *c as u32 as f64).unwrap_or(f64::NAN),
            ))
        }
        "charAt" => {
            let i = clamped_index(&arg(0), usize::MAX, 0);
            Ok(Value::Str(chars.get(i).map(|c| c.to_string()).unwrap_or_default()))
        }
        "substr" => {
            let start = relative_index(&arg(0), len, 0);
            let count = match arg(1) {
                Value::Undefined => len - start,
                other => {
                    let n = other.to_number();
                    if n.is_nan() || n <= 0.0 {
                        0
                    } else {
                        (n as usize).min(len - start)
                    }
                }
            };
            Ok(slice(start, start + count))
        }
        "substring" => {
            let a = clamped_index(&arg(0), len, 0);
            let b = clamped_index(&arg(1), len, len);
            Ok(slice(a.min(b), a.max(b)))
        }
        "slice" => {
            let from = relative_index(&arg(0), len, 0);
            let to = relative_index(&arg(1), len, len);
            Ok(slice(from, to))
        }
        "indexOf" => {
            let needle = arg(0).to_js_string();
            let position = s.find(&needle).map(|byte| s[..byte].chars().count() as f64);
            Ok(Value::Num(position.unwrap_or(-1.0)))
        }
        "split" => match arg(0) {
            Value::Undefined => Ok(Value::array(vec![Value::Str(s.to_string())])),
            sep => {
                let sep = sep.to_js_string();
                let parts = if sep.is_empty() {
                    chars.iter().map(|c| Value::Str(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect()
                };
                Ok(Value::array(parts))
            }
        },
        "match" => {
            let re = match arg(0) {
                Value::Regex(re) => re,
                other => compile_regex(&regex::escape(&other.to_js_string()), "")?,
            };
            if re.global() {
                let all: Vec<Value> = re
                    .regex
                    .find_iter(s)
                    .map(|m| Value::Str(m.as_str().to_string()))
                    .collect();
                return Ok(if all.is_empty() {
                    Value::Null
                } else {
                    Value::array(all)
                });
            }
            Ok(match re.regex.captures(s) {
                Some(caps) => Value::array(
                    caps.iter()
                        .map(|m| {
                            m.map(|m| Value::Str(m.as_str().to_string()))
                                .unwrap_or(Value::Undefined)
                        })
                        .collect(),
                ),
                None => Value::Null,
            })
        }
        "replace" => {
            let replacement = arg(1).to_js_string();
            Ok(Value::Str(match arg(0) {
                Value::Regex(re) if re.global() => {
                    re.regex.replace_all(s, replacement.as_str()).into_owned()
                }
                Value::Regex(re) => re.regex.replace(s, replacement.as_str()).into_owned(),
                other => s.replacen(&other.to_js_string(), &replacement, 1),
            }))
        }
        "toLowerCase" => Ok(Value::Str(s.to_lowercase())),
        "toUpperCase" => Ok(Value::Str(s.to_uppercase())),
        "trim" => Ok(Value::Str(s.trim().to_string())),
        "toString" | "valueOf" => Ok(Value::Str(s.to_string())),
        _ => Err(not_a_function(key)),
    }
}

fn integer_to_radix(n: f64, radix: u32) -> Result<String, SandboxError> {
    if !(2..=36).contains(&radix) {
        return Err(SandboxError::Type("toString() radix out of range".into()));
    }
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 {
        return Ok(number_to_string(n));
    }
    let negative = n < 0.0;
    let mut value = n.abs() as u64;
    if value == 0 {
        return Ok("0".into());
    }
    let mut digits = Vec::new();
    while value > 0 {
        let d = (value % radix as u64) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        value /= radix as u64;
    }
    if negative {
        digits.push('-');
    }
    Ok(digits.into_iter().rev().collect())
}
