//! Isolated evaluator for anti-bot challenge scripts.
//!
//! Scripts run against a fixed stub environment: `document.getElementById`
//! (a regex lookup over the challenge page), `document.createElement`,
//! `document.cookie` writes, and a no-op `location.reload`. There is no
//! network, timer, or filesystem access, and every evaluation is bounded by a
//! wall-clock deadline and a step budget.

mod ast;
mod interp;
mod lexer;
mod parser;
mod value;

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use interp::Interpreter;

/// Default evaluation step budget.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("{0} is not defined")]
    Reference(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("script did not finish within {0:?}")]
    Timeout(Duration),

    #[error("script exceeded {0} evaluation steps")]
    StepLimit(u64),
}

/// What the script can see of the page it came from.
#[derive(Debug, Clone)]
pub struct StubEnv {
    pub hostname: String,
    /// `scheme://host/`, what an anchor's `href` resolves to.
    pub href: String,
    pub body: String,
}

impl StubEnv {
    pub fn new(url: &Url, body: impl Into<String>) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        Self {
            href: format!("{}://{}/", url.scheme(), hostname),
            hostname,
            body: body.into(),
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutput {
    /// Completion value of the script, converted to a string.
    pub value: String,
    /// Every value assigned to `document.cookie`, in order.
    pub cookies: Vec<String>,
    /// `value` properties set on elements looked up by id.
    pub element_values: HashMap<String, String>,
}

impl SandboxOutput {
    pub fn element_value(&self, id: &str) -> Option<&str> {
        self.element_values.get(id).map(|s| s.as_str())
    }
}

/// Runs scripts with a fixed timeout and step budget.
#[derive(Debug, Clone)]
pub struct Sandbox {
    timeout: Duration,
    max_steps: u64,
}

impl Sandbox {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn evaluate(&self, script: &str, env: &StubEnv) -> Result<SandboxOutput, SandboxError> {
        let program = parser::parse_program(script)?;
        let mut interp = Interpreter::new(env, self.timeout, self.max_steps);
        let value = interp.run(&program)?.to_js_string();
        let (cookies, element_values) = interp.finish();
        Ok(SandboxOutput {
            value,
            cookies,
            element_values,
        })
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Evaluate `script` against `env` with the given timeout.
pub fn evaluate(
    script: &str,
    env: &StubEnv,
    timeout: Duration,
) -> Result<SandboxOutput, SandboxError> {
    Sandbox::new(timeout).evaluate(script, env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(body: &str) -> StubEnv {
        StubEnv::new(&Url::parse("https://example.com/page").unwrap(), body)
    }

    fn eval(script: &str) -> String {
        evaluate(script, &env(""), Duration::from_secs(1))
            .unwrap()
            .value
    }

    #[test]
    fn test_jsfuck_coercions() {
        assert_eq!(eval("+[]"), "0");
        assert_eq!(eval("!+[]+!![]"), "2");
        assert_eq!(eval("+((!+[]+!![]+[])+(+!![]))"), "21");
        assert_eq!(eval("[]+[]"), "");
        assert_eq!(eval("!![]"), "true");
    }

    #[test]
    fn test_object_compound_assignment() {
        let script = "var s,t,o,p,b,r,e,a,k,i,n,g,f, xYz={\"abc\":+((!+[]+!![]+[])+(+[]))};\
                      xYz.abc+=+((+!![]+[])+(!+[]+!![]));\
                      xYz.abc*=+(+!![]);\
                      xYz.abc-=1;\
                      a = {}; a.value = +xYz.abc.toFixed(10); a.value";
        // 20 + 12 = 32, *1, -1
        assert_eq!(eval(script), "31");
    }

    #[test]
    fn test_to_fixed_returns_string() {
        assert_eq!(eval("(1/3).toFixed(10)"), "0.3333333333");
    }

    #[test]
    fn test_hostname_via_create_element() {
        let script = "t = document.createElement('div'); t.innerHTML=\"<a href='/'>x</a>\";\
                      t = t.firstChild.href; r = t.match(/https?:\\/\\//)[0];\
                      t = t.substr(r.length); t = t.substr(0, t.length - 1); t";
        assert_eq!(eval(script), "example.com");
    }

    #[test]
    fn test_get_element_by_id_reads_body() {
        let body = r#"<div style="display:none;visibility:hidden;" id="cf-dn-k">+((!+[]+!![]))</div>"#;
        let script = "k = 'cf-dn-k'; a = document.getElementById(k).innerHTML; a";
        let out = evaluate(script, &env(body), Duration::from_secs(1)).unwrap();
        assert_eq!(out.value, "+((!+[]+!![]))");

        let missing = evaluate("document.getElementById('nope')", &env(body), Duration::from_secs(1));
        assert_eq!(missing.unwrap().value, "null");
    }

    #[test]
    fn test_eval_of_element_content() {
        let body = r#"<div id="cf-dn-k">+((!+[]+!![]+!![]))</div>"#;
        let script = "eval(document.getElementById('cf-dn-k').innerHTML) * 2";
        let out = evaluate(script, &env(body), Duration::from_secs(1)).unwrap();
        assert_eq!(out.value, "6");
    }

    #[test]
    fn test_functions_and_closures() {
        assert_eq!(
            eval("function add(a) { return function (b) { return a + b } } add(2)(3)"),
            "5"
        );
        assert_eq!(eval("(function (p) { return p.charCodeAt(1) })('ab')"), "98");
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(eval("String.fromCharCode(104, 105)"), "hi");
        assert_eq!(eval("'hello'.slice(-3)"), "llo");
        assert_eq!(eval("'hello'.charAt(1) + 'hello'.length"), "e5");
        assert_eq!(eval("parseInt('12px') + 1"), "13");
        assert_eq!(eval("atob('YWJj')"), "abc");
    }

    #[test]
    fn test_cookie_assignment_collected() {
        let script = "document.cookie = 'sucuri_cloudproxy_uuid_1=abc;path=/;max-age=86400'; location.reload();";
        let out = evaluate(script, &env(""), Duration::from_secs(1)).unwrap();
        assert_eq!(
            out.cookies,
            vec!["sucuri_cloudproxy_uuid_1=abc;path=/;max-age=86400".to_string()]
        );
        assert_eq!(out.value, "undefined");
    }

    #[test]
    fn test_element_value_recorded() {
        let body = r#"<input type="hidden" id="jschl-answer" name="jschl_answer"/>"#;
        let script = "a = document.getElementById('jschl-answer'); a.value = (1.5).toFixed(2); '; 121'";
        let out = evaluate(script, &env(body), Duration::from_secs(1)).unwrap();
        assert_eq!(out.value, "; 121");
        assert_eq!(out.element_value("jschl-answer"), Some("1.50"));
    }

    #[test]
    fn test_undefined_variable_is_reference_error() {
        let err = evaluate("missing + 1", &env(""), Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, SandboxError::Reference("missing".to_string()));
    }

    #[test]
    fn test_runaway_recursion_is_bounded() {
        let script = "function f(n) { return f(n + 1) } f(0)";
        assert!(evaluate(script, &env(""), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_step_budget() {
        let script = "var x = 0; x++; x++; x++; x++; x++;";
        let err = Sandbox::new(Duration::from_secs(1))
            .with_max_steps(5)
            .evaluate(script, &env(""))
            .unwrap_err();
        assert_eq!(err, SandboxError::StepLimit(5));
    }
}
