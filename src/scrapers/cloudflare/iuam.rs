//! Extraction of the JavaScript arithmetic challenge and its form.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Method;
use scraper::{Html, Selector};
use url::Url;

use crate::scrapers::http_client::RequestConfig;

const ANSWER_FIELD: &str = "jschl_answer";

/// Everything needed to answer one challenge page.
#[derive(Debug, Clone, PartialEq)]
pub struct IuamChallenge {
    pub script: String,
    /// How long the page wants the browser to wait before submitting.
    pub delay: Duration,
    pub form: ChallengeForm,
}

/// The page's `challenge-form`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeForm {
    pub action: String,
    pub method: Method,
    pub fields: Vec<(String, String)>,
}

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"setTimeout\(function\(\)\{\s+(var s,t,o,p,b,r,e,a,k,i,n,g,f.+?\r?\n[\s\S]+?a\.value\s*=.+?)\r?\n(?:[^{<>]*\},\s*(\d{4,}))?",
        )
        .expect("valid regex")
    })
}

/// Pull the script, delay and form out of a challenge page.
pub fn extract(body: &str, max_delay: Duration) -> Result<IuamChallenge, String> {
    let caps = script_regex()
        .captures(body)
        .ok_or_else(|| "challenge script not found".to_string())?;
    let script = caps[1].to_string();
    let delay_ms: u64 = caps
        .get(2)
        .ok_or_else(|| "challenge delay not found".to_string())?
        .as_str()
        .parse()
        .map_err(|_| "challenge delay is not a number".to_string())?;

    Ok(IuamChallenge {
        script,
        delay: Duration::from_millis(delay_ms).min(max_delay),
        form: extract_form(body)?,
    })
}

fn extract_form(body: &str) -> Result<ChallengeForm, String> {
    let document = Html::parse_document(body);
    let form_selector = Selector::parse("form#challenge-form").map_err(|e| e.to_string())?;
    let input_selector = Selector::parse("input[name]").map_err(|e| e.to_string())?;

    let form = document
        .select(&form_selector)
        .next()
        .ok_or_else(|| "challenge form not found".to_string())?;
    let action = form
        .value()
        .attr("action")
        .ok_or_else(|| "challenge form has no action".to_string())?
        .to_string();
    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("get") => Method::GET,
        _ => Method::POST,
    };
    let fields = form
        .select(&input_selector)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            (name != ANSWER_FIELD).then(|| {
                (
                    name.to_string(),
                    input.value().attr("value").unwrap_or_default().to_string(),
                )
            })
        })
        .collect();

    Ok(ChallengeForm {
        action,
        method,
        fields,
    })
}

impl ChallengeForm {
    /// Build the request that submits `answer` on behalf of `original`.
    pub fn submission(
        &self,
        page_url: &Url,
        answer: &str,
        original: &RequestConfig,
    ) -> Result<RequestConfig, String> {
        let action = page_url
            .join(&self.action)
            .map_err(|e| format!("bad challenge form action: {}", e))?;
        let mut fields = self.fields.clone();
        fields.push((ANSWER_FIELD.to_string(), answer.to_string()));

        let mut request = if self.method == Method::GET {
            let mut request = RequestConfig::get(action.as_str());
            request.query = fields;
            request
        } else {
            RequestConfig::post_form(action.as_str(), fields)
        };
        request.headers = original.headers.clone();
        request.response_type = original.response_type;
        request.fail_on_status = original.fail_on_status;
        Ok(request.with_header("Referer", page_url.as_str()))
    }
}
