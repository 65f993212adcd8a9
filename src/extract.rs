//! Heuristic extraction of one-time codes and call-to-action links.
//!
//! Both extractors are pure and best-effort: a miss returns `None`, never an
//! error.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A keyword followed, directly or within a short gap of non-digits, by a digit run.
static OTP_CONTEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:code|pin|otp|verification|password|login)[^0-9]{0,20}?([0-9]+)")
        .expect("valid OTP context pattern")
});
static DIGIT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)").expect("valid digit run pattern"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:19|20)[0-9]{2}$").expect("valid year pattern"));

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a\s*>"#)
        .expect("valid anchor pattern")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).expect("valid url pattern"));
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)sign[\s_-]?in|verif(?:y|ication)|reset|confirm|activat(?:e|ion)|log[\s_-]?in|click here|authenticate|authori[sz]e|validate",
    )
    .expect("valid action pattern")
});

/// A call-to-action link found in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLink {
    pub url: String,
    pub label: String,
}

/// Find a one-time passcode in `text`.
///
/// A code introduced by a keyword such as "code" or "verification" wins over
/// a bare digit run. Four-digit candidates that look like years (`19xx`,
/// `20xx`) are skipped in both passes.
///
/// ```
/// use tempmail_client::extract_otp;
///
/// assert_eq!(extract_otp("Your verification code is 483920").as_deref(), Some("483920"));
/// assert_eq!(extract_otp("Valid until 2024"), None);
/// ```
pub fn extract_otp(text: &str) -> Option<String> {
    first_code(&OTP_CONTEXT_RE, text).or_else(|| first_code(&DIGIT_RUN_RE, text))
}

// Captures are whole digit runs, so a run longer than eight digits is never cut down to a code.
fn first_code(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|candidate| (4..=8).contains(&candidate.len()) && !is_year(candidate))
        .map(str::to_string)
}

fn is_year(candidate: &str) -> bool {
    candidate.len() == 4 && YEAR_RE.is_match(candidate)
}

/// Find the link a message wants the reader to click.
///
/// When `html` is supplied, only anchors are considered: the first one whose
/// text or URL mentions signing in, verifying, resetting, confirming,
/// activating and so on. Otherwise the first URL in `text` is taken, provided
/// the subject or body mentions one of those actions.
pub fn extract_action_link(
    text: &str,
    html: Option<&[String]>,
    subject: Option<&str>,
) -> Option<ActionLink> {
    match html.filter(|parts| parts.iter().any(|p| !p.trim().is_empty())) {
        Some(parts) => parts.iter().find_map(|part| link_from_html(part)),
        None => link_from_text(text, subject.unwrap_or_default()),
    }
}

fn link_from_html(html: &str) -> Option<ActionLink> {
    ANCHOR_RE.captures_iter(html).find_map(|caps| {
        let url = decode_entities(caps.get(1)?.as_str().trim());
        let label = anchor_label(caps.get(2).map_or("", |m| m.as_str()));
        if !ACTION_RE.is_match(&label) && !ACTION_RE.is_match(&url) {
            return None;
        }
        let label = if label.is_empty() {
            label_for_url(&url).to_string()
        } else {
            label
        };
        Some(ActionLink { url, label })
    })
}

fn anchor_label(inner: &str) -> String {
    let stripped = TAG_RE.replace_all(inner, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn link_from_text(text: &str, subject: &str) -> Option<ActionLink> {
    if text.trim().is_empty() {
        return None;
    }
    if !ACTION_RE.is_match(subject) && !ACTION_RE.is_match(text) {
        return None;
    }
    let url = URL_RE
        .find(text)?
        .as_str()
        .trim_end_matches(['.', ',', ';', ':', '!', '?']);
    Some(ActionLink {
        url: url.to_string(),
        label: label_for_url(url).to_string(),
    })
}

fn label_for_url(url: &str) -> &'static str {
    let url = url.to_ascii_lowercase();
    if url.contains("verif") {
        "Verify Account"
    } else if url.contains("reset") {
        "Reset Password"
    } else if url.contains("confirm") {
        "Confirm Email"
    } else if url.contains("activat") {
        "Activate Account"
    } else if ["login", "signin", "sign-in", "sign_in", "auth"]
        .iter()
        .any(|k| url.contains(k))
    {
        "Sign In"
    } else {
        "Click Here"
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&#47;", "/")
        .replace("&#x3D;", "=")
        .replace("&#61;", "=")
        .replace("&nbsp;", " ")
}
