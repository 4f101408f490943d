use anyhow::{Error, Result, anyhow};
use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(anyhow::Error::from) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

static JS_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"var\s+([A-Za-z_$][\w$]*)\s*=\s*").expect("declaration pattern is valid")
});

/// Returns the raw right-hand side of `var <name> = <value>;` in a JS payload.
/// Quoted string values are returned without their quotes.
pub fn js_var<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let mut declarations = JS_DECLARATION.captures_iter(content);
    let start = declarations.by_ref().find(|c| &c[1] == name)?.get(0)?.end();
    let end = declarations
        .next()
        .and_then(|c| c.get(0))
        .map_or(content.len(), |m| m.start());
    let segment = &content[start..end];

    // The statement ends at the first `;` followed only by a comment or
    // the next declaration.
    let value = segment
        .match_indices(';')
        .map(|(i, _)| i)
        .find(|&i| {
            let rest = segment[i + 1..].trim_start();
            rest.is_empty() || rest.starts_with("/*")
        })
        .map_or(segment, |i| &segment[..i])
        .trim();
    Some(
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value),
    )
}

/// Extracts the JSON argument of a JSONP callback such as `jsonpgz({...});`.
pub fn jsonp_payload<'a>(content: &'a str, callback: &str) -> Result<&'a str> {
    let start = content
        .find(&format!("{callback}("))
        .ok_or_else(|| anyhow!("Missing {callback}( in response"))?
        + callback.len()
        + 1;
    let end = content
        .rfind(')')
        .filter(|end| *end >= start)
        .ok_or_else(|| anyhow!("Unterminated {callback}( in response"))?;
    Ok(content[start..end].trim())
}

/// Parses a plain decimal such as a unit net worth. Empty or malformed
/// values are treated as missing.
pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a percentage string such as `"12.34"` or `"-3.5%"`.
pub fn parse_pct(raw: &str) -> Option<f64> {
    parse_number(raw.trim().trim_end_matches('%'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_var_extracts_strings_and_arrays() {
        let content = r#"/*fund*/var fS_name = "华夏成长混合";var fS_code = "000001";
var syl_1n="12.5";var Data_netWorthTrend = [{"x":1,"y":1.0}];/*end*/"#;
        assert_eq!(js_var(content, "fS_name"), Some("华夏成长混合"));
        assert_eq!(js_var(content, "syl_1n"), Some("12.5"));
        assert_eq!(
            js_var(content, "Data_netWorthTrend"),
            Some(r#"[{"x":1,"y":1.0}]"#)
        );
        assert_eq!(js_var(content, "missing"), None);
    }

    #[test]
    fn test_js_var_keeps_semicolons_inside_values() {
        let content = r#"var fS_name = "A;B";var fS_code = "000001";"#;
        assert_eq!(js_var(content, "fS_name"), Some("A;B"));
        assert_eq!(js_var(content, "fS_code"), Some("000001"));
    }

    #[test]
    fn test_jsonp_payload() {
        let content = r#"jsonpgz({"fundcode":"000001","gsz":"1.2"});"#;
        assert_eq!(
            jsonp_payload(content, "jsonpgz").unwrap(),
            r#"{"fundcode":"000001","gsz":"1.2"}"#
        );
        assert!(jsonp_payload("jsonpgz();", "jsonpgz").unwrap().is_empty());
        assert!(jsonp_payload("<html>", "jsonpgz").is_err());
    }

    #[test]
    fn test_parse_pct() {
        assert_eq!(parse_pct("12.34"), Some(12.34));
        assert_eq!(parse_pct("-3.5%"), Some(-3.5));
        assert_eq!(parse_pct(""), None);
        assert_eq!(parse_pct("--"), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 1.1180 "), Some(1.118));
        assert_eq!(parse_number("1.1180%"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
