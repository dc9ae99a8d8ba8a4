//! URL templates and their resolution into concrete request URLs.
//!
//! A template is kept as raw components so `{token}` placeholders survive
//! until execution; `url::Url` would percent-encode the braces in the path.

use url::Url;

use crate::error::invalid_url;
use crate::placeholder::Placeholders;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    scheme: String,
    userinfo: Option<String>,
    host: String,
    port: Option<u16>,
    path: String,
    query: Option<String>,
}

impl UrlTemplate {
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let trimmed = raw.trim();
        let Some((scheme, rest)) = trimmed.split_once("://") else {
            return Err(invalid_url(raw, "missing scheme separator `://`"));
        };
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(invalid_url(raw, format!("unsupported scheme `{scheme}`")));
        }

        let without_fragment = rest.split('#').next().unwrap_or(rest);
        let (before_query, query) = match without_fragment.split_once('?') {
            Some((left, right)) => (left, Some(right.to_owned())),
            None => (without_fragment, None),
        };
        let (authority, path) = match before_query.find('/') {
            Some(index) => (&before_query[..index], &before_query[index..]),
            None => (before_query, ""),
        };
        let (userinfo, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => (Some(userinfo.to_owned()), host_port),
            None => (None, authority),
        };
        let (host, port) = split_host_port(raw, host_port)?;
        if host.is_empty() {
            return Err(invalid_url(raw, "missing host"));
        }

        Ok(Self {
            raw: trimmed.to_owned(),
            scheme,
            userinfo,
            host: host.to_owned(),
            port,
            path: path.to_owned(),
            query,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }
}

impl std::fmt::Display for UrlTemplate {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.raw)
    }
}

fn split_host_port<'a>(raw: &str, host_port: &'a str) -> crate::Result<(&'a str, Option<u16>)> {
    if let Some(stripped) = host_port.strip_prefix('[') {
        let Some(end) = stripped.find(']') else {
            return Err(invalid_url(raw, "unterminated IPv6 host"));
        };
        let host = &host_port[..end + 2];
        let suffix = &stripped[end + 1..];
        if suffix.is_empty() {
            return Ok((host, None));
        }
        let Some(raw_port) = suffix.strip_prefix(':') else {
            return Err(invalid_url(raw, "unexpected characters after IPv6 host"));
        };
        return Ok((host, Some(parse_port(raw, raw_port)?)));
    }

    match host_port.rsplit_once(':') {
        Some((host, raw_port)) => Ok((host, Some(parse_port(raw, raw_port)?))),
        None => Ok((host_port, None)),
    }
}

fn parse_port(raw: &str, raw_port: &str) -> crate::Result<u16> {
    raw_port
        .parse::<u16>()
        .map_err(|_| invalid_url(raw, format!("invalid port `{raw_port}`")))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, Vec<String>)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds values under `name`; name and values are trimmed.
    pub fn append<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let name = name.trim();
        let index = match self.entries.iter().position(|(key, _)| key == name) {
            Some(index) => index,
            None => {
                self.entries.push((name.to_owned(), Vec::new()));
                self.entries.len() - 1
            }
        };
        self.entries[index]
            .1
            .extend(values.into_iter().map(|value| value.as_ref().trim().to_owned()));
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }
}

/// Literal template query first, then configured pairs as `name=value`.
pub(crate) fn prepare_query(initial: Option<&str>, params: &QueryParams) -> String {
    let mut query = String::new();
    if let Some(initial) = initial {
        query.push_str(initial);
    }
    for (name, value) in params.pairs() {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(name);
        query.push('=');
        query.push_str(value);
    }
    query
}

/// Resolves placeholders in host, path and query and joins the pieces back
/// into a URL. The fragment of the template is not sent.
pub(crate) fn assemble_url_text(
    template: &UrlTemplate,
    params: &QueryParams,
    placeholders: &Placeholders,
) -> String {
    let host = placeholders.apply(&template.host);
    let path = placeholders.apply(&template.path);
    let query = placeholders.apply(&prepare_query(template.query(), params));

    let mut assembled = String::with_capacity(template.raw.len() + query.len());
    assembled.push_str(&template.scheme);
    assembled.push_str("://");
    if let Some(userinfo) = &template.userinfo {
        assembled.push_str(userinfo);
        assembled.push('@');
    }
    assembled.push_str(&host);
    if let Some(port) = template.port {
        assembled.push(':');
        assembled.push_str(&port.to_string());
    }
    assembled.push_str(&path);
    if !query.is_empty() {
        assembled.push('?');
        assembled.push_str(&query);
    }
    assembled
}

pub(crate) fn assemble_url(
    template: &UrlTemplate,
    params: &QueryParams,
    placeholders: &Placeholders,
) -> crate::Result<Url> {
    let assembled = assemble_url_text(template, params, placeholders);
    Url::parse(&assembled).map_err(|source| invalid_url(&assembled, source.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{QueryParams, UrlTemplate, assemble_url, assemble_url_text, prepare_query};
    use crate::error::ErrorCode;
    use crate::placeholder::Placeholders;

    fn placeholders(pairs: &[(&str, &str)]) -> Placeholders {
        let mut placeholders = Placeholders::new();
        for (name, value) in pairs {
            placeholders
                .insert(*name, *value)
                .expect("placeholder should be accepted");
        }
        placeholders
    }

    #[test]
    fn parses_components_and_keeps_braces() {
        let template = UrlTemplate::parse("https://{h}.example.com:8443/items/{id}?a={v}#top")
            .expect("template should parse");
        assert_eq!(template.scheme(), "https");
        assert_eq!(template.host(), "{h}.example.com");
        assert_eq!(template.port(), Some(8443));
        assert_eq!(template.path(), "/items/{id}");
        assert_eq!(template.query(), Some("a={v}"));
        assert!(template.is_secure());
    }

    #[test]
    fn rejects_malformed_templates() {
        for raw in [
            "http//www.example.com",
            "ftp://example.com/file",
            "http:///path-only",
            "http://example.com:99999/",
            "http://example.com:port/",
            "http://[::1/",
        ] {
            let error = UrlTemplate::parse(raw).expect_err("template should be rejected");
            assert_eq!(error.code(), ErrorCode::InvalidUrl, "{raw}");
        }
    }

    #[test]
    fn accepts_ipv6_hosts() {
        let template = UrlTemplate::parse("http://[::1]:8080/x").expect("template should parse");
        assert_eq!(template.host(), "[::1]");
        assert_eq!(template.port(), Some(8080));
    }

    #[test]
    fn assembles_placeholders_in_host_path_and_query() {
        let template = UrlTemplate::parse("http://{h}/{p}").expect("template should parse");
        let mut params = QueryParams::new();
        params.append("q", ["{v}"]);
        let url = assemble_url(
            &template,
            &params,
            &placeholders(&[("h", "example"), ("p", "item"), ("v", "1")]),
        )
        .expect("url should assemble");
        assert_eq!(url.as_str(), "http://example/item?q=1");
    }

    #[test]
    fn literal_query_comes_before_configured_params() {
        let template = UrlTemplate::parse("http://test.{one}.com/{one}/{two}?abc={three}&{three}=yes")
            .expect("template should parse");
        let mut params = QueryParams::new();
        params.append("q1", ["{one}", "x"]);
        params.append("q2", ["y"]);
        let text = assemble_url_text(
            &template,
            &params,
            &placeholders(&[("one", "one"), ("two", "TWO"), ("three", "THREE")]),
        );
        assert_eq!(
            text,
            "http://test.one.com/one/TWO?abc=THREE&THREE=yes&q1=one&q1=x&q2=y"
        );
    }

    #[test]
    fn explicit_port_and_userinfo_survive_assembly() {
        let template =
            UrlTemplate::parse("http://user@localhost:8080/a").expect("template should parse");
        let text = assemble_url_text(&template, &QueryParams::new(), &Placeholders::new());
        assert_eq!(text, "http://user@localhost:8080/a");
    }

    #[test]
    fn query_params_are_trimmed_and_ordered() {
        let mut params = QueryParams::new();
        params.append(" b ", [" 2 "]);
        params.append("a", ["1"]);
        params.append("b", ["3"]);
        assert_eq!(params.get("b"), Some(["2".to_owned(), "3".to_owned()].as_slice()));
        assert_eq!(prepare_query(None, &params), "b=2&b=3&a=1");
        assert_eq!(prepare_query(Some("x=0"), &params), "x=0&b=2&b=3&a=1");
        assert_eq!(prepare_query(None, &QueryParams::new()), "");
    }
}
