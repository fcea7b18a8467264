use once_cell::sync::Lazy;
use regex::Regex;

/// What a fixture expects, read from its leading `;;` comments:
///
/// ```text
/// ;; prefixes: runtime. internal_cpu
/// ;; expect: ok
/// ;; stub-sites: 2
/// ```
///
/// `expect` is either `ok` or `error: <text>`, where the text must occur in
/// the rendered error.
#[derive(Debug, Default)]
pub struct Directives {
    pub prefixes: Vec<String>,
    pub expect: Expect,
    pub stub_sites: Option<usize>,
}

#[derive(Debug, Default)]
pub enum Expect {
    #[default]
    Ok,
    Error(String),
}

impl Directives {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut directives = Self::default();

        for caps in PATTERN.captures_iter(content) {
            let value = caps["value"].trim();
            match &caps["key"] {
                "prefixes" => {
                    directives
                        .prefixes
                        .extend(value.split_whitespace().map(str::to_string));
                }
                "expect" => {
                    directives.expect = match value.strip_prefix("error:") {
                        Some(text) => Expect::Error(text.trim().to_string()),
                        None if value == "ok" => Expect::Ok,
                        None => return Err(format!("unknown expectation `{value}`")),
                    };
                }
                "stub-sites" => {
                    let sites = value
                        .parse()
                        .map_err(|_| format!("`stub-sites` needs a count, got `{value}`"))?;
                    directives.stub_sites = Some(sites);
                }
                key => return Err(format!("unknown directive `{key}`")),
            }
        }

        if directives.prefixes.is_empty() {
            return Err("fixture has no `prefixes` directive".to_string());
        }
        Ok(directives)
    }
}

static PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*;;\s*(?P<key>[a-z-]+):(?P<value>.*)$").unwrap()
});
