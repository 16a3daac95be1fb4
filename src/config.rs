//! Configuration parsing for rootwalk

use crate::resolver::hints::{RootHints, IANA_ROOTS};
use anyhow::Result;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct ResolverConfig {
    pub roots: Vec<Ipv4Addr>,
    pub port: u16,
    /// Per-query transport limit.
    pub timeout: Duration,
    /// Overall limit for one resolution call.
    pub deadline: Option<Duration>,
    pub max_depth: u32,
    /// How many levels of NS sub-resolution may nest inside one another.
    pub ns_depth: u32,
    /// NS names resolved per glueless referral; 0 disables sub-resolution.
    pub ns_lookups: usize,
    pub cache_capacity: u64,
    pub fallback_iterative: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            roots: IANA_ROOTS.to_vec(),
            port: 53,
            timeout: Duration::from_secs(2),
            deadline: None,
            max_depth: 30,
            ns_depth: 4,
            ns_lookups: 3,
            cache_capacity: 10_000,
            fallback_iterative: false,
        }
    }
}

impl ResolverConfig {
    pub fn root_hints(&self) -> RootHints {
        RootHints::new(self.roots.iter().copied(), self.port)
    }

    /// Load configuration from a file path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = lex(content)?;
        let blocks = parse_tokens(&tokens)?;
        let mut config = Self::default();

        for block in blocks {
            if block.name != "resolver" {
                anyhow::bail!("Unknown block '{}', expected 'resolver'", block.name);
            }
            for directive in &block.directives {
                config.apply(directive).map_err(|e| anyhow::anyhow!("line {}: {}", directive.line, e))?;
            }
        }
        Ok(config)
    }

    fn apply(&mut self, d: &Directive) -> Result<()> {
        match d.name.as_str() {
            "roots" => {
                if d.args.is_empty() { anyhow::bail!("'roots' needs at least one address"); }
                self.roots = d.args.iter()
                    .map(|a| a.parse::<Ipv4Addr>().map_err(|_| anyhow::anyhow!("'{}' is not an IPv4 address", a)))
                    .collect::<Result<_>>()?;
            }
            "port" => self.port = single(d)?.parse()?,
            "timeout" => self.timeout = parse_duration(single(d)?)?,
            "deadline" => self.deadline = Some(parse_duration(single(d)?)?),
            "max_depth" => self.max_depth = single(d)?.parse()?,
            "ns_depth" => self.ns_depth = single(d)?.parse()?,
            "ns_lookups" => self.ns_lookups = single(d)?.parse()?,
            "cache_capacity" => self.cache_capacity = single(d)?.parse()?,
            "fallback_iterative" => self.fallback_iterative = true,
            other => anyhow::bail!("Unknown directive '{}'", other),
        }
        Ok(())
    }
}

fn single(d: &Directive) -> Result<&str> {
    match d.args.as_slice() {
        [arg] => Ok(arg),
        _ => anyhow::bail!("'{}' takes exactly one argument", d.name),
    }
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 60)) }
    else if let Some(stripped) = s.strip_suffix('h') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 3600)) }
    else { anyhow::bail!("invalid duration '{}'", s) }
}

#[derive(Clone, Debug)]
struct Directive {
    line: usize,
    name: String,
    args: Vec<String>,
}

struct Block { name: String, directives: Vec<Directive> }

#[derive(Debug, PartialEq)]
enum Token { Text(String), OpenBrace, CloseBrace, Newline }

/// Splits the file into tokens tagged with their 1-based line number.
/// `#` and `;` start a comment that runs to the end of the line.
fn lex(input: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let mut rest = raw;
        while let Some(c) = rest.chars().next() {
            match c {
                '#' | ';' => break,
                '{' => { tokens.push((line, Token::OpenBrace)); rest = &rest[1..]; }
                '}' => { tokens.push((line, Token::CloseBrace)); rest = &rest[1..]; }
                '"' => {
                    let Some(end) = rest[1..].find('"') else { anyhow::bail!("line {}: unterminated quote", line) };
                    tokens.push((line, Token::Text(rest[1..=end].to_string())));
                    rest = &rest[end + 2..];
                }
                c if c.is_whitespace() => rest = &rest[c.len_utf8()..],
                _ => {
                    let end = rest.find(|c: char| c.is_whitespace() || "#;{}\"".contains(c)).unwrap_or(rest.len());
                    tokens.push((line, Token::Text(rest[..end].to_string())));
                    rest = &rest[end..];
                }
            }
        }
        tokens.push((line, Token::Newline));
    }
    Ok(tokens)
}

fn parse_tokens(tokens: &[(usize, Token)]) -> Result<Vec<Block>> {
    let mut i = 0;
    let mut blocks = Vec::new();
    let mut name: Option<String> = None;
    while let Some((line, token)) = tokens.get(i) {
        match token {
            Token::Text(s) => {
                if name.is_some() { anyhow::bail!("line {}: unexpected '{}' after block name", line, s); }
                name = Some(s.clone());
                i += 1;
            }
            Token::OpenBrace => {
                let Some(block_name) = name.take() else { anyhow::bail!("line {}: block without a name", line); };
                let (directives, next_i) = parse_block(tokens, i + 1)?;
                i = next_i;
                blocks.push(Block { name: block_name, directives });
            }
            Token::Newline => {
                if let Some(n) = name.take() { anyhow::bail!("line {}: expected '{{' after '{}'", line, n); }
                i += 1;
            }
            Token::CloseBrace => anyhow::bail!("line {}: unbalanced '}}'", line),
        }
    }
    if let Some(n) = name { anyhow::bail!("Expected '{{' after '{}'", n); }
    Ok(blocks)
}

/// Parse the directives of a block starting just past its '{'
fn parse_block(tokens: &[(usize, Token)], mut i: usize) -> Result<(Vec<Directive>, usize)> {
    let mut directives = Vec::new();
    while let Some((line, token)) = tokens.get(i) {
        match token {
            Token::Newline => { i += 1; }
            Token::CloseBrace => return Ok((directives, i + 1)),
            Token::OpenBrace => anyhow::bail!("line {}: nested blocks are not supported", line),
            Token::Text(name) => {
                let mut args = Vec::new();
                i += 1;
                while let Some((_, Token::Text(arg))) = tokens.get(i) {
                    args.push(arg.clone());
                    i += 1;
                }
                directives.push(Directive { line: *line, name: name.clone(), args });
            }
        }
    }
    anyhow::bail!("Missing '}}' at end of block")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_defaults() {
        let config = ResolverConfig::parse("# nothing here\n").unwrap();
        assert_eq!(config, ResolverConfig::default());
        assert_eq!(config.root_hints().servers().len(), 13);
    }

    #[test]
    fn parses_every_directive() {
        let text = r#"
# lab setup
resolver {
    roots 10.0.0.1 10.0.0.2   # two fake roots
    port 5353
    timeout 500ms
    deadline 10s
    max_depth 5
    ns_depth 2
    ns_lookups 1
    cache_capacity 64
    fallback_iterative
}
"#;
        let config = ResolverConfig::parse(text).unwrap();
        assert_eq!(config.roots, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(config.port, 5353);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.deadline, Some(Duration::from_secs(10)));
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.ns_depth, 2);
        assert_eq!(config.ns_lookups, 1);
        assert_eq!(config.cache_capacity, 64);
        assert!(config.fallback_iterative);
        assert_eq!(config.root_hints().servers()[1], "10.0.0.2:5353".parse().unwrap());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ResolverConfig::parse("resolver {\n bogus 1\n}").is_err());
        assert!(ResolverConfig::parse("resolver {\n roots not-an-ip\n}").is_err());
        assert!(ResolverConfig::parse("resolver {\n timeout 2\n}").is_err());
        assert!(ResolverConfig::parse("resolver {\n max_depth 1 2\n}").is_err());
        assert!(ResolverConfig::parse("resolver {\n max_depth 3\n").is_err());
        assert!(ResolverConfig::parse("forward {\n}").is_err());
        assert!(ResolverConfig::parse("}").is_err());
    }

    #[test]
    fn errors_name_the_offending_line() {
        let err = ResolverConfig::parse("resolver {\n    port 5353 ; lab port\n    bogus 1\n}").unwrap_err();
        assert_eq!(err.to_string(), "line 3: Unknown directive 'bogus'");

        let err = ResolverConfig::parse("resolver {\n  roots \"10.0.0.1\n}").unwrap_err();
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn quoted_arguments_and_semicolon_comments() {
        let config = ResolverConfig::parse("resolver { ; inline\n timeout \"750ms\" # trailing\n}").unwrap();
        assert_eq!(config.timeout, Duration::from_millis(750));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ResolverConfig::load("/definitely/not/here.conf").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
