//! Interactive `dig`-style front end over the resolver.

use crate::resolver::{Answer, Hop, ResolveError, Resolver};
use crate::types::{rcode_to_str, ResourceRecord, Response};
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;
use tokio::sync::mpsc;

pub const USAGE: &str = "proper usage: dig @<Dns-server-name> HostName";

const HELP: &str = "\
commands:
  dig <host>                       walk from the root servers, showing every hop
  dig @<server> <host>             walk starting at <server>
  dig +recurse [@<server>] <host>  recursive lookup (delegated when a server is given)
  step @<server> <host>            one query, no referral chasing
  stats                            print resolver metrics
  q | quit                         exit";

lazy_static! {
    static ref HOSTNAME: Regex = Regex::new(r"^([A-Za-z0-9_]([A-Za-z0-9_-]{0,61}[A-Za-z0-9_])?\.)*[A-Za-z0-9_]([A-Za-z0-9_-]{0,61}[A-Za-z0-9_])?\.?$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Dig { host: String, server: Option<String>, recurse: bool },
    Step { host: String, server: String },
    Stats,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, rest)) = words.split_first() else { return Command::Empty; };

    match verb {
        "q" | "quit" | "exit" => Command::Quit,
        "stats" => Command::Stats,
        "help" | "?" => Command::Help,
        "dig" => {
            let mut recurse = false;
            let mut server = None;
            let mut host = None;
            for word in rest {
                if *word == "+recurse" { recurse = true; }
                else if let Some(s) = word.strip_prefix('@') { server = Some(s.to_string()); }
                else if host.is_none() { host = Some(word.to_string()); }
                else { return Command::Invalid(USAGE.to_string()); }
            }
            match host {
                Some(h) if is_hostname(&h) => Command::Dig { host: h, server, recurse },
                Some(h) => Command::Invalid(format!("'{}' is not a valid host name", h)),
                None => Command::Invalid("dig @<Dns-server-name> HostName".to_string()),
            }
        }
        "step" => match rest {
            [server, host] => match server.strip_prefix('@') {
                Some(server) if is_hostname(host) => Command::Step { host: host.to_string(), server: server.to_string() },
                _ => Command::Invalid("step @<Dns-server-name> HostName".to_string()),
            },
            _ => Command::Invalid("step @<Dns-server-name> HostName".to_string()),
        },
        _ => Command::Invalid(USAGE.to_string()),
    }
}

pub fn is_hostname(s: &str) -> bool {
    s.len() <= 253 && HOSTNAME.is_match(s)
}

pub struct Repl {
    resolver: Resolver,
}

impl Repl {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    /// Runs one input line; returns false once the user asked to quit.
    pub async fn run_line<W: Write + Send>(&self, line: &str, out: &mut W) -> Result<bool> {
        let command = parse_command(line);
        tracing::debug!("[repl] {:?}", command);

        match command {
            Command::Quit => return Ok(false),
            Command::Empty => {}
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Invalid(msg) => writeln!(out, "{}", msg)?,
            Command::Stats => write!(out, "{}", crate::metrics::render()?)?,
            Command::Step { host, server } => {
                let Some(server) = self.server_addr(&server, out).await? else { return Ok(true) };
                let started = Instant::now();
                match self.resolver.single_step(&host, server).await {
                    Ok(response) => print_response(out, &response)?,
                    Err(e) => writeln!(out, ";; {}", e)?,
                }
                writeln!(out, ";; TIME: {:.4}s", started.elapsed().as_secs_f64())?;
            }
            Command::Dig { host, server, recurse } => {
                let server = match server {
                    Some(s) => match self.server_addr(&s, out).await? {
                        Some(addr) => Some(addr),
                        None => return Ok(true),
                    },
                    None => None,
                };
                let started = Instant::now();
                let result = if recurse {
                    self.resolver.resolve_recursive(&host, server).await
                } else {
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let start = server.map(|s| vec![s]);
                    let walk = async move {
                        let result = self.resolver.resolve_iterative(&host, start.as_deref(), Some(&tx)).await;
                        drop(tx);
                        result
                    };
                    let printer = async {
                        while let Some(hop) = rx.recv().await { print_hop(out, &hop)?; }
                        Ok::<(), std::io::Error>(())
                    };
                    let (result, printed) = tokio::join!(walk, printer);
                    printed?;
                    result
                };
                print_result(out, &result)?;
                writeln!(out, ";; TIME: {:.4}s", started.elapsed().as_secs_f64())?;
            }
        }
        Ok(true)
    }

    /// `1.2.3.4`, `1.2.3.4:5353`, or a host name resolved through the engine.
    async fn server_addr<W: Write + Send>(&self, s: &str, out: &mut W) -> Result<Option<SocketAddr>> {
        if let Ok(addr) = s.parse::<SocketAddr>() { return Ok(Some(addr)); }
        if let Ok(ip) = s.parse::<Ipv4Addr>() { return Ok(Some(SocketAddr::new(ip.into(), 53))); }
        if !is_hostname(s) {
            writeln!(out, ";; '{}' is not a server address or host name", s)?;
            return Ok(None);
        }
        match self.resolver.resolve_recursive(s, None).await {
            Ok(answer) => match answer.rrset.addresses().next() {
                Some(ip) => Ok(Some(SocketAddr::new(ip.into(), 53))),
                None => {
                    writeln!(out, ";; {} has no address record", s)?;
                    Ok(None)
                }
            },
            Err(e) => {
                writeln!(out, ";; cannot find server {}: {}", s, e)?;
                Ok(None)
            }
        }
    }
}

fn print_section<W: Write>(out: &mut W, title: &str, records: &[ResourceRecord]) -> std::io::Result<()> {
    if records.is_empty() { return Ok(()); }
    writeln!(out, ";; {} SECTION:", title)?;
    for record in records { writeln!(out, "{}", record)?; }
    Ok(())
}

fn print_response<W: Write>(out: &mut W, response: &Response) -> std::io::Result<()> {
    let f = response.flags;
    writeln!(out, ";; status: {}, flags:{}{}{}{}", rcode_to_str(f.rcode),
        if f.aa { " aa" } else { "" }, if f.tc { " tc" } else { "" },
        if f.rd { " rd" } else { "" }, if f.ra { " ra" } else { "" })?;
    print_section(out, "ANSWER", &response.answer)?;
    print_section(out, "AUTHORITY", &response.authority)?;
    print_section(out, "ADDITIONAL", &response.additional)
}

fn print_hop<W: Write>(out: &mut W, hop: &Hop) -> std::io::Result<()> {
    match &hop.outcome {
        Ok(response) => {
            writeln!(out, ";; step {} <- {}", hop.step, hop.server)?;
            print_response(out, response)?;
        }
        Err(e) => writeln!(out, ";; step {} <- {}: {}", hop.step, hop.server, e)?,
    }
    writeln!(out)
}

fn print_result<W: Write>(out: &mut W, result: &Result<Answer, ResolveError>) -> std::io::Result<()> {
    match result {
        Ok(answer) => {
            print_section(out, "ANSWER", &answer.rrset.records)?;
            let origin = match (answer.from_cache, answer.server) {
                (true, _) => "cache".to_string(),
                (false, Some(server)) => server.to_string(),
                (false, None) => "-".to_string(),
            };
            writeln!(out, ";; steps: {}, ttl: {}s, from: {}", answer.steps, answer.ttl, origin)
        }
        Err(e) => writeln!(out, ";; resolution failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::resolver::AnswerCache;
    use crate::transport::mock::{MockTransport, Reply};
    use crate::types::{HeaderFlags, RData};
    use std::sync::Arc;

    #[test]
    fn parses_dig_forms() {
        assert_eq!(parse_command("dig example.com"), Command::Dig { host: "example.com".into(), server: None, recurse: false });
        assert_eq!(
            parse_command("dig @8.8.8.8 example.com"),
            Command::Dig { host: "example.com".into(), server: Some("8.8.8.8".into()), recurse: false }
        );
        assert_eq!(
            parse_command("  dig +recurse example.com. "),
            Command::Dig { host: "example.com.".into(), server: None, recurse: true }
        );
        assert_eq!(parse_command("dig"), Command::Invalid("dig @<Dns-server-name> HostName".into()));
        assert_eq!(parse_command("dig a.com b.com"), Command::Invalid(USAGE.into()));
        assert!(matches!(parse_command("dig bad..name"), Command::Invalid(_)));
    }

    #[test]
    fn parses_other_commands() {
        assert_eq!(parse_command("q"), Command::Quit);
        assert_eq!(parse_command("stats"), Command::Stats);
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(parse_command("step @1.2.3.4 example.com"), Command::Step { host: "example.com".into(), server: "1.2.3.4".into() });
        assert!(matches!(parse_command("step example.com"), Command::Invalid(_)));
        assert_eq!(parse_command("lookup example.com"), Command::Invalid(USAGE.into()));
    }

    #[test]
    fn hostname_validation() {
        assert!(is_hostname("example.com"));
        assert!(is_hostname("_dmarc.example.com."));
        assert!(is_hostname("localhost"));
        assert!(!is_hostname("-bad.example"));
        assert!(!is_hostname("a..b"));
        assert!(!is_hostname(&format!("{}.com", "x".repeat(64))));
    }

    #[tokio::test(start_paused = true)]
    async fn dig_prints_hops_and_answer() {
        let transport = Arc::new(MockTransport::new(|server, _| match server.to_string().as_str() {
            "10.0.0.1:53" => Reply::Respond(Response {
                flags: HeaderFlags { qr: true, ..Default::default() },
                authority: vec![ResourceRecord::new("com", 172800, RData::NS("a.gtld.net".into()))],
                additional: vec![ResourceRecord::new("a.gtld.net", 172800, RData::A(Ipv4Addr::new(10, 0, 0, 2)))],
                ..Default::default()
            }),
            "10.0.0.2:53" => Reply::Respond(Response {
                flags: HeaderFlags { qr: true, aa: true, ..Default::default() },
                answer: vec![ResourceRecord::new("example.com", 300, RData::A(Ipv4Addr::new(93, 184, 216, 34)))],
                ..Default::default()
            }),
            _ => Reply::Timeout,
        }));
        let config = ResolverConfig { roots: vec![Ipv4Addr::new(10, 0, 0, 1)], ..ResolverConfig::default() };
        let resolver = Resolver::new(config, Arc::new(AnswerCache::new(16)), transport);
        let repl = Repl::new(resolver);

        let mut out = Vec::new();
        assert!(repl.run_line("dig example.com", &mut out).await.unwrap());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(";; step 1 <- 10.0.0.1:53"));
        assert!(text.contains(";; AUTHORITY SECTION:"));
        assert!(text.contains(";; step 2 <- 10.0.0.2:53"));
        assert!(text.contains("93.184.216.34"));
        assert!(text.contains(";; steps: 2, ttl: 300s, from: 10.0.0.2:53"));
        assert!(text.contains(";; TIME:"));

        let mut out = Vec::new();
        repl.run_line("dig +recurse example.com", &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("from: cache"));

        let mut out = Vec::new();
        assert!(!repl.run_line("q", &mut out).await.unwrap());
    }

    #[derive(Clone, Default)]
    struct SharedOut(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    impl SharedOut {
        fn text(&self) -> String { String::from_utf8(self.0.lock().unwrap().clone()).unwrap() }
    }

    #[tokio::test(start_paused = true)]
    async fn dig_prints_each_hop_as_it_arrives() {
        let transport = Arc::new(MockTransport::new(|server, _| match server.to_string().as_str() {
            "10.0.0.1:53" => Reply::Respond(Response {
                flags: HeaderFlags { qr: true, ..Default::default() },
                authority: vec![ResourceRecord::new("com", 172800, RData::NS("a.gtld.net".into()))],
                additional: vec![ResourceRecord::new("a.gtld.net", 172800, RData::A(Ipv4Addr::new(10, 0, 0, 2)))],
                ..Default::default()
            }),
            _ => Reply::Timeout,
        }));
        let config = ResolverConfig { roots: vec![Ipv4Addr::new(10, 0, 0, 1)], ..ResolverConfig::default() };
        let repl = Repl::new(Resolver::new(config, Arc::new(AnswerCache::new(16)), transport));
        let out = SharedOut::default();

        let mut writer = out.clone();
        let running = tokio::spawn(async move { repl.run_line("dig example.com", &mut writer).await });

        // 10.0.0.2 is still timing out; the first hop is already on screen.
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        let partial = out.text();
        assert!(partial.contains(";; step 1 <- 10.0.0.1:53"));
        assert!(!partial.contains("resolution failed"));

        assert!(running.await.unwrap().unwrap());
        let full = out.text();
        assert!(full.contains(";; step 2 <- 10.0.0.2:53"));
        assert!(full.contains(";; resolution failed"));
    }
}
