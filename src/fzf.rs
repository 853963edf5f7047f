use std::io::{self, Read, Write};
use std::process::{Command, Stdio};

use log::debug;

use crate::errors::{Error, Result};

pub struct MatchOptions<'a> {
    pub exact_match: bool,
    pub sorted: bool,
    pub multi: bool,
    pub prompt: &'a str,
    pub query: &'a str,
}

/// Picks zero or more of `candidates`, best match first.
pub trait Matcher {
    fn run(&self, candidates: &[String], opts: &MatchOptions) -> Result<Vec<String>>;
}

/// Interactive selection through an `fzf` process attached to the terminal.
pub struct Fzf {
    exec: String,
    prompt_suffix: String,
}

impl Fzf {
    pub fn new<S: Into<String>>(exec: S, prompt_suffix: S) -> Fzf {
        Fzf {
            exec: exec.into(),
            prompt_suffix: prompt_suffix.into(),
        }
    }

    fn build_args(&self, opts: &MatchOptions) -> Vec<String> {
        let mut args = vec![
            format!("--prompt={}{}", opts.prompt, self.prompt_suffix),
            String::from("--select-1"),
            String::from("--exit-0"),
        ];
        if !opts.query.is_empty() {
            args.push(format!("--query={}", opts.query));
        }
        if opts.multi {
            args.push(String::from("--multi"));
        }
        if !opts.sorted {
            args.push(String::from("--no-sort"));
        }
        args
    }

    fn search(&self, candidates: &[String], args: Vec<String>) -> Result<Vec<String>> {
        let mut input = String::with_capacity(candidates.len() * 16);
        for candidate in candidates {
            input.push_str(candidate);
            input.push('\n');
        }

        let mut cmd = Command::new(&self.exec);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.stdout(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(aborted(format!(
                    "cannot find {} in your system, please install it first",
                    self.exec
                )));
            }
            Err(err) => return Err(aborted(format!("failed to launch {}: {err}", self.exec))),
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|err| aborted(format!("write input to {}: {err}", self.exec)))?;
        }

        let mut out = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_string(&mut out)
                .map_err(|err| aborted(format!("read {} output: {err}", self.exec)))?;
        }

        let status = child
            .wait()
            .map_err(|err| aborted(format!("wait {} done: {err}", self.exec)))?;

        match status.code() {
            Some(0) => Ok(parse_output(&out, candidates)),
            Some(1) => Ok(Vec::new()),
            Some(2) => Err(aborted(format!("{} returned an error", self.exec))),
            Some(130) => Err(aborted(format!("{} canceled", self.exec))),
            Some(128..=254) | None => Err(aborted(format!("{} was terminated", self.exec))),
            _ => Err(aborted(format!("{} returned an unknown error", self.exec))),
        }
    }
}

impl Matcher for Fzf {
    fn run(&self, candidates: &[String], opts: &MatchOptions) -> Result<Vec<String>> {
        if opts.exact_match && !opts.query.is_empty() {
            debug!("Exact match '{}' among {} items", opts.query, candidates.len());
            return Ok(exact_matches(candidates, opts.query));
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Launch {} with {} items, query '{}'",
            self.exec,
            candidates.len(),
            opts.query
        );
        self.search(candidates, self.build_args(opts))
    }
}

fn aborted(msg: String) -> Error {
    Error::SelectionAborted(msg)
}

fn exact_matches(candidates: &[String], query: &str) -> Vec<String> {
    candidates
        .iter()
        .filter(|candidate| candidate.as_str() == query)
        .cloned()
        .collect()
}

/// Keep only lines that are real candidates, in the order fzf printed them.
fn parse_output(out: &str, candidates: &[String]) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| candidates.iter().any(|candidate| candidate == line))
        .map(String::from)
        .collect()
}
