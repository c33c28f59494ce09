//! netrc credential file.
//!
//! Supports `machine`, `default`, `login`, `password`, `account` (ignored),
//! `macdef` blocks (skipped up to the next blank line), `#` comment lines and
//! double-quoted values.

use crate::utils::errors::{BackupError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Netrc {
    machines: HashMap<String, Credentials>,
    default: Option<Credentials>,
}

#[derive(Default)]
struct Pending {
    machine: Option<String>,
    login: Option<String>,
    password: Option<String>,
}

impl Netrc {
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::AuthConfigMissing(path.to_path_buf()))
            }
            Err(e) => {
                return Err(BackupError::Config(format!(
                    "cannot read credentials file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = tokenize(content);
        let mut netrc = Netrc::default();
        let mut current: Option<Pending> = None;
        let mut iter = tokens.into_iter();

        while let Some(token) = iter.next() {
            match token.as_str() {
                "machine" => {
                    let host = iter
                        .next()
                        .ok_or_else(|| parse_error("'machine' without a host"))?;
                    netrc.commit(current.take());
                    current = Some(Pending {
                        machine: Some(host),
                        ..Default::default()
                    });
                }
                "default" => {
                    netrc.commit(current.take());
                    current = Some(Pending::default());
                }
                "login" | "password" | "account" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| parse_error(&format!("'{}' without a value", token)))?;
                    let Some(entry) = current.as_mut() else {
                        return Err(parse_error(&format!("'{}' outside of a machine entry", token)));
                    };
                    match token.as_str() {
                        "login" => entry.login = Some(value),
                        "password" => entry.password = Some(value),
                        _ => {}
                    }
                }
                "macdef" => {
                    // name only; the body was dropped by the tokenizer
                    iter.next();
                }
                _ => {}
            }
        }
        netrc.commit(current);
        Ok(netrc)
    }

    fn commit(&mut self, pending: Option<Pending>) {
        let Some(pending) = pending else {
            return;
        };
        let credentials = Credentials {
            login: pending.login.unwrap_or_default(),
            password: pending.password.unwrap_or_default(),
        };
        match pending.machine {
            // first match wins, like curl
            Some(host) => {
                self.machines.entry(host).or_insert(credentials);
            }
            None => {
                if self.default.is_none() {
                    self.default = Some(credentials);
                }
            }
        }
    }

    /// Credentials for `host`, falling back to the `default` entry.
    pub fn lookup(&self, host: &str) -> Option<&Credentials> {
        self.machines.get(host).or(self.default.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.default.is_none()
    }
}

fn parse_error(message: &str) -> BackupError {
    BackupError::Config(format!("credentials file: {}", message))
}

fn tokenize(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut in_macdef = false;

    for line in content.lines() {
        if in_macdef {
            if line.trim().is_empty() {
                in_macdef = false;
            }
            continue;
        }
        if line.trim_start().starts_with('#') {
            continue;
        }

        let mut chars = line.chars().peekable();
        let mut line_tokens = Vec::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            let mut token = String::new();
            if c == '"' {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                token.push(escaped);
                            }
                        }
                        _ => token.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
            }
            line_tokens.push(token);
        }

        // macdef <name> starts a macro body that runs to the next blank line
        if let Some(pos) = line_tokens.iter().position(|t| t == "macdef") {
            line_tokens.truncate(pos + 2);
            in_macdef = true;
        }
        tokens.extend(line_tokens);
    }
    tokens
}
