// src/manifest/action.rs

//! Manifest actions
//!
//! One action per line: `type [payload] key=value key="quoted value" ...`.
//! A key may repeat; values keep their order.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionType {
    File,
    Dir,
    Link,
    Hardlink,
    Depend,
    License,
    Set,
    Driver,
    User,
    Group,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::File => "file",
            ActionType::Dir => "dir",
            ActionType::Link => "link",
            ActionType::Hardlink => "hardlink",
            ActionType::Depend => "depend",
            ActionType::License => "license",
            ActionType::Set => "set",
            ActionType::Driver => "driver",
            ActionType::User => "user",
            ActionType::Group => "group",
        }
    }

    /// Attribute that identifies an action of this type within a manifest
    pub fn key_attr(&self) -> &'static str {
        match self {
            ActionType::File | ActionType::Dir | ActionType::Link | ActionType::Hardlink => "path",
            ActionType::Depend => "fmri",
            ActionType::License => "license",
            ActionType::Set | ActionType::Driver => "name",
            ActionType::User => "username",
            ActionType::Group => "groupname",
        }
    }

    /// Actions that own a path in the image
    pub fn is_filesystem(&self) -> bool {
        matches!(
            self,
            ActionType::File | ActionType::Dir | ActionType::Link | ActionType::Hardlink
        )
    }

    /// Types whose payload comes first on the line
    fn takes_payload(&self) -> bool {
        matches!(self, ActionType::File | ActionType::License)
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "file" => ActionType::File,
            "dir" => ActionType::Dir,
            "link" => ActionType::Link,
            "hardlink" => ActionType::Hardlink,
            "depend" => ActionType::Depend,
            "license" => ActionType::License,
            "set" => ActionType::Set,
            "driver" => ActionType::Driver,
            "user" => ActionType::User,
            "group" => ActionType::Group,
            other => return Err(Error::ParseError(format!("unknown action type '{other}'"))),
        })
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub action_type: ActionType,
    /// Content hash for `file`, license text hash for `license`
    pub payload: Option<String>,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            payload: None,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = Some(payload.to_string());
        self
    }

    /// First value of `key`
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn attr_values(&self, key: &str) -> &[String] {
        self.attrs.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of this action's key attribute
    pub fn key(&self) -> Option<&str> {
        self.attr(self.action_type.key_attr())
    }

    /// Image-relative path for filesystem actions
    pub fn path(&self) -> Option<&str> {
        if self.action_type.is_filesystem() {
            self.attr("path").map(|p| p.trim_start_matches('/'))
        } else {
            None
        }
    }

    /// Declared payload size in bytes (`pkg.size`)
    pub fn size(&self) -> u64 {
        self.attr("pkg.size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Parse one manifest line
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let mut tokens = tokens.into_iter();

        let action_type: ActionType = match tokens.next() {
            Some(Token::Bare(t)) => t.parse()?,
            _ => return Err(Error::ParseError(format!("missing action type in '{line}'"))),
        };
        let mut action = Action::new(action_type);

        for (i, token) in tokens.enumerate() {
            match token {
                Token::Pair(k, v) => {
                    action.attrs.entry(k).or_default().push(v);
                }
                Token::Bare(p) if i == 0 && action_type.takes_payload() => {
                    action.payload = Some(p);
                }
                Token::Bare(p) => {
                    return Err(Error::ParseError(format!(
                        "unexpected token '{p}' in {action_type} action"
                    )));
                }
            }
        }

        if action.key().is_none() {
            return Err(Error::ParseError(format!(
                "{} action missing '{}' attribute",
                action_type,
                action_type.key_attr()
            )));
        }
        if let Some(path) = action.path()
            && !is_image_relative(Path::new(path))
        {
            return Err(Error::ParseError(format!(
                "{action_type} path '{path}' leaves the image root"
            )));
        }
        Ok(action)
    }
}

/// True when `path` names something strictly inside the image root
pub fn is_image_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_type.as_str())?;
        if let Some(ref payload) = self.payload {
            write!(f, " {}", payload)?;
        }
        for (key, values) in &self.attrs {
            for value in values {
                if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"') {
                    write!(f, " {}=\"{}\"", key, value.replace('\\', "\\\\").replace('"', "\\\""))?;
                } else {
                    write!(f, " {}={}", key, value)?;
                }
            }
        }
        Ok(())
    }
}

enum Token {
    Bare(String),
    Pair(String, String),
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.trim().chars().peekable();

    while chars.peek().is_some() {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut word = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=') {
            word.push(c);
        }
        if word.is_empty() {
            if chars.peek() == Some(&'=') {
                return Err(Error::ParseError(format!("attribute without a name in '{line}'")));
            }
            continue;
        }

        if chars.next_if_eq(&'=').is_none() {
            tokens.push(Token::Bare(word));
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => break,
                    },
                    Some('"') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::ParseError(format!("unterminated quote in '{line}'")));
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }
        tokens.push(Token::Pair(word, value));
    }

    Ok(tokens)
}
