use std::fmt;

use anyhow::{Result, bail};

pub const NAME_PLACEHOLDER: &str = "name";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Output path of a host block device, e.g. `/dev/ontap/{pool}/{name}`.
///
/// `{name}` must appear exactly once; every other placeholder becomes a
/// wildcard when scanning for the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePathTemplate {
    src: String,
    segments: Vec<Segment>,
}

impl DevicePathTemplate {
    pub fn parse(src: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = src.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(k) if k.is_ascii_alphanumeric() || k == '_' => key.push(k),
                            Some(k) => bail!("bad character '{k}' in placeholder of '{src}'"),
                            None => bail!("unterminated placeholder in '{src}'"),
                        }
                    }
                    if key.is_empty() {
                        bail!("empty placeholder in '{src}'");
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(key));
                }
                '}' => bail!("unbalanced '}}' in '{src}'"),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let names = segments
            .iter()
            .filter(|s| matches!(s, Segment::Placeholder(k) if k == NAME_PLACEHOLDER))
            .count();
        if names != 1 {
            bail!("device path template '{src}' must contain {{name}} exactly once");
        }

        Ok(Self {
            src: src.to_string(),
            segments,
        })
    }

    /// Glob matching every device of volume `name`.
    pub fn glob_pattern(&self, name: &str) -> String {
        let mut out = String::with_capacity(self.src.len() + name.len());
        for s in &self.segments {
            match s {
                Segment::Literal(l) => out.push_str(l),
                Segment::Placeholder(k) if k == NAME_PLACEHOLDER => {
                    out.push_str(&glob::Pattern::escape(name))
                }
                Segment::Placeholder(_) => out.push('*'),
            }
        }
        out
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.src
    }
}

impl fmt::Display for DevicePathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}
