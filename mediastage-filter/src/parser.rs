//! Textual filter graph descriptions.
//!
//! ```text
//! graph  := chain (';' chain)*
//! chain  := label* filter (',' filter)* label*
//! filter := name ('=' arg (':' arg)*)?
//! arg    := value | key '=' value
//! label  := '[' name ']'
//! ```
//!
//! `[in]` and `[out]` name the graph's source and sink pads. A first chain
//! without an input label reads from the source pad and a last chain without
//! an output label writes to the sink pad.

use crate::error::{FilterError, Result};
use std::fmt;

/// A filter argument, positional or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterArg {
    pub key: Option<String>,
    pub value: String,
}

/// One filter with its arguments, e.g. `scale=1280:720`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterSpec {
    pub name: String,
    pub args: Vec<FilterArg>,
}

impl FilterSpec {
    /// Parse a single filter without labels.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser::new(input);
        let spec = parser.filter()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(FilterError::parse(parser.pos, "trailing characters after filter"));
        }
        Ok(spec)
    }

    /// The `index`-th positional argument.
    pub fn positional(&self, index: usize) -> Option<&str> {
        self.args
            .iter()
            .filter(|a| a.key.is_none())
            .nth(index)
            .map(|a| a.value.as_str())
    }

    /// A named argument.
    pub fn named(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.key.as_deref() == Some(key))
            .map(|a| a.value.as_str())
    }

    /// A named argument, falling back to a positional one.
    pub fn arg(&self, key: &str, index: usize) -> Option<&str> {
        self.named(key).or_else(|| self.positional(index))
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            f.write_str(if i == 0 { "=" } else { ":" })?;
            if let Some(key) = &arg.key {
                write!(f, "{key}=")?;
            }
            f.write_str(&arg.value)?;
        }
        Ok(())
    }
}

/// A comma-separated run of filters with optional link labels at both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescription {
    pub input: Option<String>,
    pub filters: Vec<FilterSpec>,
    pub output: Option<String>,
}

/// A parsed graph: chains separated by semicolons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDescription {
    pub chains: Vec<ChainDescription>,
}

impl GraphDescription {
    /// Parse a textual graph description.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser::new(input);
        let mut chains = vec![parser.chain()?];
        loop {
            parser.skip_ws();
            match parser.peek() {
                None => break,
                Some(b';') => {
                    parser.pos += 1;
                    chains.push(parser.chain()?);
                }
                Some(c) => {
                    return Err(FilterError::parse(
                        parser.pos,
                        format!("expected ';' or end of graph, found '{}'", c as char),
                    ))
                }
            }
        }
        Ok(Self { chains })
    }

    /// Total number of filters.
    pub fn filter_count(&self) -> usize {
        self.chains.iter().map(|c| c.filters.len()).sum()
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    // Characters up to the next delimiter, trimmed.
    fn token(&mut self, delimiters: &[u8]) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| !delimiters.contains(&c)) {
            self.pos += 1;
        }
        self.input[start..self.pos].trim()
    }

    fn labels(&mut self) -> Result<Vec<String>> {
        let mut labels = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some(b'[') {
                return Ok(labels);
            }
            let open = self.pos;
            self.pos += 1;
            let name = self.token(b"]");
            if self.peek() != Some(b']') {
                return Err(FilterError::parse(open, "unterminated link label"));
            }
            self.pos += 1;
            if name.is_empty() {
                return Err(FilterError::parse(open, "empty link label"));
            }
            labels.push(name.to_string());
        }
    }

    fn single_label(&mut self, side: &str) -> Result<Option<String>> {
        let at = self.pos;
        let mut labels = self.labels()?;
        if labels.len() > 1 {
            return Err(FilterError::parse(
                at,
                format!("filters have a single {side} pad, found {} labels", labels.len()),
            ));
        }
        Ok(labels.pop())
    }

    fn filter(&mut self) -> Result<FilterSpec> {
        self.skip_ws();
        let at = self.pos;
        let name = self.token(b"=,;[]");
        if name.is_empty() {
            return Err(FilterError::parse(at, "expected a filter name"));
        }
        if !name
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            return Err(FilterError::parse(at, format!("invalid filter name '{name}'")));
        }
        let mut args = Vec::new();
        if self.peek() == Some(b'=') {
            self.pos += 1;
            loop {
                let arg_at = self.pos;
                let raw = self.token(b":,;[]");
                if raw.is_empty() {
                    return Err(FilterError::parse(arg_at, format!("empty argument for '{name}'")));
                }
                args.push(match raw.split_once('=') {
                    Some((k, v)) => FilterArg {
                        key: Some(k.trim().to_string()),
                        value: v.trim().to_string(),
                    },
                    None => FilterArg {
                        key: None,
                        value: raw.to_string(),
                    },
                });
                if self.peek() != Some(b':') {
                    break;
                }
                self.pos += 1;
            }
        }
        Ok(FilterSpec {
            name: name.to_string(),
            args,
        })
    }

    fn chain(&mut self) -> Result<ChainDescription> {
        let input = self.single_label("input")?;
        let mut filters = vec![self.filter()?];
        loop {
            self.skip_ws();
            if self.peek() != Some(b',') {
                break;
            }
            self.pos += 1;
            filters.push(self.filter()?);
        }
        let output = self.single_label("output")?;
        self.skip_ws();
        if self.peek() == Some(b',') {
            return Err(FilterError::parse(self.pos, "link labels are only allowed at chain ends"));
        }
        Ok(ChainDescription {
            input,
            filters,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_filter() {
        let graph = GraphDescription::parse("scale=1280:720").unwrap();
        assert_eq!(graph.chains.len(), 1);
        let scale = &graph.chains[0].filters[0];
        assert_eq!(scale.name, "scale");
        assert_eq!(scale.positional(0), Some("1280"));
        assert_eq!(scale.positional(1), Some("720"));
    }

    #[test]
    fn test_parse_chain_and_named_args() {
        let graph = GraphDescription::parse("format=pix_fmts=nv12, hwupload ,scale_cuda=w=640:h=360").unwrap();
        let filters = &graph.chains[0].filters;
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0].named("pix_fmts"), Some("nv12"));
        assert_eq!(filters[1].name, "hwupload");
        assert!(filters[1].args.is_empty());
        assert_eq!(filters[2].arg("h", 1), Some("360"));
    }

    #[test]
    fn test_parse_labels() {
        let graph = GraphDescription::parse("[in]scale=64:32[mid];[mid] null [out]").unwrap();
        assert_eq!(graph.chains.len(), 2);
        assert_eq!(graph.chains[0].input.as_deref(), Some("in"));
        assert_eq!(graph.chains[0].output.as_deref(), Some("mid"));
        assert_eq!(graph.chains[1].input.as_deref(), Some("mid"));
        assert_eq!(graph.chains[1].output.as_deref(), Some("out"));
        assert_eq!(graph.filter_count(), 2);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            GraphDescription::parse(""),
            Err(FilterError::Parse { position: 0, .. })
        ));
        assert!(GraphDescription::parse("scale=64:").is_err());
        assert!(GraphDescription::parse("[a scale").is_err());
        assert!(GraphDescription::parse("[a][b]null").is_err());
        assert!(GraphDescription::parse("null[x],null").is_err());
        assert!(GraphDescription::parse("null;;null").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let spec = FilterSpec::parse("scale=64:h=32").unwrap();
        assert_eq!(spec.to_string(), "scale=64:h=32");
        assert_eq!(FilterSpec::parse(&spec.to_string()).unwrap(), spec);
        assert!(FilterSpec::parse("null,null").is_err());
    }
}
