//! Route path patterns
//!
//! A pattern is a `/`-separated path whose segments are either literals or
//! `<name>` parameters matching exactly one non-empty segment. Matching itself
//! is done by `matchit`; a pattern only knows how to spell itself for it.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled route path such as `/users/<id>/orders`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Self {
        let segments: Vec<Segment> = split(path)
            .map(|segment| {
                match segment
                    .strip_prefix('<')
                    .and_then(|rest| rest.strip_suffix('>'))
                {
                    Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
                    _ => Segment::Literal(segment.to_string()),
                }
            })
            .collect();

        let raw = render(&segments, |segment| match segment {
            Segment::Literal(text) => text.clone(),
            Segment::Param(name) => format!("<{}>", name),
        });
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the parameters, in order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The pattern in `matchit` syntax: `/users/<id>` becomes `/users/{id}`.
    pub(crate) fn route_path(&self) -> String {
        render(&self.segments, |segment| match segment {
            Segment::Literal(text) => text.replace('{', "{{").replace('}', "}}"),
            Segment::Param(name) => format!("{{{}}}", name),
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn render(segments: &[Segment], spell: impl Fn(&Segment) -> String) -> String {
    format!("/{}", segments.iter().map(spell).collect::<Vec<_>>().join("/"))
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Join a group prefix and a path into a normalized absolute path.
pub(crate) fn join(prefix: &str, path: &str) -> String {
    let joined: Vec<&str> = split(prefix).chain(split(path)).collect();
    format!("/{}", joined.join("/"))
}
