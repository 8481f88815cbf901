//! Attribute-path resolution.
//!
//! A path such as `phone.word.following.label` is resolved against the
//! corpus schema into a list of typed hops plus a terminal. Every step is
//! checked here, so an unresolvable path fails before a statement exists.

use std::fmt;

use crate::schema::{Hierarchy, PropertyOwner, ValueType};
use crate::{Error, Result};

/// One explicit step, for callers that build paths programmatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A higher level (containers) or a lower level (contained tokens).
    Level(String),
    Previous,
    Following,
    /// The speaker node.
    Speaker,
    /// The discourse node.
    Discourse,
    Subannotation(String),
    Property(String),
}

impl Step {
    fn segment(&self) -> &str {
        match self {
            Step::Level(s) | Step::Subannotation(s) | Step::Property(s) => s,
            Step::Previous => "previous",
            Step::Following => "following",
            Step::Speaker => "speaker",
            Step::Discourse => "discourse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    Parent,
    Children,
    Previous,
    Following,
    Subannotation,
    Speaker,
    Discourse,
}

impl HopKind {
    /// Hops that can reach more than one node.
    pub fn is_multi(self) -> bool {
        matches!(self, HopKind::Children | HopKind::Subannotation)
    }

    fn tag(self) -> &'static str {
        match self {
            HopKind::Parent => "up",
            HopKind::Children => "down",
            HopKind::Previous => "prev",
            HopKind::Following => "next",
            HopKind::Subannotation => "sub",
            HopKind::Speaker => "speaker",
            HopKind::Discourse => "discourse",
        }
    }
}

/// The kind of node a hop lands on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Level(String),
    Subannotation(String),
    Speaker,
    Discourse,
}

impl Endpoint {
    pub fn level(&self) -> Option<&str> {
        match self {
            Endpoint::Level(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Level(l) | Endpoint::Subannotation(l) => f.write_str(l),
            Endpoint::Speaker => f.write_str("Speaker"),
            Endpoint::Discourse => f.write_str("Discourse"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hop {
    pub kind: HopKind,
    pub target: Endpoint,
}

/// Where a terminal property is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySite {
    /// The endpoint node itself.
    Node,
    /// The type record of a token endpoint.
    TypeNode,
    /// `end - begin` of the endpoint node.
    Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalProperty {
    pub name: String,
    pub site: PropertySite,
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The path addresses nodes (used by subset predicates).
    Node,
    Property(TerminalProperty),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub text: String,
    pub start: String,
    pub hops: Vec<Hop>,
    pub terminal: Terminal,
}

impl ResolvedPath {
    pub fn endpoint(&self) -> Endpoint {
        self.hops
            .last()
            .map(|h| h.target.clone())
            .unwrap_or_else(|| Endpoint::Level(self.start.clone()))
    }

    /// Index of the first hop that can reach more than one node.
    pub fn first_multi(&self) -> Option<usize> {
        self.hops.iter().position(|h| h.kind.is_multi())
    }

    pub fn is_multi(&self) -> bool {
        self.first_multi().is_some()
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match &self.terminal {
            Terminal::Property(p) => Some(p.value_type),
            Terminal::Node => None,
        }
    }

    /// Canonical key of the first `n` hops. Two paths that reach the same
    /// node the same way share a key, however they were spelled.
    pub fn key(&self, n: usize) -> String {
        let mut key = self.start.clone();
        for hop in &self.hops[..n.min(self.hops.len())] {
            key.push('>');
            key.push_str(hop.kind.tag());
            key.push(':');
            key.push_str(&hop.target.to_string());
        }
        key
    }
}

/// Resolve a dotted path whose first segment is `start`.
pub fn resolve(hierarchy: &Hierarchy, start: &str, text: &str) -> Result<ResolvedPath> {
    let segments: Vec<&str> = text.split('.').collect();
    let Some((&first, rest)) = segments.split_first() else {
        return Err(invalid(text, "", "empty path"));
    };
    if first != start {
        return Err(invalid(text, first, &format!("path must start at the bound level '{start}'")));
    }
    resolve_segments(hierarchy, start, text, rest, false)
}

/// Resolve explicit steps from `start`. A trailing relation step is a node
/// terminal even where the name could be read as a property.
pub fn resolve_steps(hierarchy: &Hierarchy, start: &str, steps: &[Step]) -> Result<ResolvedPath> {
    let segments: Vec<&str> = steps.iter().map(Step::segment).collect();
    let text = std::iter::once(start).chain(segments.iter().copied()).collect::<Vec<_>>().join(".");
    let last_is_hop = steps.last().is_some_and(|s| !matches!(s, Step::Property(_)));
    resolve_segments(hierarchy, start, &text, &segments, last_is_hop)
}

fn invalid(path: &str, step: &str, reason: &str) -> Error {
    Error::InvalidPath { path: path.to_owned(), step: step.to_owned(), reason: reason.to_owned() }
}

fn resolve_segments(
    hierarchy: &Hierarchy,
    start: &str,
    text: &str,
    segments: &[&str],
    last_is_hop: bool,
) -> Result<ResolvedPath> {
    if !hierarchy.has_level(start) {
        return Err(invalid(text, start, "no such level"));
    }
    let mut hops: Vec<Hop> = Vec::new();
    let mut endpoint = Endpoint::Level(start.to_owned());
    let mut multi = false;

    for (i, &seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            return Err(invalid(text, seg, "empty step"));
        }
        let last = i + 1 == segments.len();
        if last && !last_is_hop {
            if let Some(property) = terminal_property(hierarchy, &endpoint, seg) {
                return Ok(ResolvedPath {
                    text: text.to_owned(),
                    start: start.to_owned(),
                    hops,
                    terminal: Terminal::Property(property),
                });
            }
        }

        let Endpoint::Level(level) = &endpoint else {
            let reason = if last {
                format!("'{endpoint}' has no property '{seg}'")
            } else {
                format!("no relations lead out of '{endpoint}'")
            };
            return Err(invalid(text, seg, &reason));
        };
        let level = level.clone();

        match seg {
            "previous" | "following" => {
                let kind = if seg == "previous" { HopKind::Previous } else { HopKind::Following };
                hops.push(Hop { kind, target: Endpoint::Level(level) });
            }
            "speaker" | "discourse" => {
                if multi {
                    return Err(invalid(text, seg, "cannot follow a multi-valued step"));
                }
                let (kind, target) = if seg == "speaker" {
                    (HopKind::Speaker, Endpoint::Speaker)
                } else {
                    (HopKind::Discourse, Endpoint::Discourse)
                };
                hops.push(Hop { kind, target: target.clone() });
                endpoint = target;
            }
            _ if hierarchy.has_level(seg) => {
                let levels = hierarchy.levels();
                let (from, to) = match (hierarchy.depth(&level), hierarchy.depth(seg)) {
                    (Some(f), Some(t)) => (f, t),
                    _ => return Err(invalid(text, seg, "no such level")),
                };
                if to > from {
                    for l in &levels[from + 1..=to] {
                        hops.push(Hop { kind: HopKind::Parent, target: Endpoint::Level(l.clone()) });
                    }
                } else if to < from {
                    for l in levels[to..from].iter().rev() {
                        hops.push(Hop { kind: HopKind::Children, target: Endpoint::Level(l.clone()) });
                    }
                    multi = true;
                } else {
                    return Err(invalid(text, seg, "a level cannot step to itself"));
                }
                endpoint = Endpoint::Level(seg.to_owned());
            }
            _ => match hierarchy.subannotation(seg) {
                Some(spec) if spec.level == level => {
                    hops.push(Hop { kind: HopKind::Subannotation, target: Endpoint::Subannotation(seg.to_owned()) });
                    endpoint = Endpoint::Subannotation(seg.to_owned());
                    multi = true;
                }
                Some(spec) => {
                    return Err(invalid(
                        text,
                        seg,
                        &format!("subannotation '{seg}' annotates '{}', not '{level}'", spec.level),
                    ));
                }
                None => {
                    let reason = if last {
                        format!("'{level}' has no property or relation '{seg}'")
                    } else {
                        format!("'{level}' has no relation '{seg}'")
                    };
                    return Err(invalid(text, seg, &reason));
                }
            },
        }
    }

    Ok(ResolvedPath { text: text.to_owned(), start: start.to_owned(), hops, terminal: Terminal::Node })
}

fn terminal_property(hierarchy: &Hierarchy, endpoint: &Endpoint, name: &str) -> Option<TerminalProperty> {
    let prop = |site, value_type| Some(TerminalProperty { name: name.to_owned(), site, value_type });
    match endpoint {
        Endpoint::Level(level) => match name {
            "duration" => prop(PropertySite::Duration, ValueType::Float),
            "begin" | "end" => prop(PropertySite::Node, ValueType::Float),
            "id" | "discourse" | "speaker" => prop(PropertySite::Node, ValueType::String),
            "label" => prop(PropertySite::TypeNode, ValueType::String),
            _ => {
                if let Some(vt) = hierarchy.property_type(&PropertyOwner::type_of(level), name) {
                    prop(PropertySite::TypeNode, vt)
                } else {
                    let vt = hierarchy.property_type(&PropertyOwner::token_of(level), name)?;
                    prop(PropertySite::Node, vt)
                }
            }
        },
        Endpoint::Subannotation(kind) => match name {
            "duration" => prop(PropertySite::Duration, ValueType::Float),
            "begin" | "end" => prop(PropertySite::Node, ValueType::Float),
            "id" | "label" => prop(PropertySite::Node, ValueType::String),
            _ => prop(
                PropertySite::Node,
                hierarchy.property_type(&PropertyOwner::Subannotation(kind.clone()), name)?,
            ),
        },
        Endpoint::Speaker | Endpoint::Discourse => {
            if name == "name" {
                return prop(PropertySite::Node, ValueType::String);
            }
            let owner = if *endpoint == Endpoint::Speaker { PropertyOwner::Speaker } else { PropertyOwner::Discourse };
            prop(PropertySite::Node, hierarchy.property_type(&owner, name)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertySpec;
    use pretty_assertions::assert_eq;

    fn schema() -> Hierarchy {
        let mut h = Hierarchy::new("demo");
        h.add_level("utterance", None).unwrap();
        h.add_level("word", Some("utterance")).unwrap();
        h.add_level("phone", Some("word")).unwrap();
        h.add_property(&PropertyOwner::type_of("word"), "transcription", ValueType::String).unwrap();
        h.add_property(&PropertyOwner::Speaker, "gender", ValueType::String).unwrap();
        let mut spec = PropertySpec::new();
        spec.insert("confidence".into(), ValueType::Float);
        h.add_subannotation("burst", "phone", &spec).unwrap();
        h
    }

    fn kinds(p: &ResolvedPath) -> Vec<HopKind> {
        p.hops.iter().map(|h| h.kind).collect()
    }

    #[test]
    fn test_parent_label() {
        let p = resolve(&schema(), "phone", "phone.word.label").unwrap();
        assert_eq!(kinds(&p), vec![HopKind::Parent]);
        let Terminal::Property(t) = &p.terminal else { panic!("expected property") };
        assert_eq!(t.site, PropertySite::TypeNode);
    }

    #[test]
    fn test_multi_hop_parent_expands() {
        let p = resolve(&schema(), "phone", "phone.utterance.begin").unwrap();
        assert_eq!(kinds(&p), vec![HopKind::Parent, HopKind::Parent]);
        let q = resolve(&schema(), "phone", "phone.word.utterance.end").unwrap();
        assert_eq!(p.key(2), q.key(2));
    }

    #[test]
    fn test_children_are_multi_valued() {
        let p = resolve(&schema(), "utterance", "utterance.phone.label").unwrap();
        assert_eq!(kinds(&p), vec![HopKind::Children, HopKind::Children]);
        assert_eq!(p.first_multi(), Some(0));
    }

    #[test]
    fn test_speaker_is_property_at_end_and_hop_in_middle() {
        let p = resolve(&schema(), "word", "word.speaker").unwrap();
        assert!(p.hops.is_empty());
        let q = resolve(&schema(), "word", "word.speaker.gender").unwrap();
        assert_eq!(kinds(&q), vec![HopKind::Speaker]);
        let r = resolve_steps(&schema(), "word", &[Step::Speaker]).unwrap();
        assert_eq!(r.terminal, Terminal::Node);
    }

    #[test]
    fn test_following_then_type_property() {
        let p = resolve(&schema(), "phone", "phone.word.following.transcription").unwrap();
        assert_eq!(kinds(&p), vec![HopKind::Parent, HopKind::Following]);
        assert_eq!(p.value_type(), Some(ValueType::String));
    }

    #[test]
    fn test_subannotation_property() {
        let p = resolve(&schema(), "phone", "phone.burst.confidence").unwrap();
        assert!(p.is_multi());
        assert_eq!(p.endpoint(), Endpoint::Subannotation("burst".into()));
        assert!(resolve(&schema(), "word", "word.burst.confidence").is_err());
    }

    #[test]
    fn test_unknown_step_names_the_step() {
        let err = resolve(&schema(), "phone", "phone.sylable.label").unwrap_err();
        match err {
            Error::InvalidPath { step, .. } => assert_eq!(step, "sylable"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(resolve(&schema(), "phone", "word.label").is_err());
        assert!(resolve(&schema(), "utterance", "utterance.word.speaker.gender").is_err());
    }
}
