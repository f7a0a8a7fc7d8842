//! A character-indexed radix trie with two terminal kinds — a prefix
//! ("any path with this node as a prefix") terminal and an exact ("only at
//! end of input") terminal — and the `#`/`#?`/`#s`/`#i` insertion suffix
//! rules from spec.md §4.2.
//!
//! Unlike monolake's `matchit::Router` (built for path-segment/wildcard
//! matching with no notion of a "shortest matching prefix wins" rule),
//! this matcher's ordering guarantee is load-bearing and, in its source
//! spec, described two slightly different ways: the shallowest passing
//! prefix terminal along the walk wins over any deeper prefix, but an
//! exact terminal reached at the full length of the input still wins over
//! an already-remembered shallower prefix. See the doc comment on `find`
//! for the reconciliation this implementation commits to (also recorded in
//! this repository's DESIGN.md).

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("duplicate or overlapping route: {0:?}")]
    Duplicate(String),
}

#[derive(Debug)]
struct Node<T> {
    children: HashMap<char, Box<Node<T>>>,
    /// `|W` in spec.md's notation: matches any path with this node as a
    /// prefix.
    prefix: Option<T>,
    /// `|X`: matches only at end of input.
    exact: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Node {
            children: HashMap::new(),
            prefix: None,
            exact: None,
        }
    }
}

#[derive(Debug)]
pub struct TrieRoute<T> {
    root: Node<T>,
}

impl<T> Default for TrieRoute<T> {
    fn default() -> Self {
        TrieRoute { root: Node::default() }
    }
}

/// What kind of suffix, if any, followed a `#` in an inserted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExactSuffix {
    /// Bare trailing `#`.
    None,
    /// `#?` — also insert the same path with a trailing `/` as a prefix
    /// terminal (no `#`).
    OptionalSlash,
    /// `#s` — also insert the same path with a `/#` suffix, unless the
    /// character immediately before `#` was already `/`.
    SlashVariant,
    /// `#i` — insert `/#` (if not already slash-terminated) and
    /// `/index.html#`.
    IndexVariant,
}

fn split_exact_marker(path: &str) -> Option<(&str, ExactSuffix)> {
    let hash = path.find('#')?;
    let stem = &path[..hash];
    let suffix = &path[hash + 1..];
    let kind = match suffix {
        "" => ExactSuffix::None,
        "?" => ExactSuffix::OptionalSlash,
        "s" => ExactSuffix::SlashVariant,
        "i" => ExactSuffix::IndexVariant,
        _ => ExactSuffix::None,
    };
    Some((stem, kind))
}

impl<T: Clone> TrieRoute<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `path` (which may contain a `#` exact-terminator and suffix
    /// rule) with the given terminal payload. A bare path with no `#`
    /// inserts a prefix terminal; inserting a terminal of the same kind
    /// twice at the same key is an error.
    pub fn add(&mut self, path: &str, data: T) -> Result<(), TrieError> {
        match split_exact_marker(path) {
            None => self.insert_prefix(path, data),
            Some((stem, kind)) => {
                self.insert_exact(stem, data.clone())?;
                match kind {
                    ExactSuffix::None => Ok(()),
                    ExactSuffix::OptionalSlash => {
                        let with_slash = format!("{}/", stem);
                        self.insert_prefix(&with_slash, data)
                    }
                    ExactSuffix::SlashVariant => {
                        if stem.ends_with('/') {
                            Ok(())
                        } else {
                            let variant = format!("{}/", stem);
                            self.insert_exact(&variant, data)
                        }
                    }
                    ExactSuffix::IndexVariant => {
                        let slash_variant = if stem.ends_with('/') {
                            stem.to_string()
                        } else {
                            let variant = format!("{}/", stem);
                            self.insert_exact(&variant, data.clone())?;
                            variant
                        };
                        let index_variant = format!("{}index.html", slash_variant);
                        self.insert_exact(&index_variant, data)
                    }
                }
            }
        }
    }

    fn walk_mut<'a>(&'a mut self, path: &str) -> &'a mut Node<T> {
        let mut node = &mut self.root;
        for c in path.chars() {
            node = node.children.entry(c).or_insert_with(|| Box::new(Node::default()));
        }
        node
    }

    fn insert_prefix(&mut self, path: &str, data: T) -> Result<(), TrieError> {
        let node = self.walk_mut(path);
        if node.prefix.is_some() {
            return Err(TrieError::Duplicate(path.to_string()));
        }
        node.prefix = Some(data);
        Ok(())
    }

    fn insert_exact(&mut self, path: &str, data: T) -> Result<(), TrieError> {
        let node = self.walk_mut(path);
        if node.exact.is_some() {
            return Err(TrieError::Duplicate(path.to_string()));
        }
        node.exact = Some(data);
        Ok(())
    }

    /// Descend `path` character by character along the single deterministic
    /// edge path the trie offers — there is never more than one branch to
    /// try, so "no backtracking" means exactly one walk happens, not that
    /// alternate branches are skipped.
    ///
    /// Along the way, the *first* prefix terminal that passes `passes` is
    /// remembered (not returned yet) — this is the "shortest matching
    /// prefix that has a passing filter" spec.md §4.2 describes; a
    /// shallower passing prefix is never displaced by a deeper one. Once
    /// the walk ends, an exact terminal reached at the full length of
    /// `path` takes priority over that remembered prefix — this is the only
    /// reading of spec.md §4.2/§8 under which both are true at once:
    /// "prefix match wins... the shortest matching prefix" AND the worked
    /// example (`/a/` prefix, `/a/b#` exact: `GET /a/b` hits the exact
    /// route, `GET /a/b/c` falls back to the prefix route). If no exact
    /// terminal is reached, or it fails its filter, the remembered prefix
    /// (if any) is returned; otherwise there is no match.
    pub fn find<'p>(
        &self,
        path: &'p str,
        mut passes: impl FnMut(&T) -> bool,
    ) -> Option<(T, &'p str)> {
        let mut node = &self.root;
        let mut depth = 0usize;
        let mut remembered: Option<(T, usize)> = None;

        if remembered.is_none() {
            if let Some(data) = &node.prefix {
                if passes(data) {
                    remembered = Some((data.clone(), depth));
                }
            }
        }

        for c in path.chars() {
            let Some(child) = node.children.get(&c) else {
                break;
            };
            node = child;
            depth += c.len_utf8();
            if remembered.is_none() {
                if let Some(data) = &node.prefix {
                    if passes(data) {
                        remembered = Some((data.clone(), depth));
                    }
                }
            }
        }

        if depth == path.len() {
            if let Some(data) = &node.exact {
                if passes(data) {
                    return Some((data.clone(), &path[..depth]));
                }
            }
        }

        remembered.map(|(data, d)| (data, &path[..d]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(_: &&str) -> bool {
        true
    }

    #[test]
    fn exact_beats_prefix_at_full_match() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a/", "prefix").unwrap();
        t.add("/a/b#", "exact").unwrap();

        let (hit, matched) = t.find("/a/b", always).unwrap();
        assert_eq!(hit, "exact");
        assert_eq!(matched, "/a/b");

        let (hit, matched) = t.find("/a/b/c", always).unwrap();
        assert_eq!(hit, "prefix");
        assert_eq!(matched, "/a/");
    }

    #[test]
    fn index_variant_expansion() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/docs#i", "H").unwrap();

        assert_eq!(t.find("/docs", always).unwrap().0, "H");
        assert_eq!(t.find("/docs/", always).unwrap().0, "H");
        assert_eq!(t.find("/docs/index.html", always).unwrap().0, "H");
        assert!(t.find("/docs/other", always).is_none());
    }

    #[test]
    fn optional_slash_variant() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/api#?", "H").unwrap();
        assert_eq!(t.find("/api", always).unwrap().0, "H");
        assert_eq!(t.find("/api/anything", always).unwrap().0, "H");
    }

    #[test]
    fn duplicate_same_kind_terminal_is_an_error() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a#", "one").unwrap();
        let err = t.add("/a#", "two").unwrap_err();
        assert!(matches!(err, TrieError::Duplicate(_)));
    }

    #[test]
    fn full_length_exact_wins_over_an_already_remembered_shallower_prefix() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a", "prefix").unwrap();
        t.add("/a/b#", "exact").unwrap();
        let (hit, matched) = t.find("/a/b", always).unwrap();
        assert_eq!(hit, "exact");
        assert_eq!(matched, "/a/b");
    }

    #[test]
    fn remembered_prefix_is_the_fallback_when_the_exact_filter_rejects() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a/", "prefix").unwrap();
        t.add("/a/b#", "exact").unwrap();
        // Reject the exact terminal specifically; the shallower prefix
        // recorded while walking toward it must still be returned.
        let (hit, matched) = t.find("/a/b", |d| *d != "exact").unwrap();
        assert_eq!(hit, "prefix");
        assert_eq!(matched, "/a/");
    }

    #[test]
    fn shallowest_passing_prefix_wins_over_a_deeper_one() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a/", "shallow").unwrap();
        t.add("/a/b/", "deep").unwrap();
        let (hit, matched) = t.find("/a/b/c", always).unwrap();
        assert_eq!(hit, "shallow");
        assert_eq!(matched, "/a/");
    }

    #[test]
    fn filter_rejection_falls_through_to_no_match() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a#", "exact").unwrap();
        assert!(t.find("/a", |_| false).is_none());
    }

    #[test]
    fn no_child_edge_is_a_miss() {
        let mut t: TrieRoute<&str> = TrieRoute::new();
        t.add("/a#", "exact").unwrap();
        assert!(t.find("/zzz", always).is_none());
    }
}
